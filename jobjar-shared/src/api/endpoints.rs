use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use super::API_V1_PREFIX;
use crate::domain::LessonCategory;

fn base_join(base: &str, path: &str) -> String {
    let b = base.trim_end_matches('/');
    let p = path.trim_start_matches('/');
    format!("{}/{}", b, p)
}

fn v1(base: &str, path: &str) -> String {
    base_join(base, &format!("{}/{}", API_V1_PREFIX, path.trim_start_matches('/')))
}

fn enc(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

pub fn version(base: &str) -> String {
    base_join(base, "/api/version")
}
pub fn auth_login(base: &str) -> String {
    v1(base, "auth/login")
}
pub fn auth_me(base: &str) -> String {
    v1(base, "auth/me")
}
pub fn children(base: &str) -> String {
    v1(base, "children")
}
pub fn child(base: &str, child_id: i32) -> String {
    v1(base, &format!("children/{child_id}"))
}
pub fn jobs(base: &str) -> String {
    v1(base, "jobs")
}
pub fn job(base: &str, job_id: i32) -> String {
    v1(base, &format!("jobs/{job_id}"))
}
pub fn payments(base: &str) -> String {
    v1(base, "payments")
}
pub fn job_payment(base: &str, job_id: i32) -> String {
    v1(base, &format!("payments/job/{job_id}"))
}
pub fn account_types(base: &str, family_id: i32) -> String {
    v1(base, &format!("account-types/{family_id}"))
}
pub fn allocation(base: &str, child_id: i32) -> String {
    v1(base, &format!("allocation/{child_id}"))
}
pub fn lessons(base: &str, category: Option<LessonCategory>) -> String {
    match category {
        Some(c) => v1(base, &format!("lessons?category={}", enc(c.as_str()))),
        None => v1(base, "lessons"),
    }
}
pub fn lesson_quizzes(base: &str, lesson_id: i32) -> String {
    v1(base, &format!("lessons/{lesson_id}/quizzes"))
}
pub fn lesson_progress(base: &str, lesson_id: i32) -> String {
    v1(base, &format!("lessons/{lesson_id}/progress"))
}

fn with_child(path: &str, child_id: Option<i32>) -> String {
    match child_id {
        Some(id) => format!("{path}?childId={id}"),
        None => path.to_string(),
    }
}

pub fn learning_progress(base: &str, child_id: Option<i32>) -> String {
    v1(base, &with_child("learning-progress", child_id))
}
pub fn achievements(base: &str, child_id: Option<i32>) -> String {
    v1(base, &with_child("achievements", child_id))
}
pub fn dashboard_stats(base: &str, child_id: Option<i32>) -> String {
    v1(base, &with_child("dashboard-stats", child_id))
}
