use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::domain::{AccountSet, JobStatus, LessonCategory, Percentages, Recurrence, Split};

pub mod endpoints;

pub const API_V1_PREFIX: &str = "/api/v1";

// Auth
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthReq {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResp {
    pub token: String,
    pub user: UserDto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: i32,
    pub username: String,
    pub role: Role,
    pub family_id: i32,
    pub name: String,
    pub age: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionDto {
    pub version: String,
}

// Children
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildDto {
    pub id: i32,
    pub user_id: i32,
    pub family_id: i32,
    pub name: String,
    pub age: i32,
    pub total_earned: Decimal,
    pub completed_jobs: i32,
    pub learning_streak: i32,
    pub spending_balance: Decimal,
    pub savings_balance: Decimal,
    pub roth_ira_balance: Decimal,
    pub brokerage_balance: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChildReq {
    pub name: String,
    pub age: i32,
    /// Defaults to the lowercased name without whitespace.
    pub username: Option<String>,
    /// Defaults to the configured default child password.
    pub password: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChildReq {
    pub name: Option<String>,
    pub age: Option<i32>,
}

// Jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDto {
    pub id: i32,
    pub title: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub status: JobStatus,
    pub recurrence: Recurrence,
    pub assigned_to_id: i32,
    pub family_id: i32,
    pub icon: String,
    pub created_at: String, // RFC3339 UTC
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobReq {
    pub title: String,
    pub description: Option<String>,
    pub amount: Decimal,
    #[serde(default = "default_recurrence")]
    pub recurrence: Recurrence,
    pub assigned_to_id: i32,
    pub icon: Option<String>,
}

fn default_recurrence() -> Recurrence {
    Recurrence::Once
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateJobReq {
    pub status: Option<JobStatus>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub amount: Option<Decimal>,
    pub recurrence: Option<Recurrence>,
    pub icon: Option<String>,
    /// Explicit split applied instead of the child's percentages on approval.
    pub custom_allocation: Option<Split>,
}

impl UpdateJobReq {
    /// True when anything other than `status` is being changed.
    pub fn edits_fields(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.amount.is_some()
            || self.recurrence.is_some()
            || self.icon.is_some()
    }
}

// Payments
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDto {
    pub id: i32,
    pub job_id: i32,
    pub child_id: i32,
    pub amount: Decimal,
    #[serde(flatten)]
    pub split: Split,
    pub created_at: String, // RFC3339 UTC
}

// Allocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationDto {
    pub id: i32,
    pub child_id: i32,
    #[serde(flatten)]
    pub percentages: Percentages,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountTypesDto {
    pub id: i32,
    pub family_id: i32,
    #[serde(flatten)]
    pub accounts: AccountSet,
}

// Learning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonDto {
    pub id: i32,
    pub category: LessonCategory,
    pub title: String,
    pub content: String,
    pub video_url: Option<String>,
    pub is_custom: bool,
    pub family_id: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLessonReq {
    pub category: LessonCategory,
    pub title: String,
    pub content: String,
    pub video_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizDto {
    pub id: i32,
    pub lesson_id: i32,
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningProgressDto {
    pub id: i32,
    pub child_id: i32,
    pub lesson_id: i32,
    pub completed: bool,
    pub quiz_score: Option<i32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteLessonReq {
    pub quiz_score: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AchievementDto {
    pub id: i32,
    pub child_id: i32,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub earned_at: String, // RFC3339 UTC
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAchievementReq {
    pub child_id: i32,
    pub title: String,
    pub description: String,
    #[serde(default = "default_achievement_icon")]
    pub icon: String,
}

fn default_achievement_icon() -> String {
    "trophy".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStatsDto {
    pub child: ChildDto,
    pub allocation: Option<AllocationDto>,
    pub active_jobs: Vec<JobDto>,
    pub total_earned: Decimal,
    pub completed_jobs: i32,
    pub learning_streak: i32,
    pub achievements: Vec<AchievementDto>,
    pub learning_progress: Vec<LearningProgressDto>,
}

// Query strings
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildQuery {
    pub child_id: Option<i32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LessonQuery {
    pub category: Option<LessonCategory>,
}
