use jobjar_shared::domain::{AccountSet, LessonCategory, Percentages};
use serde::Deserialize;

/// Initial data written into an empty database.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedConfig {
    pub family_name: String,
    #[serde(default)]
    pub account_types: Option<AccountSet>,
    #[serde(default)]
    pub parents: Vec<SeedParent>,
    #[serde(default)]
    pub children: Vec<SeedChild>,
    #[serde(default)]
    pub lessons: Vec<SeedLesson>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedParent {
    pub username: String,
    pub password_hash: String, // bcrypt hash
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedChild {
    pub username: String,
    pub password_hash: String, // bcrypt hash
    pub name: String,
    pub age: i32,
    #[serde(default)]
    pub allocation: Option<Percentages>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedLesson {
    pub category: LessonCategory,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub quizzes: Vec<SeedQuiz>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedQuiz {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: i32,
}
