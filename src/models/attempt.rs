// src/models/attempt.rs

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Represents the 'quiz_attempts' table. One row per (student, quiz); retries are
/// told apart by the `attempt_number` tag on answer rows.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub id: i64,
    pub quiz_id: i64,
    pub student_id: i64,
    /// Null until the first start.
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Set only once grading completes.
    pub score: Option<i32>,
    pub time_taken_ms: Option<i64>,
    pub attempt_count: i32,
}

#[derive(Debug, Deserialize)]
pub struct StartQuizRequest {
    pub quiz_id: i64,
}

/// Submission body for `/quizzes/submit`. When `topic_id` is given the quiz must belong to it.
#[derive(Debug, Deserialize)]
pub struct SubmitQuizRequest {
    pub topic_id: Option<i64>,
    pub quiz_id: i64,
    #[serde(default)]
    pub answers: HashMap<i64, String>,
}

/// Body of `/quizzes/submit/{topic_id}/{quiz_id}`.
#[derive(Debug, Deserialize)]
pub struct SubmitAnswersRequest {
    #[serde(default)]
    pub answers: HashMap<i64, String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitQuizResponse {
    pub message: String,
    pub score: i32,
    pub attempt_count: i32,
}
