// src/models/progress.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Represents the 'user_progress' table: the student's cursor and counters.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserProgress {
    pub student_id: i64,
    pub curr_chap_id: i64,
    pub curr_topic_id: i64,
    pub curr_quiz_id: Option<i64>,
    pub completed_lessons: i32,
    pub completed_quizzes: i32,
}

/// Ledger row of the 'completed_chapters' table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CompletedChapter {
    pub chapter_id: i64,
    pub topic_id: i64,
    pub status: String,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

/// Ledger row of the 'completed_quizzes' table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CompletedQuiz {
    pub quiz_id: i64,
    pub topic_id: i64,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct ProgressOverview {
    pub progress: UserProgress,
    pub completed_chapters: Vec<CompletedChapter>,
    pub completed_quizzes: Vec<CompletedQuiz>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProgressRequest {
    pub chapter_id: i64,
    pub topic_id: i64,
}

#[derive(Debug, Serialize)]
pub struct AdvanceProgressResponse {
    pub message: String,
    pub curr_chap_id: i64,
    pub curr_topic_id: i64,
}
