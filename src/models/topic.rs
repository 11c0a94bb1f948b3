// src/models/topic.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::models::chapter::ChapterTree;

/// Represents the 'topics' table.
///
/// Topic ids are admin-assigned and consecutive, so `id + 1` names the next topic.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Topic {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// A topic with its chapter tree.
#[derive(Debug, Serialize)]
pub struct TopicWithChapters {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub chapters: Vec<ChapterTree>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTopicRequest {
    #[validate(range(min = 1))]
    pub topic_num: i64,
    #[validate(length(min = 1, max = 200))]
    pub topic_name: String,
    #[validate(length(min = 1, max = 5000))]
    pub topic_description: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTopicRequest {
    #[validate(length(min = 1, max = 200))]
    pub topic_title: String,
    #[validate(length(min = 1, max = 5000))]
    pub description: String,
}
