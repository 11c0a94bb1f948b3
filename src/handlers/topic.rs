// src/handlers/topic.rs

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use sqlx::PgPool;

use crate::{error::AppError, services::content};

pub async fn list_topics(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(content::list_topics(&pool).await?))
}

pub async fn get_topic(
    State(pool): State<PgPool>,
    Path(topic_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(content::get_topic(&pool, topic_id).await?))
}

/// Every topic with its chapters, sub-chapters and file names.
pub async fn topics_with_chapters(
    State(pool): State<PgPool>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(content::topics_with_chapters(&pool).await?))
}

pub async fn topic_chapters(
    State(pool): State<PgPool>,
    Path(topic_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(content::topic_chapters(&pool, topic_id).await?))
}
