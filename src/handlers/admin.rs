// src/handlers/admin.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    handlers::chapter::read_chapter_form,
    models::{
        quiz::{CreateQuizRequest, EditQuizRequest},
        topic::{CreateTopicRequest, UpdateTopicRequest},
    },
    services::{catalog, content, storage::FileStorage},
};

/// Creates a topic. The topic number is its id; 409 if it is taken.
pub async fn create_topic(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateTopicRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let topic = content::create_topic(&pool, &payload).await?;
    Ok((StatusCode::CREATED, Json(topic)))
}

pub async fn update_topic(
    State(pool): State<PgPool>,
    Path(topic_id): Path<i64>,
    Json(payload): Json<UpdateTopicRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let topic = content::update_topic(&pool, topic_id, &payload).await?;
    Ok(Json(topic))
}

/// Multipart chapter creation with an optional PDF in `chapter_file`.
pub async fn create_chapter(
    State(pool): State<PgPool>,
    State(storage): State<Arc<dyn FileStorage>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let form = read_chapter_form(multipart).await?;
    let saved = content::create_chapter(&pool, storage.as_ref(), form).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

pub async fn update_chapter(
    State(pool): State<PgPool>,
    State(storage): State<Arc<dyn FileStorage>>,
    Path(chapter_id): Path<i64>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let form = read_chapter_form(multipart).await?;
    let saved = content::update_chapter(&pool, storage.as_ref(), chapter_id, form).await?;
    Ok(Json(saved))
}

pub async fn create_quiz(
    State(pool): State<PgPool>,
    Json(payload): Json<CreateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let quiz_id = catalog::create_quiz(&pool, &payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Quiz created successfully", "quiz_id": quiz_id })),
    ))
}

pub async fn update_quiz(
    State(pool): State<PgPool>,
    Json(payload): Json<EditQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    catalog::edit_quiz(&pool, &payload).await?;
    Ok(Json(json!({ "message": "Quiz updated successfully" })))
}

/// All quizzes with their answer keys.
pub async fn assessments(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let topics = catalog::list_topic_quizzes(&pool, None, None, true).await?;
    Ok(Json(topics))
}
