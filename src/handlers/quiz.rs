// src/handlers/quiz.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;

use crate::{
    error::AppError,
    models::attempt::{
        StartQuizRequest, SubmitAnswersRequest, SubmitQuizRequest, SubmitQuizResponse,
    },
    services::{attempt, catalog},
    utils::jwt::Claims,
};

/// Every topic with its quizzes and the caller's attempt on each.
pub async fn list_topic_quizzes(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let topics = catalog::list_topic_quizzes(&pool, Some(claims.user_id()?), None, false).await?;
    Ok(Json(topics))
}

pub async fn quizzes_by_topic(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(topic_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let topics =
        catalog::list_topic_quizzes(&pool, Some(claims.user_id()?), Some(topic_id), false).await?;
    Ok(Json(topics))
}

pub async fn start_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<StartQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    let attempt = attempt::start_attempt(&pool, claims.user_id()?, payload.quiz_id).await?;
    Ok(Json(json!({ "message": "Quiz started", "attempt": attempt })))
}

pub async fn submit_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<SubmitQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    grade(&pool, claims.user_id()?, payload).await
}

pub async fn submit_quiz_for_topic(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path((topic_id, quiz_id)): Path<(i64, i64)>,
    Json(payload): Json<SubmitAnswersRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request = SubmitQuizRequest {
        topic_id: Some(topic_id),
        quiz_id,
        answers: payload.answers,
    };
    grade(&pool, claims.user_id()?, request).await
}

async fn grade(
    pool: &PgPool,
    student_id: i64,
    request: SubmitQuizRequest,
) -> Result<Json<SubmitQuizResponse>, AppError> {
    let graded = attempt::submit_attempt(
        pool,
        student_id,
        request.quiz_id,
        request.topic_id,
        &request.answers,
    )
    .await?;

    Ok(Json(SubmitQuizResponse {
        message: "Quiz submitted successfully".to_string(),
        score: graded.score,
        attempt_count: graded.attempt_count,
    }))
}
