// src/handlers/user.rs

use std::sync::Arc;

use axum::{Extension, Json, extract::State, response::IntoResponse};
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    config::Config,
    error::AppError,
    models::{
        otp::{EmailRequest, NewPasswordRequest, OtpPurpose, VerifyOtpRequest},
        progress::{AdvanceProgressResponse, UpdateProgressRequest},
        user::{ProfileResponse, UpdateUserRequest, User},
    },
    services::{mailer::Mailer, otp, progress},
    utils::{hash::hash_password, jwt::Claims},
};

/// Get the caller's profile.
pub async fn profile(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, student_number, username, email, password, role, created_at FROM users WHERE id = $1",
    )
    .bind(claims.user_id()?)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    Ok(Json(ProfileResponse::from(user)))
}

pub async fn update_data(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let result = sqlx::query("UPDATE users SET username = $1 WHERE id = $2")
        .bind(&payload.username)
        .bind(claims.user_id()?)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    Ok(Json(json!({ "message": "User updated" })))
}

/// Progress cursor plus the completed-chapter and completed-quiz ledgers.
pub async fn get_progress(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let overview = progress::progress_overview(&pool, claims.user_id()?).await?;
    Ok(Json(overview))
}

pub async fn update_progress(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<UpdateProgressRequest>,
) -> Result<impl IntoResponse, AppError> {
    let cursor = progress::advance_chapter_progress(
        &pool,
        claims.user_id()?,
        payload.chapter_id,
        payload.topic_id,
    )
    .await?;

    Ok(Json(AdvanceProgressResponse {
        message: "Chapter progress updated successfully".to_string(),
        curr_chap_id: cursor.chapter,
        curr_topic_id: cursor.topic_id,
    }))
}

async fn send_reset_code(
    pool: &PgPool,
    config: &Config,
    mailer: &dyn Mailer,
    email: &str,
) -> Result<(), AppError> {
    let user_id: i64 = sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    otp::issue_otp(
        pool,
        mailer,
        email,
        OtpPurpose::PasswordReset,
        Some(user_id),
        config.otp_ttl_secs,
    )
    .await
}

pub async fn forgot_password(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    State(mailer): State<Arc<dyn Mailer>>,
    Json(payload): Json<EmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    send_reset_code(&pool, &config, mailer.as_ref(), &payload.email).await?;
    Ok(Json(json!({ "message": "Password reset code sent" })))
}

/// Re-issues a password reset code. The previous code stops working.
pub async fn retry_otp(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    State(mailer): State<Arc<dyn Mailer>>,
    Json(payload): Json<EmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    send_reset_code(&pool, &config, mailer.as_ref(), &payload.email).await?;
    Ok(Json(json!({ "message": "A new code has been sent" })))
}

/// Checks a reset code without using it up.
pub async fn verify_otp(
    State(pool): State<PgPool>,
    Json(payload): Json<VerifyOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let mut conn = pool.acquire().await?;
    otp::check_otp(&pool, &mut *conn, &payload.email, OtpPurpose::PasswordReset, &payload.otp).await?;

    Ok(Json(json!({ "message": "OTP verified" })))
}

/// Sets a new password, consuming the reset code in the same transaction.
/// Existing sessions lose their refresh token.
pub async fn new_password(
    State(pool): State<PgPool>,
    Json(payload): Json<NewPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let hashed_password = hash_password(&payload.password)?;

    let mut tx = pool.begin().await?;

    otp::consume_otp(&pool, &mut *tx, &payload.email, OtpPurpose::PasswordReset, &payload.otp).await?;

    let user_id: i64 = sqlx::query_scalar("UPDATE users SET password = $1 WHERE email = $2 RETURNING id")
        .bind(&hashed_password)
        .bind(&payload.email)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    sqlx::query("DELETE FROM user_refresh_tokens WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(user_id, "Password reset");
    Ok(Json(json!({ "message": "Password updated successfully" })))
}
