// src/handlers/auth.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;
use tower_cookies::Cookies;
use validator::Validate;

use crate::{
    config::Config,
    error::{AppError, is_unique_violation},
    models::{
        otp::{EmailRequest, OtpPurpose},
        user::{LoginRequest, RegisterRequest, User},
    },
    services::{mailer::Mailer, otp, session},
    utils::{
        hash::{hash_password, verify_password},
        jwt::{
            AccessToken, clear_access_cookie, extract_token, inspect_access_token,
            set_access_cookie, sign_access_token,
        },
    },
};

const USER_COLUMNS: &str = "id, student_number, username, email, password, role, created_at";

/// Registers a new student.
///
/// Consumes the registration OTP, inserts the user and the default progress
/// row in one transaction. Returns 201 Created.
pub async fn register(
    State(pool): State<PgPool>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let taken: Vec<(String, Option<String>)> = sqlx::query_as(
        "SELECT email, student_number FROM users WHERE email = $1 OR student_number = $2",
    )
    .bind(&payload.email)
    .bind(&payload.student_number)
    .fetch_all(&pool)
    .await?;

    let mut conflicts = Vec::new();
    if taken.iter().any(|(email, _)| *email == payload.email) {
        conflicts.push("email");
    }
    if taken
        .iter()
        .any(|(_, number)| number.as_deref() == Some(payload.student_number.as_str()))
    {
        conflicts.push("student_number");
    }
    if !conflicts.is_empty() {
        return Err(AppError::Conflict(format!(
            "Already registered: {}",
            conflicts.join(", ")
        )));
    }

    let hashed_password = hash_password(&payload.password)?;

    let mut tx = pool.begin().await?;

    otp::consume_otp(&pool, &mut *tx, &payload.email, OtpPurpose::Registration, &payload.otp).await?;

    let user_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO users (student_number, username, email, password)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(&payload.student_number)
    .bind(&payload.username)
    .bind(&payload.email)
    .bind(&hashed_password)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        // A concurrent registration won the race.
        if is_unique_violation(&e) {
            AppError::Conflict("Already registered".to_string())
        } else {
            AppError::internal("Failed to register user", e)
        }
    })?;

    sqlx::query("INSERT INTO user_progress (student_id) VALUES ($1)")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(user_id, "User registered");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "User registered successfully", "user_id": user_id })),
    ))
}

/// Authenticates a user and sets the access-token cookie.
pub async fn login(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    cookies: Cookies,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE email = $1",
        USER_COLUMNS
    ))
    .bind(&payload.email)
    .fetch_optional(&pool)
    .await?;

    // Same message for unknown email and wrong password.
    let invalid = || AppError::AuthError("Invalid email or password".to_string());
    let user = user.ok_or_else(invalid)?;
    if !verify_password(&payload.password, &user.password)? {
        return Err(invalid());
    }

    session::ensure_refresh_token(&pool, &config, user.id).await?;

    let token = sign_access_token(
        user.id,
        &user.role,
        &config.jwt_access_secret,
        config.access_token_ttl,
    )?;
    set_access_cookie(&cookies, &config, token);

    tracing::info!(user_id = user.id, "User logged in");
    Ok(Json(json!({
        "message": "Login successful",
        "user_id": user.id,
        "role": user.role
    })))
}

/// Confirms the session, exchanging an expired access token through the
/// refresh token. Mounted at `/auth/verify` and `/user/refresh`.
pub async fn refresh(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    cookies: Cookies,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = extract_token(&cookies, &headers)
        .ok_or_else(|| AppError::AuthError("Missing access token".to_string()))?;

    let claims = match inspect_access_token(&token, &config.jwt_access_secret)? {
        AccessToken::Valid(claims) => claims,
        AccessToken::Expired(stale) => {
            let (fresh, claims) = session::refresh_access_token(&pool, &config, &stale).await?;
            set_access_cookie(&cookies, &config, fresh);
            claims
        }
    };

    Ok(Json(json!({
        "message": "Authenticated",
        "user_data": { "user_id": claims.user_id()?, "role": claims.role }
    })))
}

/// Clears the cookie and revokes the refresh token of whoever it identifies.
pub async fn logout(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    cookies: Cookies,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let user_id = extract_token(&cookies, &headers)
        .and_then(|token| inspect_access_token(&token, &config.jwt_access_secret).ok())
        .and_then(|status| match status {
            AccessToken::Valid(c) | AccessToken::Expired(c) => c.user_id().ok(),
        });

    if let Some(user_id) = user_id {
        session::revoke_refresh_token(&pool, user_id).await?;
        tracing::info!(user_id, "User logged out");
    }

    clear_access_cookie(&cookies);
    Ok(Json(json!({ "message": "Logged out" })))
}

/// Sends a registration code to an email that is not yet registered.
pub async fn send_registration_otp(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    State(mailer): State<Arc<dyn Mailer>>,
    Json(payload): Json<EmailRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE email = $1)")
        .bind(&payload.email)
        .fetch_one(&pool)
        .await?;
    if exists {
        return Err(AppError::Conflict("Email is already registered".to_string()));
    }

    otp::issue_otp(
        &pool,
        mailer.as_ref(),
        &payload.email,
        OtpPurpose::Registration,
        None,
        config.otp_ttl_secs,
    )
    .await?;

    Ok(Json(json!({ "message": "Verification code sent" })))
}
