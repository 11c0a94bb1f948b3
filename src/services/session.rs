// src/services/session.rs

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::{
    config::Config,
    error::AppError,
    models::user::RefreshTokenRecord,
    utils::jwt::{Claims, sign_access_token, sign_refresh_token, verify_jwt},
};

/// A refresh token is usable up to and including its expiry instant.
pub fn check_refresh_token_validity(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now <= expires_at
}

async fn find_refresh_token(
    pool: &PgPool,
    user_id: i64,
) -> Result<Option<RefreshTokenRecord>, AppError> {
    let record = sqlx::query_as::<_, RefreshTokenRecord>(
        "SELECT id, user_id, token, expires_at FROM user_refresh_tokens WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Makes sure the user holds a live refresh token: creates one when missing,
/// rotates it when expired, leaves a valid one untouched.
pub async fn ensure_refresh_token(
    pool: &PgPool,
    config: &Config,
    user_id: i64,
) -> Result<(), AppError> {
    let now = Utc::now();

    let existing = find_refresh_token(pool, user_id).await?;
    if existing.is_some_and(|record| check_refresh_token_validity(record.expires_at, now)) {
        return Ok(());
    }

    let token = sign_refresh_token(
        user_id,
        &config.jwt_refresh_secret,
        config.refresh_token_ttl_days,
    )?;
    let expires_at = now + Duration::days(config.refresh_token_ttl_days);

    sqlx::query(
        r#"
        INSERT INTO user_refresh_tokens (user_id, token, expires_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (user_id)
        DO UPDATE SET token = EXCLUDED.token, expires_at = EXCLUDED.expires_at, created_at = NOW()
        "#,
    )
    .bind(user_id)
    .bind(&token)
    .bind(expires_at)
    .execute(pool)
    .await
    .map_err(|e| AppError::internal("Failed to store refresh token", e))?;

    tracing::info!(user_id, "Refresh token issued");
    Ok(())
}

/// Mints a new access token for the subject of a stale one, provided the
/// stored refresh token is still valid. The role is re-read from the user row.
pub async fn refresh_access_token(
    pool: &PgPool,
    config: &Config,
    stale: &Claims,
) -> Result<(String, Claims), AppError> {
    let user_id = stale.user_id()?;

    let record = find_refresh_token(pool, user_id)
        .await?
        .ok_or_else(|| AppError::AuthError("Refresh token not found".to_string()))?;

    if !check_refresh_token_validity(record.expires_at, Utc::now()) {
        tracing::info!(user_id, "Refresh token expired");
        return Err(AppError::AuthError("Refresh token expired".to_string()));
    }

    let role: String = sqlx::query_scalar("SELECT role FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::AuthError("User no longer exists".to_string()))?;

    let token = sign_access_token(
        user_id,
        &role,
        &config.jwt_access_secret,
        config.access_token_ttl,
    )?;
    let claims = verify_jwt(&token, &config.jwt_access_secret)?;

    Ok((token, claims))
}

pub async fn revoke_refresh_token(pool: &PgPool, user_id: i64) -> Result<(), AppError> {
    sqlx::query("DELETE FROM user_refresh_tokens WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}
