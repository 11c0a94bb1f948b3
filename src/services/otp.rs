// src/services/otp.rs

use chrono::{Duration, Utc};
use rand::{Rng, thread_rng};
use sqlx::{PgConnection, PgPool};

use crate::{
    error::AppError,
    models::otp::{OtpPurpose, OtpRecord},
    services::mailer::Mailer,
};

pub const OTP_LENGTH: usize = 6;

/// Wrong guesses allowed before a code is thrown away.
pub const MAX_OTP_ATTEMPTS: i32 = 5;

/// Six random decimal digits, zero padded.
pub fn generate_otp() -> String {
    let code: u32 = thread_rng().gen_range(0..1_000_000);
    format!("{:0width$}", code, width = OTP_LENGTH)
}

/// Stores a fresh code for (email, purpose), replacing any previous one, then mails it.
///
/// The row is written before the mail goes out. A failed send leaves an unused
/// code behind that simply expires.
pub async fn issue_otp(
    pool: &PgPool,
    mailer: &dyn Mailer,
    email: &str,
    purpose: OtpPurpose,
    user_id: Option<i64>,
    ttl_secs: i64,
) -> Result<(), AppError> {
    let code = generate_otp();
    let expires_at = Utc::now() + Duration::seconds(ttl_secs);

    sqlx::query(
        r#"
        INSERT INTO user_otps (email, purpose, user_id, code, expires_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (email, purpose)
        DO UPDATE SET user_id = EXCLUDED.user_id, code = EXCLUDED.code,
                      expires_at = EXCLUDED.expires_at, created_at = NOW(),
                      attempts = 0
        "#,
    )
    .bind(email)
    .bind(purpose.as_str())
    .bind(user_id)
    .bind(&code)
    .bind(expires_at)
    .execute(pool)
    .await
    .map_err(|e| AppError::internal("Failed to store OTP", e))?;

    mailer.send_otp(email, &code, purpose).await?;

    tracing::info!(purpose = purpose.as_str(), "OTP issued");
    Ok(())
}

async fn load_otp(
    conn: &mut PgConnection,
    email: &str,
    purpose: OtpPurpose,
) -> Result<OtpRecord, AppError> {
    sqlx::query_as::<_, OtpRecord>(
        r#"
        SELECT email, purpose, user_id, code, attempts, expires_at
        FROM user_otps
        WHERE email = $1 AND purpose = $2
        "#,
    )
    .bind(email)
    .bind(purpose.as_str())
    .fetch_optional(conn)
    .await?
    .ok_or_else(|| AppError::NotFound("No OTP found for this email".to_string()))
}

#[derive(Debug, PartialEq, Eq)]
enum Rejection {
    Expired,
    WrongCode,
}

fn ensure_matches(record: &OtpRecord, code: &str) -> Result<(), Rejection> {
    if record.expires_at < Utc::now() {
        return Err(Rejection::Expired);
    }
    if record.code != code {
        return Err(Rejection::WrongCode);
    }
    Ok(())
}

pub fn attempts_exhausted(attempts: i32) -> bool {
    attempts >= MAX_OTP_ATTEMPTS
}

/// Counts a wrong guess and drops the code once the limit is hit.
///
/// Runs on the pool, not the caller's transaction, so the count survives the
/// rollback that follows the rejection.
async fn record_failed_attempt(
    pool: &PgPool,
    email: &str,
    purpose: OtpPurpose,
) -> Result<AppError, AppError> {
    let attempts: Option<i32> = sqlx::query_scalar(
        r#"
        UPDATE user_otps SET attempts = attempts + 1
        WHERE email = $1 AND purpose = $2
        RETURNING attempts
        "#,
    )
    .bind(email)
    .bind(purpose.as_str())
    .fetch_optional(pool)
    .await?;

    match attempts {
        Some(attempts) if attempts_exhausted(attempts) => {
            sqlx::query("DELETE FROM user_otps WHERE email = $1 AND purpose = $2 AND attempts >= $3")
                .bind(email)
                .bind(purpose.as_str())
                .bind(MAX_OTP_ATTEMPTS)
                .execute(pool)
                .await?;

            tracing::warn!(purpose = purpose.as_str(), attempts, "OTP discarded after repeated failures");
            Ok(AppError::AuthError(
                "Too many attempts, request a new code".to_string(),
            ))
        }
        _ => Ok(AppError::AuthError("Invalid OTP".to_string())),
    }
}

/// Checks a code without using it up. Wrong guesses are counted on `pool`.
pub async fn check_otp(
    pool: &PgPool,
    conn: &mut PgConnection,
    email: &str,
    purpose: OtpPurpose,
    code: &str,
) -> Result<OtpRecord, AppError> {
    let record = load_otp(conn, email, purpose).await?;
    match ensure_matches(&record, code) {
        Ok(()) => Ok(record),
        Err(Rejection::Expired) => Err(AppError::AuthError("OTP has expired".to_string())),
        Err(Rejection::WrongCode) => Err(record_failed_attempt(pool, email, purpose).await?),
    }
}

/// Checks and deletes a code. Meant to run inside the caller's transaction so
/// the code survives if the surrounding work rolls back.
pub async fn consume_otp(
    pool: &PgPool,
    conn: &mut PgConnection,
    email: &str,
    purpose: OtpPurpose,
    code: &str,
) -> Result<OtpRecord, AppError> {
    let record = check_otp(pool, &mut *conn, email, purpose, code).await?;

    sqlx::query("DELETE FROM user_otps WHERE email = $1 AND purpose = $2")
        .bind(email)
        .bind(purpose.as_str())
        .execute(&mut *conn)
        .await?;

    Ok(record)
}
