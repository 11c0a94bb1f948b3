// src/models/otp.rs

use serde::Deserialize;
use sqlx::FromRow;
use validator::Validate;

use crate::models::user::validate_password_strength;

/// What a one-time code unlocks. Codes are keyed by (email, purpose).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpPurpose {
    Registration,
    PasswordReset,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::Registration => "registration",
            OtpPurpose::PasswordReset => "password_reset",
        }
    }

    pub fn subject(&self) -> &'static str {
        match self {
            OtpPurpose::Registration => "Verify your email",
            OtpPurpose::PasswordReset => "Password reset code",
        }
    }
}

/// Represents the 'user_otps' table.
#[derive(Debug, Clone, FromRow)]
pub struct OtpRecord {
    pub email: String,
    pub purpose: String,
    pub user_id: Option<i64>,
    pub code: String,
    pub attempts: i32,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EmailRequest {
    #[validate(email(message = "Invalid email"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyOtpRequest {
    #[validate(email(message = "Invalid email"))]
    pub email: String,
    #[validate(length(equal = 6, message = "OTP must be 6 digits"))]
    pub otp: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewPasswordRequest {
    #[validate(email(message = "Invalid email"))]
    pub email: String,
    #[validate(length(equal = 6, message = "OTP must be 6 digits"))]
    pub otp: String,
    #[validate(custom(function = validate_password_strength))]
    pub password: String,
    #[validate(must_match(other = "password", message = "Passwords do not match"))]
    pub confirm_password: String,
}
