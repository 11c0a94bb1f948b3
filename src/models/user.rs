// src/models/user.rs

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

static STUDENT_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^202\d{6}$").expect("valid student number pattern"));

/// Represents the 'users' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,

    /// Institutional student number (e.g. 202312345). Admin accounts have none.
    pub student_number: Option<String>,

    pub username: String,

    /// Unique login email.
    pub email: String,

    /// Argon2 password hash.
    /// Skipped during serialization to prevent leaking sensitive data.
    #[serde(skip)]
    pub password: String,

    /// User role: 'student' or 'admin'.
    pub role: String,

    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Server-side record of a user's refresh token.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRecord {
    pub id: i64,
    pub user_id: i64,
    pub token: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// Profile returned to the owner.
#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user_id: i64,
    pub student_number: Option<String>,
    pub username: String,
    pub email: String,
    pub role: String,
}

impl From<User> for ProfileResponse {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            student_number: user.student_number,
            username: user.username,
            email: user.email,
            role: user.role,
        }
    }
}

/// DTO for registration. The OTP must have been requested through `/auth/verifyEmail`.
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(custom(function = validate_student_number))]
    pub student_number: String,
    #[validate(length(
        min = 3,
        max = 20,
        message = "Username length must be between 3 and 20 characters."
    ))]
    pub username: String,
    #[validate(email(message = "Invalid email"))]
    pub email: String,
    #[validate(custom(function = validate_password_strength))]
    pub password: String,
    #[validate(must_match(other = "password", message = "Passwords do not match"))]
    pub confirm_password: String,
    #[validate(length(equal = 6, message = "OTP must be 6 digits"))]
    pub otp: String,
}

/// DTO for user login.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email"))]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(
        min = 3,
        max = 20,
        message = "Username length must be between 3 and 20 characters."
    ))]
    pub username: String,
}

pub fn validate_student_number(value: &str) -> Result<(), validator::ValidationError> {
    if !STUDENT_NUMBER_RE.is_match(value) {
        return Err(validator::ValidationError::new("invalid_student_number"));
    }
    Ok(())
}

/// At least 8 ASCII alphanumerics with a lowercase letter, an uppercase letter and a digit.
pub fn validate_password_strength(value: &str) -> Result<(), validator::ValidationError> {
    if value.len() < 8 || value.len() > 128 {
        return Err(validator::ValidationError::new("password_length"));
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(validator::ValidationError::new("password_charset"));
    }
    let has_lower = value.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = value.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = value.chars().any(|c| c.is_ascii_digit());
    if !(has_lower && has_upper && has_digit) {
        return Err(validator::ValidationError::new("password_too_weak"));
    }
    Ok(())
}
