// src/config.rs

use std::env;
use dotenvy::dotenv;

/// Statement timeout applied inside multi-step workflow transactions.
pub const WORKFLOW_STATEMENT_TIMEOUT: &str = "15s";

/// Request body limit for chapter uploads.
pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Name of the HTTP-only cookie carrying the access token.
pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub jwt_access_secret: String,
    pub jwt_refresh_secret: String,
    /// Access token lifetime in seconds.
    pub access_token_ttl: u64,
    /// Refresh token lifetime in days.
    pub refresh_token_ttl_days: i64,
    pub otp_ttl_secs: i64,
    pub signed_url_ttl_secs: u64,
    pub cookie_secure: bool,
    pub cors_origins: Vec<String>,
    pub rust_log: String,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub s3: Option<S3Settings>,
    pub smtp: Option<SmtpSettings>,
}

#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible stores (MinIO etc).
    pub endpoint: Option<url::Url>,
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set");

        let jwt_access_secret = env::var("JWT_ACCESS_SECRET")
            .expect("JWT_ACCESS_SECRET must be set");

        let jwt_refresh_secret = env::var("JWT_REFRESH_SECRET")
            .expect("JWT_REFRESH_SECRET must be set");

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let cors_origins = env::var("CORS_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_else(|_| vec!["http://localhost:5173".to_string()]);

        let s3 = env::var("S3_BUCKET").ok().map(|bucket| S3Settings {
            bucket,
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            endpoint: env::var("S3_ENDPOINT")
                .ok()
                .map(|e| url::Url::parse(&e).expect("S3_ENDPOINT must be a valid URL")),
        });

        let smtp = env::var("SMTP_HOST").ok().map(|host| SmtpSettings {
            host,
            username: env::var("SMTP_USER").ok(),
            password: env::var("SMTP_PASS").ok(),
            from: env::var("SMTP_FROM").unwrap_or_else(|_| "no-reply@localhost".to_string()),
        });

        Self {
            database_url,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            jwt_access_secret,
            jwt_refresh_secret,
            access_token_ttl: parse_or("ACCESS_TOKEN_TTL_SECS", 15 * 60),
            refresh_token_ttl_days: parse_or("REFRESH_TOKEN_TTL_DAYS", 30),
            otp_ttl_secs: parse_or("OTP_TTL_SECS", 10 * 60),
            signed_url_ttl_secs: parse_or("SIGNED_URL_TTL_SECS", 60 * 60),
            cookie_secure: parse_or("COOKIE_SECURE", true),
            cors_origins,
            rust_log,
            admin_email: env::var("ADMIN_EMAIL").ok(),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
            s3,
            smtp,
        }
    }

    /// Configuration for tests and local tooling: in-memory storage, log mailer.
    pub fn for_tests(database_url: &str) -> Self {
        Self {
            database_url: database_url.to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            jwt_access_secret: "test_access_secret".to_string(),
            jwt_refresh_secret: "test_refresh_secret".to_string(),
            access_token_ttl: 600,
            refresh_token_ttl_days: 30,
            otp_ttl_secs: 600,
            signed_url_ttl_secs: 3600,
            cookie_secure: false,
            cors_origins: vec![],
            rust_log: "error".to_string(),
            admin_email: None,
            admin_password: None,
            s3: None,
            smtp: None,
        }
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
