// src/utils/jwt.rs

use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{
    DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use tower_cookies::{
    Cookie, Cookies,
    cookie::{SameSite, time::Duration as CookieDuration},
};

use crate::{
    config::{ACCESS_TOKEN_COOKIE, Config},
    error::AppError,
    services::session,
    state::AppState,
};

/// Access token claims.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Claims {
    /// Subject - Stores the User ID (as string).
    pub sub: String,
    /// User's role ('student' or 'admin').
    pub role: String,
    pub iat: usize,
    /// Expiration time as Unix timestamp.
    pub exp: usize,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64, AppError> {
        self.sub
            .parse::<i64>()
            .map_err(|_| AppError::AuthError("Invalid token subject".to_string()))
    }
}

/// Refresh token claims. The token itself is also stored server side.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RefreshClaims {
    pub sub: String,
    /// Random id so two tokens minted in the same second differ.
    pub jti: String,
    pub exp: usize,
}

/// Outcome of checking an access token signature and expiry.
#[derive(Debug)]
pub enum AccessToken {
    Valid(Claims),
    /// Correctly signed but past `exp`; eligible for a refresh.
    Expired(Claims),
}

fn now_secs() -> Result<usize, AppError> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .as_secs() as usize)
}

/// Signs a short-lived access token for the user.
pub fn sign_access_token(
    id: i64,
    role: &str,
    secret: &str,
    expiration_seconds: u64,
) -> Result<String, AppError> {
    let now = now_secs()?;

    let claims = Claims {
        sub: id.to_string(),
        role: role.to_owned(),
        iat: now,
        exp: now + expiration_seconds as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalServerError(e.to_string()))
}

/// Signs a long-lived refresh token.
pub fn sign_refresh_token(id: i64, secret: &str, expiration_days: i64) -> Result<String, AppError> {
    let claims = RefreshClaims {
        sub: id.to_string(),
        jti: uuid::Uuid::new_v4().to_string(),
        exp: now_secs()? + (expiration_days.max(0) as usize) * 24 * 60 * 60,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalServerError(e.to_string()))
}

/// Verifies an access token, telling expired tokens apart from invalid ones.
pub fn inspect_access_token(token: &str, secret: &str) -> Result<AccessToken, AppError> {
    let key = DecodingKey::from_secret(secret.as_bytes());

    match decode::<Claims>(token, &key, &Validation::default()) {
        Ok(data) => Ok(AccessToken::Valid(data.claims)),
        Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
            let mut validation = Validation::default();
            validation.validate_exp = false;
            let data = decode::<Claims>(token, &key, &validation)
                .map_err(|_| AppError::AuthError("Invalid token".to_string()))?;
            Ok(AccessToken::Expired(data.claims))
        }
        Err(_) => Err(AppError::AuthError("Invalid token".to_string())),
    }
}

/// Verifies a token and rejects expired ones outright.
pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    match inspect_access_token(token, secret)? {
        AccessToken::Valid(claims) => Ok(claims),
        AccessToken::Expired(_) => Err(AppError::AuthError("Access token expired".to_string())),
    }
}

/// Reads the access token from the cookie, falling back to `Authorization: Bearer`.
pub fn extract_token(cookies: &Cookies, headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = cookies.get(ACCESS_TOKEN_COOKIE) {
        return Some(cookie.value().to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Stores the access token in an HTTP-only cookie.
///
/// The cookie outlives the token so an expired token still reaches the
/// server and can be exchanged through the refresh path.
pub fn set_access_cookie(cookies: &Cookies, config: &Config, token: String) {
    let cookie = Cookie::build((ACCESS_TOKEN_COOKIE, token))
        .http_only(true)
        .secure(config.cookie_secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(CookieDuration::days(config.refresh_token_ttl_days))
        .build();
    cookies.add(cookie);
}

pub fn clear_access_cookie(cookies: &Cookies) {
    cookies.remove(Cookie::build((ACCESS_TOKEN_COOKIE, "")).path("/").build());
}

/// Axum Middleware: Authentication.
///
/// Validates the access token and injects `Claims` into the request extensions.
/// An expired token is exchanged for a fresh one when the user's stored
/// refresh token is still valid; the new token replaces the cookie.
pub async fn auth_middleware(
    State(state): State<AppState>,
    cookies: Cookies,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(&cookies, req.headers())
        .ok_or_else(|| AppError::AuthError("Missing access token".to_string()))?;

    let claims = match inspect_access_token(&token, &state.config.jwt_access_secret)? {
        AccessToken::Valid(claims) => claims,
        AccessToken::Expired(stale) => {
            let (fresh_token, claims) =
                session::refresh_access_token(&state.pool, &state.config, &stale).await?;
            set_access_cookie(&cookies, &state.config, fresh_token);
            tracing::debug!(user_id = %claims.sub, "Access token refreshed by middleware");
            claims
        }
    };

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Axum Middleware: Admin Authorization.
///
/// Must be used AFTER `auth_middleware`. Checks if the injected `Claims` has 'admin' role.
pub async fn admin_middleware(req: Request<Body>, next: Next) -> Result<Response, AppError> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .ok_or_else(|| AppError::AuthError("Missing access token".to_string()))?;

    if claims.role != "admin" {
        return Err(AppError::Forbidden("Admin access required".to_string()));
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit_test_secret";

    #[test]
    fn test_access_token_round_trip() {
        let token = sign_access_token(42, "student", SECRET, 900).unwrap();
        let claims = verify_jwt(&token, SECRET).unwrap();
        assert_eq!(claims.user_id().unwrap(), 42);
        assert_eq!(claims.role, "student");
        assert_eq!(claims.exp - claims.iat, 900);
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let token = sign_access_token(1, "student", SECRET, 900).unwrap();
        assert!(matches!(
            inspect_access_token(&token, "other_secret"),
            Err(AppError::AuthError(_))
        ));
    }

    #[test]
    fn test_expired_token_is_recognised() {
        let now = now_secs().unwrap();
        let claims = Claims {
            sub: "7".to_string(),
            role: "student".to_string(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        match inspect_access_token(&token, SECRET).unwrap() {
            AccessToken::Expired(stale) => assert_eq!(stale.sub, "7"),
            AccessToken::Valid(_) => panic!("token should be expired"),
        }
        assert!(verify_jwt(&token, SECRET).is_err());
    }

    #[test]
    fn test_refresh_tokens_are_unique() {
        let a = sign_refresh_token(1, SECRET, 30).unwrap();
        let b = sign_refresh_token(1, SECRET, 30).unwrap();
        assert_ne!(a, b);
    }
}
