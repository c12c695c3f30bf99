//! Request identity, taken from the HS256 JWT in the `Authorization` header.
//!
//! The token is issued elsewhere; this service only verifies the signature and the expiry and
//! then passes the resulting `AuthUser` explicitly into every service call.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use jwt::VerifyWithKey;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::errors::AppError;
use crate::state::AppState;

pub const ROLE_BUSINESS: &str = "ROLE_BUSINESS";

/// The authenticated caller of the current request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthUser {
    pub username: String,
    pub role: String,
}

impl AuthUser {
    pub fn new(username: impl Into<String>, role: impl Into<String>) -> Self {
        AuthUser {
            username: username.into(),
            role: role.into(),
        }
    }

    pub fn is_business(&self) -> bool {
        self.role == ROLE_BUSINESS
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    username: String,
    role: String,
    /// Milliseconds since the epoch.
    exp: i64,
}

/// Verifies `token` with `secret` and returns the caller it identifies.
pub fn verify_token(token: &str, secret: &str, now: DateTime<Utc>) -> Result<AuthUser, AppError> {
    let invalid = || AppError::Forbidden("Invalid token".to_string());

    let key: Hmac<Sha256> = Hmac::new_from_slice(secret.as_bytes()).map_err(|_| invalid())?;
    let claims: Claims = token.verify_with_key(&key).map_err(|_| invalid())?;

    if claims.exp <= now.timestamp_millis() {
        return Err(AppError::Forbidden("Token expired".to_string()));
    }

    Ok(AuthUser {
        username: claims.username,
        role: claims.role,
    })
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AppError::Unauthorized)?
            .to_str()
            .map_err(|_| AppError::Forbidden("Invalid token".to_string()))?;
        let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();

        let user = verify_token(token, &state.config.secret_key, Utc::now())?;
        tracing::debug!(user = %user.username, "Authenticated request");
        Ok(user)
    }
}

#[cfg(test)]
pub(crate) fn sign_token(username: &str, role: &str, exp: DateTime<Utc>, secret: &str) -> String {
    use jwt::SignWithKey;
    use std::collections::BTreeMap;

    let key: Hmac<Sha256> = Hmac::new_from_slice(secret.as_bytes()).unwrap();
    let mut claims = BTreeMap::new();
    claims.insert("username", serde_json::json!(username));
    claims.insert("role", serde_json::json!(role));
    claims.insert("exp", serde_json::json!(exp.timestamp_millis()));
    claims.sign_with_key(&key).unwrap()
}
