//! Request authentication
//!
//! Two schemes resolved from configuration: HTTP Basic checked against
//! argon2 password hashes, and `Authorization: Token <key>` checked against
//! the API key table. An instance configured with no credentials at all
//! runs open and reports every caller as `anonymous`.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::BTreeMap;

use crate::config::AuthConfig;
use crate::error::ApiError;
use crate::state::AppState;

/// Credential tables resolved from configuration.
#[derive(Debug, Default)]
pub struct AuthRegistry {
    /// Username to argon2 password hash
    users: BTreeMap<String, String>,
    /// API key to username
    api_keys: BTreeMap<String, String>,
}

impl AuthRegistry {
    pub fn from_config(config: &AuthConfig) -> Self {
        if config.is_empty() {
            tracing::warn!("Auth: no credentials configured, serving unauthenticated (dev mode)");
        } else {
            tracing::info!(
                users = config.users.len(),
                api_keys = config.api_keys.len(),
                "Auth: credentials loaded"
            );
        }
        AuthRegistry {
            users: config.users.clone(),
            api_keys: config.api_keys.clone(),
        }
    }

    /// Whether the instance runs without authentication.
    pub fn is_open(&self) -> bool {
        self.users.is_empty() && self.api_keys.is_empty()
    }

    fn verify_basic(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .is_some_and(|hash| verify_password(password, hash).unwrap_or(false))
    }

    fn username_for_api_key(&self, key: &str) -> Option<&str> {
        self.api_keys.get(key).map(String::as_str)
    }
}

/// Hash a password for the `users` table of the auth configuration.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a stored argon2 hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed = PasswordHash::new(hash)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// The authenticated principal of a request.
///
/// Extracting this rejects the request with 401 unless it carries valid
/// credentials or the instance runs open.
#[derive(Debug, Clone)]
pub struct Authenticated(pub String);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if state.auth.is_open() {
            return Ok(Authenticated("anonymous".into()));
        }

        let value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("missing Authorization header"))?;

        if let Some(encoded) = value.strip_prefix("Basic ") {
            let decoded = BASE64
                .decode(encoded.trim())
                .map_err(|_| ApiError::unauthorized("malformed Basic credentials"))?;
            let credentials = String::from_utf8(decoded)
                .map_err(|_| ApiError::unauthorized("malformed Basic credentials"))?;
            let (username, password) = credentials
                .split_once(':')
                .ok_or_else(|| ApiError::unauthorized("malformed Basic credentials"))?;
            if state.auth.verify_basic(username, password) {
                tracing::debug!(user = username, "authenticated via Basic");
                return Ok(Authenticated(username.to_owned()));
            }
            return Err(ApiError::unauthorized("invalid username or password"));
        }

        if let Some(key) = value.strip_prefix("Token ") {
            if let Some(user) = state.auth.username_for_api_key(key.trim()) {
                tracing::debug!(user = user, "authenticated via API key");
                return Ok(Authenticated(user.to_owned()));
            }
            return Err(ApiError::unauthorized("invalid API key"));
        }

        Err(ApiError::unauthorized("unsupported authorization scheme"))
    }
}
