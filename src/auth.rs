//! Caller identity.
//!
//! Every session, article, goal and sort endpoint needs a user id. It is
//! resolved once per request by the [`AuthUser`] extractor using the
//! [`Authenticator`] built at startup from `[auth]`:
//!
//! - `header`: the id is taken from a trusted header (default `x-user-id`)
//!   set by the identity provider in front of the service.
//! - `jwt`: the caller sends `Authorization: Bearer <token>`, an HS256 JWT
//!   signed with the secret from `[auth].jwt_secret_env`. The id is the
//!   `sub` claim; `exp`, when present, must lie in the future.
//!
//! A request without a resolvable identity is rejected with 401.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::config::{AuthConfig, AuthMode};
use crate::error::ApiError;

const INVALID_USER: &str = "Invalid user id.";

/// Resolves the caller's user id from request headers.
pub enum Authenticator {
    Header(HeaderName),
    Jwt(Vec<u8>),
}

impl Authenticator {
    /// Build from configuration, reading the JWT secret from the
    /// environment once.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        match config.mode {
            AuthMode::Header => {
                let name = HeaderName::from_bytes(config.user_header.trim().as_bytes())
                    .map_err(|_| anyhow!("auth.user_header is not a valid header name"))?;
                Ok(Authenticator::Header(name))
            }
            AuthMode::Jwt => {
                let secret = std::env::var(&config.jwt_secret_env)
                    .ok()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        anyhow!("{} environment variable not set", config.jwt_secret_env)
                    })?;
                Ok(Authenticator::Jwt(secret.into_bytes()))
            }
        }
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<String, ApiError> {
        match self {
            Authenticator::Header(name) => headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| ApiError::Unauthorized(INVALID_USER.to_string())),
            Authenticator::Jwt(secret) => {
                let token = headers
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "))
                    .map(str::trim)
                    .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;
                verify_hs256(token, secret)
                    .map_err(|e| ApiError::Unauthorized(e.to_string()))
            }
        }
    }
}

#[derive(Deserialize)]
struct Claims {
    sub: Option<String>,
}

/// Verify an HS256 JWT and return its `sub` claim.
///
/// `exp` is optional; when present it must not have passed.
fn verify_hs256(token: &str, secret: &[u8]) -> Result<String> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims = HashSet::new();

    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => anyhow!("token expired"),
            ErrorKind::InvalidSignature => anyhow!("invalid token signature"),
            ErrorKind::InvalidAlgorithm => anyhow!("unsupported token algorithm"),
            _ => anyhow!("malformed token"),
        })?;

    data.claims
        .sub
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| anyhow!(INVALID_USER))
}

/// The authenticated caller's user id.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<Authenticator>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = Arc::<Authenticator>::from_ref(state);
        auth.authenticate(&parts.headers).map(AuthUser)
    }
}
