//! Access Gate: `Authorization: Bearer <token>` → verified `Claims`.
//!
//! The gate keeps no state of its own; the verifier behind it may cache signing keys.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::{AuthError, Claims, TokenVerifier};
use crate::error::AppError;

const MAX_AUTH_HEADER_BYTES: usize = 8 * 1024;

#[derive(Clone)]
pub struct AccessGate {
    verifier: Arc<dyn TokenVerifier>,
}

impl AccessGate {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self { Self { verifier } }

    pub async fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        let payload = self.verifier.verify(token).await?;
        Claims::from_payload(payload)
    }

    /// Validate, then deserialize the payload into `T`.
    pub async fn extract_claim<T: DeserializeOwned>(&self, token: &str) -> Result<T, AuthError> {
        let payload = self.verifier.verify(token).await?;
        serde_json::from_value(Value::Object(payload)).map_err(|e| AuthError::InvalidClaims(e.to_string()))
    }

    pub async fn authorize(&self, headers: &HeaderMap) -> Result<Claims, AuthError> {
        let token = bearer_token(headers)?;
        let claims = self.validate(token).await?;
        debug!(target: "chanchito::identity", sub = %claims.sub, "authorized");
        Ok(claims)
    }
}

/// The token from `Authorization: Bearer <token>`. The scheme is case-insensitive.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let raw = headers.get(header::AUTHORIZATION).ok_or(AuthError::MissingCredential)?;
    if raw.len() > MAX_AUTH_HEADER_BYTES {
        return Err(AuthError::Malformed("authorization header too large".into()));
    }
    let text = raw.to_str().map_err(|_| AuthError::Malformed("authorization header is not ASCII".into()))?;
    let mut parts = text.trim().splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::Malformed("expected 'Bearer <token>'".into()));
    }
    Ok(token)
}

/// Route layer: rejects the request unless it carries a valid bearer token, and
/// makes the caller's `Claims` available as a request extension.
pub async fn require_bearer(State(gate): State<AccessGate>, mut req: Request, next: Next) -> Result<Response, AppError> {
    let claims = gate.authorize(req.headers()).await?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
