//! Unified HTTP error model.
//! Module errors (`StoreError`, `AuthError`, `ValidationError`) convert into `AppError`
//! at the handler boundary, which renders them as `{"status":"error","code","message"}`.

use std::fmt::{Display, Formatter};

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{error, warn};

use crate::identity::AuthError;
use crate::resource::schema::{FieldError, ValidationError};
use crate::storage::StoreError;

#[derive(Debug, Clone)]
pub enum AppError {
    UserInput { code: String, message: String },
    Auth { code: String, message: String },
    NotFound { code: String, message: String },
    Validation { code: String, message: String, errors: Vec<FieldError> },
    Store { code: String, message: String },
    Upstream { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::Auth { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Validation { code, .. }
            | AppError::Store { code, .. }
            | AppError::Upstream { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::Auth { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Validation { message, .. }
            | AppError::Store { message, .. }
            | AppError::Upstream { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn auth<S: Into<String>>(code: S, msg: S) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn store<S: Into<String>>(code: S, msg: S) -> Self { AppError::Store { code: code.into(), message: msg.into() } }
    pub fn upstream<S: Into<String>>(code: S, msg: S) -> Self { AppError::Upstream { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::UserInput { .. } => 400,
            AppError::Auth { .. } => 401,
            AppError::NotFound { .. } => 404,
            AppError::Validation { .. } => 422,
            AppError::Store { .. } => 502,
            AppError::Upstream { .. } => 502,
            AppError::Internal { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(target: "chanchito::http", code = self.code_str(), "{}", self.message());
        } else {
            warn!(target: "chanchito::http", code = self.code_str(), status = status.as_u16(), "{}", self.message());
        }
        let mut body = serde_json::json!({
            "status": "error",
            "code": self.code_str(),
            "message": self.message(),
        });
        if let AppError::Validation { errors, .. } = &self {
            body["errors"] = serde_json::to_value(errors).unwrap_or_default();
        }
        let mut resp = (status, Json(body)).into_response();
        if matches!(self, AppError::Auth { .. }) {
            resp.headers_mut().insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        resp
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation { code: "validation_error".into(), message: err.to_string(), errors: err.errors }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        match err {
            StoreError::NotFound(_) => AppError::not_found("not_found".into(), message),
            StoreError::BatchMismatch { .. } => AppError::Validation { code: "batch_mismatch".into(), message, errors: Vec::new() },
            StoreError::Rejected { code, .. } => AppError::Store { code: code.replace(' ', "_"), message },
            StoreError::Transport(_) => AppError::store("store_unavailable".into(), message),
            StoreError::Decode(_) => AppError::store("store_response".into(), message),
            StoreError::Closed => AppError::store("store_closed".into(), message),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        let message = err.to_string();
        match err {
            AuthError::InvalidClaims(_) => AppError::Validation { code: "invalid_claims".into(), message, errors: Vec::new() },
            AuthError::Provider(_) => AppError::upstream("identity_provider".into(), message),
            AuthError::NotConfigured(_) => AppError::internal("not_configured".into(), message),
            _ => AppError::auth("unauthorized".into(), message),
        }
    }
}
