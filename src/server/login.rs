//! Login routes: code exchange, plus three endpoints that only answer to a
//! caller holding a valid bearer token.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{middleware, Extension, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::error::{AppError, AppResult};
use crate::identity::{bearer_token, require_bearer, AuthError, Claims};

pub fn routes(state: AppState) -> Router {
    let gated = Router::new()
        .route("/login", get(hello))
        .route("/user/", get(user))
        .route("/user", get(user))
        .route_layer(middleware::from_fn_with_state(state.gate.clone(), require_bearer));

    Router::new()
        .route("/login/token", get(token))
        .route("/access/", get(access))
        .route("/access", get(access))
        .with_state(state)
        .merge(gated)
}

async fn token(State(state): State<AppState>, Query(params): Query<HashMap<String, String>>) -> AppResult<Json<Value>> {
    let code = params
        .get("code")
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::user("missing_code", "query parameter 'code' is required"))?;
    let oauth = state
        .oauth
        .as_ref()
        .ok_or_else(|| AuthError::NotConfigured("authorization-code exchange".into()))?;
    Ok(Json(oauth.exchange(code).await?))
}

async fn hello() -> Json<&'static str> { Json("Hello") }

#[derive(Deserialize)]
struct AccessUser {
    sub: String,
}

async fn access(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let token = bearer_token(&headers)?;
    let user: AccessUser = state.gate.extract_claim(token).await?;
    Ok(Json(json!({ "message": "Hello", "sub": user.sub })))
}

/// Greets the caller by the name carried in an ID token.
async fn user(Extension(claims): Extension<Claims>) -> AppResult<Json<String>> {
    if claims.token_use.as_deref() != Some("id") {
        return Err(AppError::auth("unauthorized", "an ID token is required"));
    }
    Ok(Json(format!("Hello, {}", claims.display_name())))
}
