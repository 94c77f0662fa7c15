use std::time::Instant;

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Runs the request inside a span keyed by a request id and echoes the id back.
/// A well-formed incoming `x-request-id` is reused; otherwise a v4 uuid is minted.
pub async fn request_id(req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let span = info_span!(target: "chanchito::http", "request", id = %id, method = %req.method(), path = %req.uri().path());

    let started = Instant::now();
    let mut resp = next.run(req).instrument(span.clone()).await;
    span.in_scope(|| {
        info!(target: "chanchito::http", status = resp.status().as_u16(), elapsed_ms = started.elapsed().as_millis() as u64, "done");
    });
    if let Ok(v) = HeaderValue::from_str(&id) {
        resp.headers_mut().insert(X_REQUEST_ID, v);
    }
    resp
}
