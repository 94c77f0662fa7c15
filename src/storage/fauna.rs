//! Hosted document store client (Fauna, FQL v4 JSON wire protocol).
//!
//! Every `Expr` becomes exactly one HTTP POST; the store evaluates each request as a
//! transaction. Failures are mapped onto `StoreError` and returned as-is.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::client::{StoreClient, StoreError, StoreResult, StoreValue};
use super::document::{DocRef, DocumentRecord};
use super::query::{Expr, Shape};

pub const DEFAULT_ENDPOINT: &str = "https://db.fauna.com";

/// Shared HTTP connection to the hosted store.
pub struct FaunaClient {
    http: reqwest::Client,
    endpoint: String,
    secret: String,
    closed: AtomicBool,
}

impl FaunaClient {
    /// Build the client. `timeout` bounds each query round trip.
    pub fn new(endpoint: impl Into<String>, secret: impl Into<String>, timeout: Duration) -> StoreResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Self { http, endpoint: endpoint.into(), secret: secret.into(), closed: AtomicBool::new(false) })
    }
}

#[async_trait]
impl StoreClient for FaunaClient {
    async fn query(&self, expr: &Expr) -> StoreResult<StoreValue> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        debug!(target: "chanchito::store", op = expr.label(), "fauna query");
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.secret)
            .header("X-FaunaDB-API-Version", "4")
            .json(&expr.to_fql())
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let status = resp.status();
        let body: Value = resp.json().await.map_err(|e| StoreError::Transport(format!("HTTP {status}: {e}")))?;
        if !status.is_success() {
            let err = decode_error(status.as_u16(), &body);
            warn!(target: "chanchito::store", op = expr.label(), status = status.as_u16(), "fauna query failed: {err}");
            return Err(err);
        }
        let resource = body
            .get("resource")
            .ok_or_else(|| StoreError::Decode("response without resource".into()))?;
        decode(resource, &expr.shape())
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn backend(&self) -> &'static str { "fauna" }
}

/// Map an `{"errors": [...]}` body onto the error taxonomy.
pub fn decode_error(status: u16, body: &Value) -> StoreError {
    let first = body.get("errors").and_then(|e| e.get(0));
    let code = first.and_then(|e| e.get("code")).and_then(Value::as_str).unwrap_or_default().to_string();
    let description = first
        .and_then(|e| e.get("description"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    match (status, code.as_str()) {
        (_, "instance not found") | (_, "invalid ref") | (404, _) => StoreError::NotFound(description),
        (_, "") => StoreError::Transport(format!("HTTP {status}")),
        _ => StoreError::Rejected { code, description },
    }
}

/// Decode a `resource` value into the shape its expression promises.
pub fn decode(v: &Value, shape: &Shape) -> StoreResult<StoreValue> {
    match shape {
        Shape::Document => decode_document(v).map(StoreValue::Document),
        Shape::Documents => {
            let page = v
                .get("data")
                .and_then(Value::as_array)
                .ok_or_else(|| StoreError::Decode("page without data".into()))?;
            page.iter().map(decode_document).collect::<StoreResult<Vec<_>>>().map(StoreValue::Documents)
        }
        Shape::Count => v.as_u64().map(StoreValue::Count).ok_or_else(|| StoreError::Decode(format!("count: {v}"))),
        Shape::Flag => v.as_bool().map(StoreValue::Flag).ok_or_else(|| StoreError::Decode(format!("flag: {v}"))),
        Shape::Ref => decode_ref(v).map(StoreValue::Ref),
        Shape::Batch(shapes) => {
            let items = v.as_array().ok_or_else(|| StoreError::Decode("batch result is not an array".into()))?;
            if items.len() != shapes.len() {
                return Err(StoreError::Decode(format!("batch of {} returned {} results", shapes.len(), items.len())));
            }
            items.iter().zip(shapes).map(|(item, s)| decode(item, s)).collect::<StoreResult<Vec<_>>>().map(StoreValue::Batch)
        }
    }
}

fn decode_document(v: &Value) -> StoreResult<DocumentRecord> {
    let doc_ref = decode_ref(v.get("ref").unwrap_or(&Value::Null))?;
    let ts = v.get("ts").and_then(Value::as_i64).ok_or_else(|| StoreError::Decode(format!("document {doc_ref} without ts")))?;
    let data = match v.get("data") {
        Some(Value::Object(m)) => m.clone(),
        None | Some(Value::Null) => Map::new(),
        Some(other) => return Err(StoreError::Decode(format!("document {doc_ref} data is {other}"))),
    };
    Ok(DocumentRecord::new(doc_ref, ts, data))
}

/// `{"@ref": {"id": "1", "collection": {"@ref": {"id": "users", ...}}}}` -> `users/1`.
fn decode_ref(v: &Value) -> StoreResult<DocRef> {
    let inner = v.get("@ref").ok_or_else(|| StoreError::Decode(format!("not a ref: {v}")))?;
    let id = inner.get("id").and_then(Value::as_str).ok_or_else(|| StoreError::Decode(format!("ref without id: {v}")))?;
    let collection = match inner.get("collection") {
        Some(parent) => decode_ref(parent)?.id,
        None => String::new(),
    };
    Ok(DocRef::new(collection, id))
}
