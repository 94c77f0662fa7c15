//! CRUD routes for one resource.
//!
//! `/<name>`            GET list (optionally index-filtered), POST create
//! `/<name>/count`      GET count
//! `/<name>/batch`      POST create many, PUT update many, DELETE delete many
//! `/<name>/fetch`      POST get many
//! `/<name>/{ref}`      GET, PUT, DELETE one document

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::routing::{get, post};
use axum::{middleware, Router};

use crate::error::AppResult;
use crate::identity::{require_bearer, AccessGate};
use crate::resource::{RawRequest, Reply, ResourceAdapter};

type PathParams = Path<Vec<(String, String)>>;

/// Routes for `adapter`, gated when `gate` is given.
pub fn routes<S>(adapter: ResourceAdapter, gate: Option<AccessGate>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let name = adapter.collection().to_string();
    let mut router = Router::new()
        .route(&format!("/{name}"), get(list).post(create))
        .route(&format!("/{name}/count"), get(count))
        .route(&format!("/{name}/batch"), post(create_batch).put(update_batch).delete(delete_batch))
        .route(&format!("/{name}/fetch"), post(fetch))
        .route(&format!("/{name}/{{ref}}"), get(get_one).put(update).delete(delete));
    if let Some(gate) = gate {
        router = router.route_layer(middleware::from_fn_with_state(gate, require_bearer));
    }
    router.with_state(adapter)
}

fn query_pairs(raw: Option<String>) -> Vec<(String, String)> {
    raw.map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect()).unwrap_or_default()
}

async fn list(State(a): State<ResourceAdapter>, RawQuery(q): RawQuery) -> AppResult<Reply> {
    let query = query_pairs(q);
    a.list(RawRequest { query: &query, ..Default::default() }).await
}

async fn count(State(a): State<ResourceAdapter>, RawQuery(q): RawQuery) -> AppResult<Reply> {
    let query = query_pairs(q);
    a.count(RawRequest { query: &query, ..Default::default() }).await
}

async fn create(State(a): State<ResourceAdapter>, RawQuery(q): RawQuery, body: Bytes) -> AppResult<Reply> {
    let query = query_pairs(q);
    a.create(RawRequest { query: &query, path: &[], body: &body }).await
}

async fn create_batch(State(a): State<ResourceAdapter>, RawQuery(q): RawQuery, body: Bytes) -> AppResult<Reply> {
    let query = query_pairs(q);
    a.create_batch(RawRequest { query: &query, path: &[], body: &body }).await
}

async fn update_batch(State(a): State<ResourceAdapter>, RawQuery(q): RawQuery, body: Bytes) -> AppResult<Reply> {
    let query = query_pairs(q);
    a.update_batch(RawRequest { query: &query, path: &[], body: &body }).await
}

async fn delete_batch(State(a): State<ResourceAdapter>, RawQuery(q): RawQuery, body: Bytes) -> AppResult<Reply> {
    let query = query_pairs(q);
    a.delete_batch(RawRequest { query: &query, path: &[], body: &body }).await
}

async fn fetch(State(a): State<ResourceAdapter>, RawQuery(q): RawQuery, body: Bytes) -> AppResult<Reply> {
    let query = query_pairs(q);
    a.fetch(RawRequest { query: &query, path: &[], body: &body }).await
}

async fn get_one(State(a): State<ResourceAdapter>, Path(path): PathParams, RawQuery(q): RawQuery) -> AppResult<Reply> {
    let query = query_pairs(q);
    a.get(RawRequest { query: &query, path: &path, body: &[] }).await
}

async fn update(State(a): State<ResourceAdapter>, Path(path): PathParams, RawQuery(q): RawQuery, body: Bytes) -> AppResult<Reply> {
    let query = query_pairs(q);
    a.update(RawRequest { query: &query, path: &path, body: &body }).await
}

async fn delete(State(a): State<ResourceAdapter>, Path(path): PathParams, RawQuery(q): RawQuery) -> AppResult<Reply> {
    let query = query_pairs(q);
    a.delete(RawRequest { query: &query, path: &path, body: &[] }).await
}
