//! The store-client seam: one async call that evaluates an `Expr`.

use async_trait::async_trait;
use thiserror::Error;

use super::document::{DocRef, DocumentRecord};
use super::query::Expr;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failures surfaced by a document store. Nothing here is retried.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Referenced document, collection or index does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The store refused the query (conflict, quota, validation, permissions).
    #[error("store rejected query ({code}): {description}")]
    Rejected { code: String, description: String },

    /// Batch inputs of different lengths.
    #[error("batch mismatch: {refs} refs for {instances} instances")]
    BatchMismatch { refs: usize, instances: usize },

    /// Network or HTTP-level failure talking to the store.
    #[error("store transport error: {0}")]
    Transport(String),

    /// The store answered with a value of an unexpected shape.
    #[error("unexpected store response: {0}")]
    Decode(String),

    /// The client was shut down.
    #[error("store client is shut down")]
    Closed,
}

/// A decoded query result.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreValue {
    Document(DocumentRecord),
    Documents(Vec<DocumentRecord>),
    Count(u64),
    Flag(bool),
    Ref(DocRef),
    Batch(Vec<StoreValue>),
}

impl StoreValue {
    fn kind(&self) -> &'static str {
        match self {
            StoreValue::Document(_) => "document",
            StoreValue::Documents(_) => "documents",
            StoreValue::Count(_) => "count",
            StoreValue::Flag(_) => "flag",
            StoreValue::Ref(_) => "ref",
            StoreValue::Batch(_) => "batch",
        }
    }

    fn mismatch(&self, wanted: &str) -> StoreError {
        StoreError::Decode(format!("expected {wanted}, got {}", self.kind()))
    }

    pub fn into_document(self) -> StoreResult<DocumentRecord> {
        match self { StoreValue::Document(d) => Ok(d), other => Err(other.mismatch("document")) }
    }

    pub fn into_documents(self) -> StoreResult<Vec<DocumentRecord>> {
        match self { StoreValue::Documents(d) => Ok(d), other => Err(other.mismatch("documents")) }
    }

    pub fn into_count(self) -> StoreResult<u64> {
        match self { StoreValue::Count(n) => Ok(n), other => Err(other.mismatch("count")) }
    }

    pub fn into_flag(self) -> StoreResult<bool> {
        match self { StoreValue::Flag(b) => Ok(b), other => Err(other.mismatch("flag")) }
    }

    pub fn into_ref(self) -> StoreResult<DocRef> {
        match self { StoreValue::Ref(r) => Ok(r), other => Err(other.mismatch("ref")) }
    }

    pub fn into_batch(self) -> StoreResult<Vec<StoreValue>> {
        match self { StoreValue::Batch(v) => Ok(v), other => Err(other.mismatch("batch")) }
    }
}

/// A long-lived, thread-safe connection to a document store.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Evaluate one expression. A `Batch` is evaluated atomically.
    async fn query(&self, expr: &Expr) -> StoreResult<StoreValue>;

    /// Stop accepting queries. Called once after the HTTP server has drained.
    async fn shutdown(&self);

    /// Backend name for startup logs.
    fn backend(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_reject_wrong_shape() {
        assert_eq!(StoreValue::Count(3).into_count().unwrap(), 3);
        let err = StoreValue::Flag(true).into_document().unwrap_err();
        assert!(matches!(err, StoreError::Decode(ref m) if m.contains("flag")));
    }
}
