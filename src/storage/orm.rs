//! CRUD surface over a `SharedStore`.
//!
//! One interface, two batch strategies selected by configuration:
//! - `Transactional` sends a batch as a single array expression; the store applies all
//!   elements or none.
//! - `Direct` sends one query per element, in order, and stops at the first failure.
//!   Elements before the failure stay applied.
//!
//! Single-document operations behave identically in both modes. Batch results are
//! always in input order.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde_json::{Map, Value};
use tracing::debug;

use super::client::{StoreError, StoreResult, StoreValue};
use super::document::{DocRef, DocumentRecord};
use super::query::{Expr, SetExpr};
use super::SharedStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    #[default]
    Transactional,
    Direct,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transactional" | "txn" => Ok(ExecutionMode::Transactional),
            "direct" => Ok(ExecutionMode::Direct),
            other => Err(format!("unknown execution mode '{other}'")),
        }
    }
}

impl Display for ExecutionMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self { ExecutionMode::Transactional => "transactional", ExecutionMode::Direct => "direct" })
    }
}

#[derive(Clone)]
pub struct Orm {
    store: SharedStore,
    mode: ExecutionMode,
}

impl Orm {
    pub fn new(store: SharedStore, mode: ExecutionMode) -> Self { Self { store, mode } }

    pub async fn create_one(&self, collection: &str, instance: Map<String, Value>) -> StoreResult<DocumentRecord> {
        self.store.query(&Expr::Create { collection: collection.to_string(), data: instance }).await?.into_document()
    }

    pub async fn create_many(&self, collection: &str, instances: Vec<Map<String, Value>>) -> StoreResult<Vec<DocumentRecord>> {
        let exprs = instances
            .into_iter()
            .map(|data| Expr::Create { collection: collection.to_string(), data })
            .collect();
        documents(self.run_batch(exprs).await?)
    }

    pub async fn get_one(&self, doc_ref: &DocRef) -> StoreResult<DocumentRecord> {
        self.store.query(&Expr::Get(doc_ref.clone())).await?.into_document()
    }

    /// One record per reference, in input order. Any absent reference fails the whole call.
    pub async fn get_many(&self, refs: &[DocRef]) -> StoreResult<Vec<DocumentRecord>> {
        documents(self.run_batch(refs.iter().cloned().map(Expr::Get).collect()).await?)
    }

    pub async fn update_one(&self, doc_ref: &DocRef, instance: Map<String, Value>) -> StoreResult<DocumentRecord> {
        self.store.query(&Expr::Update { doc_ref: doc_ref.clone(), data: instance }).await?.into_document()
    }

    /// Pairs `refs[i]` with `instances[i]`.
    pub async fn update_many(&self, refs: &[DocRef], instances: Vec<Map<String, Value>>) -> StoreResult<Vec<DocumentRecord>> {
        if refs.len() != instances.len() {
            return Err(StoreError::BatchMismatch { refs: refs.len(), instances: instances.len() });
        }
        let exprs = refs
            .iter()
            .cloned()
            .zip(instances)
            .map(|(doc_ref, data)| Expr::Update { doc_ref, data })
            .collect();
        documents(self.run_batch(exprs).await?)
    }

    /// Returns the record as it was before deletion.
    pub async fn delete_one(&self, doc_ref: &DocRef) -> StoreResult<DocumentRecord> {
        self.store.query(&Expr::Delete(doc_ref.clone())).await?.into_document()
    }

    pub async fn delete_many(&self, refs: &[DocRef]) -> StoreResult<Vec<DocumentRecord>> {
        documents(self.run_batch(refs.iter().cloned().map(Expr::Delete).collect()).await?)
    }

    /// Documents matched by `index`, in index order. `None` terms returns the whole index.
    pub async fn query_by_index(&self, collection: &str, index: &str, terms: Option<Vec<Value>>) -> StoreResult<Vec<DocumentRecord>> {
        debug!(target: "chanchito::orm", collection, index, "query_by_index");
        let set = SetExpr::Match { index: index.to_string(), terms: terms.unwrap_or_default() };
        self.store.query(&Expr::Page(set)).await?.into_documents()
    }

    /// Every document in `collection`, in reference order.
    pub async fn list(&self, collection: &str) -> StoreResult<Vec<DocumentRecord>> {
        self.store.query(&Expr::Page(SetExpr::Documents(collection.to_string()))).await?.into_documents()
    }

    /// Run an arbitrary expression that evaluates to zero or more documents.
    pub async fn big_query(&self, query: &Expr) -> StoreResult<Vec<DocumentRecord>> {
        match self.store.query(query).await? {
            StoreValue::Document(d) => Ok(vec![d]),
            other => other.into_documents(),
        }
    }

    /// Run an expression expected to yield at most one document.
    pub async fn query_one(&self, query: &Expr) -> StoreResult<Option<DocumentRecord>> {
        match self.store.query(query).await {
            Ok(StoreValue::Document(d)) => Ok(Some(d)),
            Ok(StoreValue::Documents(mut docs)) => match docs.len() {
                0 => Ok(None),
                1 => Ok(docs.pop()),
                n => Err(StoreError::Decode(format!("expected at most one document, got {n}"))),
            },
            Ok(other) => other.into_document().map(Some),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn query_count(&self, query: SetExpr) -> StoreResult<u64> {
        self.store.query(&Expr::Count(query)).await?.into_count()
    }

    pub async fn collection_exists(&self, collection: &str) -> StoreResult<bool> {
        self.store.query(&Expr::Exists(DocRef::collection_def(collection))).await?.into_flag()
    }

    /// Creating an existing collection returns its reference.
    pub async fn create_collection(&self, collection: &str) -> StoreResult<DocRef> {
        self.store.query(&Expr::EnsureCollection(collection.to_string())).await?.into_ref()
    }

    /// Creating an existing index returns its reference; the stored definition is kept.
    pub async fn create_index(&self, collection: &str, index: &str, terms: Option<Vec<String>>) -> StoreResult<DocRef> {
        let expr = Expr::EnsureIndex { name: index.to_string(), source: collection.to_string(), terms: terms.unwrap_or_default() };
        self.store.query(&expr).await?.into_ref()
    }

    async fn run_batch(&self, exprs: Vec<Expr>) -> StoreResult<Vec<StoreValue>> {
        if exprs.is_empty() {
            return Ok(Vec::new());
        }
        debug!(target: "chanchito::orm", mode = %self.mode, size = exprs.len(), "batch");
        match self.mode {
            ExecutionMode::Transactional => self.store.query(&Expr::Batch(exprs)).await?.into_batch(),
            ExecutionMode::Direct => {
                let mut out = Vec::with_capacity(exprs.len());
                for expr in &exprs {
                    out.push(self.store.query(expr).await?);
                }
                Ok(out)
            }
        }
    }
}

fn documents(values: Vec<StoreValue>) -> StoreResult<Vec<DocumentRecord>> {
    values.into_iter().map(StoreValue::into_document).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing() {
        assert_eq!("direct".parse::<ExecutionMode>().unwrap(), ExecutionMode::Direct);
        assert_eq!(" Transactional ".parse::<ExecutionMode>().unwrap(), ExecutionMode::Transactional);
        assert!("eventual".parse::<ExecutionMode>().is_err());
        assert_eq!(ExecutionMode::default().to_string(), "transactional");
    }
}
