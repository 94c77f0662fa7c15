//! In-process document store.
//!
//! Evaluates the same `Expr` language as the hosted store so the adapter can run
//! without network access (local development and tests). Ids are monotonically
//! increasing integers rendered as strings; timestamps are microseconds since the
//! epoch and strictly increase across writes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

use super::client::{StoreClient, StoreError, StoreResult, StoreValue};
use super::document::{DocRef, DocumentRecord, COLLECTIONS_CLASS, INDEXES_CLASS};
use super::query::{Expr, SetExpr};

#[derive(Debug, Clone)]
struct IndexDef {
    source: String,
    terms: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct State {
    collections: BTreeMap<String, BTreeMap<u64, DocumentRecord>>,
    indexes: BTreeMap<String, IndexDef>,
    next_id: u64,
    clock: i64,
}

/// Thread-safe in-memory store with a query counter.
///
/// Meant for local runs and tests. A batch is staged on a full copy of the
/// store state, so each batch costs time proportional to everything stored.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    calls: AtomicUsize,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    /// Number of queries received so far, including failed ones.
    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }

    /// Number of documents currently stored in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.state.read().collections.get(collection).map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool { self.len(collection) == 0 }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn query(&self, expr: &Expr) -> StoreResult<StoreValue> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        debug!(target: "chanchito::store", op = expr.label(), "memory query");
        let mut guard = self.state.write();
        if let Expr::Batch(_) = expr {
            // Evaluate against a copy so a failing element leaves nothing applied.
            let mut staged = guard.clone();
            let out = staged.eval(expr)?;
            *guard = staged;
            Ok(out)
        } else {
            guard.eval(expr)
        }
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn backend(&self) -> &'static str { "memory" }
}

impl State {
    fn tick(&mut self) -> i64 {
        let now = chrono::Utc::now().timestamp_micros();
        self.clock = now.max(self.clock + 1);
        self.clock
    }

    fn eval(&mut self, expr: &Expr) -> StoreResult<StoreValue> {
        match expr {
            Expr::Get(r) => self.doc(r).map(|d| StoreValue::Document(d.clone())),
            Expr::Exists(r) => Ok(StoreValue::Flag(self.exists(r))),
            Expr::Create { collection, data } => {
                if !self.collections.contains_key(collection) {
                    return Err(StoreError::NotFound(format!("collection {collection}")));
                }
                let ts = self.tick();
                self.next_id += 1;
                let id = self.next_id;
                let rec = DocumentRecord::new(DocRef::new(collection.clone(), id.to_string()), ts, data.clone());
                self.collections.entry(collection.clone()).or_default().insert(id, rec.clone());
                Ok(StoreValue::Document(rec))
            }
            Expr::Update { doc_ref, data } => {
                let ts = self.tick();
                let rec = self.doc_mut(doc_ref)?;
                merge(&mut rec.data, data);
                rec.ts = ts;
                Ok(StoreValue::Document(rec.clone()))
            }
            Expr::Delete(r) => {
                let id = parse_id(r)?;
                self.collections
                    .get_mut(&r.collection)
                    .and_then(|docs| docs.remove(&id))
                    .map(StoreValue::Document)
                    .ok_or_else(|| StoreError::NotFound(r.to_string()))
            }
            Expr::Page(set) => self.resolve(set).map(StoreValue::Documents),
            Expr::Count(set) => self.resolve(set).map(|docs| StoreValue::Count(docs.len() as u64)),
            Expr::EnsureCollection(name) => {
                self.collections.entry(name.clone()).or_default();
                Ok(StoreValue::Ref(DocRef::collection_def(name.clone())))
            }
            Expr::EnsureIndex { name, source, terms } => {
                if !self.collections.contains_key(source) {
                    return Err(StoreError::NotFound(format!("collection {source}")));
                }
                self.indexes
                    .entry(name.clone())
                    .or_insert_with(|| IndexDef { source: source.clone(), terms: terms.clone() });
                Ok(StoreValue::Ref(DocRef::index_def(name.clone())))
            }
            Expr::Batch(items) => items.iter().map(|e| self.eval(e)).collect::<StoreResult<Vec<_>>>().map(StoreValue::Batch),
        }
    }

    fn exists(&self, r: &DocRef) -> bool {
        match r.collection.as_str() {
            COLLECTIONS_CLASS => self.collections.contains_key(&r.id),
            INDEXES_CLASS => self.indexes.contains_key(&r.id),
            _ => self.doc(r).is_ok(),
        }
    }

    fn doc(&self, r: &DocRef) -> StoreResult<&DocumentRecord> {
        let id = parse_id(r)?;
        self.collections
            .get(&r.collection)
            .and_then(|docs| docs.get(&id))
            .ok_or_else(|| StoreError::NotFound(r.to_string()))
    }

    fn doc_mut(&mut self, r: &DocRef) -> StoreResult<&mut DocumentRecord> {
        let id = parse_id(r)?;
        self.collections
            .get_mut(&r.collection)
            .and_then(|docs| docs.get_mut(&id))
            .ok_or_else(|| StoreError::NotFound(r.to_string()))
    }

    fn resolve(&self, set: &SetExpr) -> StoreResult<Vec<DocumentRecord>> {
        match set {
            SetExpr::Documents(collection) => self
                .collections
                .get(collection)
                .map(|docs| docs.values().cloned().collect())
                .ok_or_else(|| StoreError::NotFound(format!("collection {collection}"))),
            SetExpr::Match { index, terms } => {
                let def = self.indexes.get(index).ok_or_else(|| StoreError::NotFound(format!("index {index}")))?;
                if terms.len() > def.terms.len() {
                    return Err(StoreError::Rejected {
                        code: "invalid argument".into(),
                        description: format!("index {index} has {} terms, got {}", def.terms.len(), terms.len()),
                    });
                }
                let docs = self.collections.get(&def.source).map(|d| d.values()).into_iter().flatten();
                Ok(docs
                    .filter(|d| terms.iter().zip(&def.terms).all(|(want, field)| d.data.get(field) == Some(want)))
                    .cloned()
                    .collect())
            }
        }
    }
}

fn parse_id(r: &DocRef) -> StoreResult<u64> {
    r.id.parse::<u64>().map_err(|_| StoreError::NotFound(r.to_string()))
}

/// Recursive update: nested objects merge, `null` removes a key, anything else replaces.
fn merge(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (k, v) in patch {
        if v.is_null() {
            target.remove(k);
            continue;
        }
        if let (Some(Value::Object(dst)), Value::Object(src)) = (target.get_mut(k), v) {
            merge(dst, src);
            continue;
        }
        target.insert(k.clone(), v.clone());
    }
}
