//! Store query expressions.
//!
//! `Expr` is the only thing the adapter hands to a store. It is deliberately small:
//! document CRUD, set materialisation and counting, collection/index management and
//! a batch form that the store evaluates as a single transaction. `to_fql` renders the
//! Fauna FQL v4 JSON wire form; `MemoryStore` interprets the enum directly.

use serde_json::{json, Map, Value};

use super::document::{DocRef, COLLECTIONS_CLASS, INDEXES_CLASS};

/// Largest page requested when a set is materialised.
pub const MAX_PAGE_SIZE: usize = 100_000;

/// A set of document references.
#[derive(Debug, Clone, PartialEq)]
pub enum SetExpr {
    /// Documents whose indexed terms equal `terms`, in index order. No terms means the whole index.
    Match { index: String, terms: Vec<Value> },
    /// Every document in a collection, in reference order.
    Documents(String),
}

/// A query expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Get(DocRef),
    Exists(DocRef),
    Create { collection: String, data: Map<String, Value> },
    Update { doc_ref: DocRef, data: Map<String, Value> },
    Delete(DocRef),
    /// Fetch every document of a set.
    Page(SetExpr),
    Count(SetExpr),
    /// Return the collection's ref, creating the collection first if absent.
    EnsureCollection(String),
    /// Return the index's ref, creating the index over `source` first if absent.
    EnsureIndex { name: String, source: String, terms: Vec<String> },
    /// All expressions in one request; the store applies all of them or none.
    Batch(Vec<Expr>),
}

/// Result shape an expression evaluates to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Document,
    Documents,
    Count,
    Flag,
    Ref,
    Batch(Vec<Shape>),
}

impl Expr {
    pub fn shape(&self) -> Shape {
        match self {
            Expr::Get(_) | Expr::Create { .. } | Expr::Update { .. } | Expr::Delete(_) => Shape::Document,
            Expr::Exists(_) => Shape::Flag,
            Expr::Page(_) => Shape::Documents,
            Expr::Count(_) => Shape::Count,
            Expr::EnsureCollection(_) | Expr::EnsureIndex { .. } => Shape::Ref,
            Expr::Batch(items) => Shape::Batch(items.iter().map(Expr::shape).collect()),
        }
    }

    /// Short operation label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Expr::Get(_) => "get",
            Expr::Exists(_) => "exists",
            Expr::Create { .. } => "create",
            Expr::Update { .. } => "update",
            Expr::Delete(_) => "delete",
            Expr::Page(_) => "page",
            Expr::Count(_) => "count",
            Expr::EnsureCollection(_) => "ensure_collection",
            Expr::EnsureIndex { .. } => "ensure_index",
            Expr::Batch(_) => "batch",
        }
    }

    /// Render the FQL v4 JSON wire form.
    pub fn to_fql(&self) -> Value {
        match self {
            Expr::Get(r) => json!({ "get": ref_fql(r) }),
            Expr::Exists(r) => json!({ "exists": ref_fql(r) }),
            Expr::Create { collection, data } => json!({
                "create": { "collection": collection },
                "params": { "object": { "data": literal(&Value::Object(data.clone())) } },
            }),
            Expr::Update { doc_ref, data } => json!({
                "update": ref_fql(doc_ref),
                "params": { "object": { "data": literal(&Value::Object(data.clone())) } },
            }),
            Expr::Delete(r) => json!({ "delete": ref_fql(r) }),
            Expr::Page(set) => json!({
                "map": { "lambda": "doc", "expr": { "get": { "var": "doc" } } },
                "collection": { "paginate": set.to_fql(), "size": MAX_PAGE_SIZE },
            }),
            Expr::Count(set) => json!({ "count": set.to_fql() }),
            Expr::EnsureCollection(name) => json!({
                "if": { "exists": { "collection": name } },
                "then": { "collection": name },
                "else": {
                    "select": ["ref"],
                    "from": { "create_collection": { "object": { "name": name } } },
                },
            }),
            Expr::EnsureIndex { name, source, terms } => {
                let terms: Vec<Value> = terms
                    .iter()
                    .map(|t| json!({ "object": { "field": ["data", t] } }))
                    .collect();
                json!({
                    "if": { "exists": { "index": name } },
                    "then": { "index": name },
                    "else": {
                        "select": ["ref"],
                        "from": { "create_index": { "object": {
                            "name": name,
                            "source": { "collection": source },
                            "terms": terms,
                        } } },
                    },
                })
            }
            Expr::Batch(items) => Value::Array(items.iter().map(Expr::to_fql).collect()),
        }
    }
}

impl SetExpr {
    pub fn to_fql(&self) -> Value {
        match self {
            SetExpr::Match { index, terms } => match terms.len() {
                0 => json!({ "match": { "index": index } }),
                1 => json!({ "match": { "index": index }, "terms": literal(&terms[0]) }),
                _ => json!({ "match": { "index": index }, "terms": literal(&Value::Array(terms.clone())) }),
            },
            SetExpr::Documents(collection) => json!({ "documents": { "collection": collection } }),
        }
    }
}

fn ref_fql(r: &DocRef) -> Value {
    match r.collection.as_str() {
        COLLECTIONS_CLASS => json!({ "collection": r.id }),
        INDEXES_CLASS => json!({ "index": r.id }),
        _ => json!({ "ref": { "collection": r.collection }, "id": r.id }),
    }
}

/// Object literals must be wrapped so the query evaluator does not read their keys as functions.
fn literal(v: &Value) -> Value {
    match v {
        Value::Object(m) => {
            let inner: Map<String, Value> = m.iter().map(|(k, v)| (k.clone(), literal(v))).collect();
            json!({ "object": Value::Object(inner) })
        }
        Value::Array(items) => Value::Array(items.iter().map(literal).collect()),
        other => other.clone(),
    }
}
