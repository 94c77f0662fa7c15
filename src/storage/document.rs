//! Records and references as the document store hands them back.
//!
//! Both types are owned by the store: the adapter reads and forwards `ref`/`ts`
//! but never fabricates them.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Pseudo-collection that holds collection definitions.
pub const COLLECTIONS_CLASS: &str = "collections";
/// Pseudo-collection that holds index definitions.
pub const INDEXES_CLASS: &str = "indexes";

/// Opaque, store-assigned reference to a document, collection or index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocRef {
    pub collection: String,
    pub id: String,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self { collection: collection.into(), id: id.into() }
    }

    /// Reference to a collection definition.
    pub fn collection_def(name: impl Into<String>) -> Self { Self::new(COLLECTIONS_CLASS, name) }

    /// Reference to an index definition.
    pub fn index_def(name: impl Into<String>) -> Self { Self::new(INDEXES_CLASS, name) }
}

impl Display for DocRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// The unit the store manages: reference, write timestamp (microseconds) and payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    #[serde(rename = "ref")]
    pub doc_ref: DocRef,
    pub ts: i64,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl DocumentRecord {
    pub fn new(doc_ref: DocRef, ts: i64, data: Map<String, Value>) -> Self {
        Self { doc_ref, ts, data }
    }

    /// Response body form: `{"ref": {...}, "ts": n, "data": {...}}`.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "ref": { "collection": self.doc_ref.collection, "id": self.doc_ref.id },
            "ts": self.ts,
            "data": Value::Object(self.data.clone()),
        })
    }
}
