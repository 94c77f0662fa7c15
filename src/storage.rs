//!
//! chanchito storage module
//! ------------------------
//! Everything between the resource adapter and the document store.
//!
//! - `document`: the record/reference types the store owns.
//! - `query`: the `Expr` language handed to the store verbatim.
//! - `client`: the `StoreClient` seam and the store error taxonomy.
//! - `fauna` / `memory`: the hosted client and the in-process evaluator.
//! - `orm`: the CRUD surface used by resource adapters.
//!
//! The public handle is `SharedStore`, one long-lived client created at startup and
//! cloned into every adapter. It is shut down explicitly once the HTTP server drains.

use std::sync::Arc;

use tracing::info;

pub mod client;
pub mod document;
pub mod fauna;
pub mod memory;
pub mod orm;
pub mod query;

pub use client::{StoreClient, StoreError, StoreResult, StoreValue};
pub use document::{DocRef, DocumentRecord};
pub use fauna::FaunaClient;
pub use memory::MemoryStore;
pub use orm::{ExecutionMode, Orm};
pub use query::{Expr, SetExpr};

use crate::config::{StoreBackend, StoreConfig};

/// Process-wide store handle. Cheap to clone; all clones share one client.
#[derive(Clone)]
pub struct SharedStore(pub Arc<dyn StoreClient>);

impl SharedStore {
    /// Open the backend named in configuration.
    pub fn from_config(cfg: &StoreConfig) -> StoreResult<Self> {
        let client: Arc<dyn StoreClient> = match &cfg.backend {
            StoreBackend::Fauna { endpoint, secret } => Arc::new(FaunaClient::new(endpoint.clone(), secret.clone(), cfg.timeout)?),
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
        };
        info!(target: "chanchito::store", backend = client.backend(), mode = ?cfg.mode, "store client ready");
        Ok(Self(client))
    }

    pub async fn query(&self, expr: &Expr) -> StoreResult<StoreValue> { self.0.query(expr).await }

    /// Stop the shared client. In-flight queries finish; later ones fail with `Closed`.
    pub async fn shutdown(&self) {
        self.0.shutdown().await;
        info!(target: "chanchito::store", backend = self.0.backend(), "store client shut down");
    }
}

impl From<Arc<MemoryStore>> for SharedStore {
    fn from(store: Arc<MemoryStore>) -> Self { Self(store) }
}
