//!
//! chanchito HTTP server
//! ---------------------
//! Axum application wiring for the chanchito API.
//!
//! Responsibilities:
//! - Login endpoints: authorization-code exchange and bearer-token checks.
//! - One CRUD router per resource model, optionally behind the bearer gate.
//! - Startup provisioning of collections and indexes for every model.
//! - Request-id tracing span around every request.
//! - Graceful shutdown: drain HTTP, then shut the shared store client down.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{middleware, routing::get, Router};
use tracing::{info, warn};

use crate::config::ApiConfig;
use crate::identity::{AccessGate, CognitoVerifier, TokenExchange};
use crate::models;
use crate::resource::{ResourceAdapter, ResourceSchema};
use crate::storage::{Orm, SharedStore, StoreResult};

pub mod login;
pub mod resources;
pub mod trace;

/// Shared server state injected into the login handlers.
#[derive(Clone)]
pub struct AppState {
    pub gate: AccessGate,
    /// Absent when no hosted-UI domain or client secret is configured.
    pub oauth: Option<TokenExchange>,
    /// Put resource routes behind the bearer gate.
    pub protect_resources: bool,
}

/// Assemble the full application router.
pub fn build_router(state: AppState, adapters: Vec<ResourceAdapter>) -> Router {
    let mut app = Router::new()
        .route("/", get(|| async { "chanchito ok" }))
        .merge(login::routes(state.clone()));
    for adapter in adapters {
        let gate = state.protect_resources.then(|| state.gate.clone());
        app = app.merge(resources::routes(adapter, gate));
    }
    app.layer(middleware::from_fn(trace::request_id))
}

/// Create every model's collection and declared indexes. Safe to repeat.
pub async fn ensure_schema(orm: &Orm, schemas: &[Arc<ResourceSchema>]) -> StoreResult<()> {
    for schema in schemas {
        orm.create_collection(schema.name()).await?;
        for index in schema.indexes() {
            orm.create_index(schema.name(), &index.name, Some(index.terms.clone())).await?;
        }
        info!(target: "chanchito::store", collection = schema.name(), indexes = schema.indexes().len(), "collection ready");
    }
    Ok(())
}

/// Start the server and block until a shutdown signal has been handled.
pub async fn run(config: ApiConfig) -> anyhow::Result<()> {
    let store = SharedStore::from_config(&config.store).context("While opening the document store")?;
    let schemas = models::all().context("While building resource models")?;
    let orm = Orm::new(store.clone(), config.store.mode);
    ensure_schema(&orm, &schemas).await.context("While provisioning collections and indexes")?;

    let verifier = CognitoVerifier::new(config.identity.cognito.clone(), config.upstream_timeout)?;
    let gate = AccessGate::new(Arc::new(verifier));
    let oauth = match (&config.identity.domain, &config.identity.client_secret) {
        (Some(domain), Some(secret)) => Some(TokenExchange::for_domain(
            domain,
            config.identity.cognito.client_id.clone(),
            secret.clone(),
            config.identity.redirect_uri.clone(),
            config.upstream_timeout,
        )?),
        _ => {
            warn!(target: "chanchito::identity", "COGNITO_DOMAIN or AWS_APP_CLIENT_SECRET unset; /login/token is disabled");
            None
        }
    };

    let state = AppState { gate, oauth, protect_resources: config.protect_resources };
    let adapters = schemas.into_iter().map(|s| ResourceAdapter::new(s, orm.clone())).collect();
    let app = build_router(state, adapters);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("While binding {addr}"))?;
    info!(target: "chanchito::http", %addr, protect_resources = config.protect_resources, "Starting server");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    store.shutdown().await;
    info!(target: "chanchito::http", "server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("ctrl-c handler unavailable: {e}");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => { sig.recv().await; }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(target: "chanchito::http", "shutdown signal received, draining");
}
