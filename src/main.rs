use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use chanchito::config::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let config = ApiConfig::from_env()?;
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "chanchito",
        "chanchito starting: RUST_LOG='{}', http_port={}, region={}, pool={}, store={:?}, mode={}, protect_resources={}",
        rust_log,
        config.http_port,
        config.identity.cognito.region,
        config.identity.cognito.user_pool_id,
        config.store.backend,
        config.store.mode,
        config.protect_resources,
    );

    chanchito::server::run(config).await
}
