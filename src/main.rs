use anyhow::{Context, Result};
use keyvault::api::{create_keys_router, KeysAppState};
use keyvault::config::VaultConfig;
use keyvault::credentials::{MasterKey, SqliteKeyStore, VaultService};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keyvault=info".into()),
        )
        .init();

    info!("Key vault starting...");

    // Config file: first CLI argument, else KEYVAULT_CONFIG, else defaults + env
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("KEYVAULT_CONFIG").ok())
        .map(PathBuf::from);
    let config = VaultConfig::load(config_path.as_deref())?;

    info!(
        database = %config.storage.database_path.display(),
        busy_timeout_ms = config.storage.busy_timeout_ms,
        "Opening key store"
    );
    let store = SqliteKeyStore::open(&config.storage.database_path, config.storage.busy_timeout())?;

    let master_key = MasterKey::from_config(config.vault.master_secret.as_deref());
    let vault = Arc::new(VaultService::new(Arc::new(store), master_key));

    let app = create_keys_router(KeysAppState {
        vault,
        user_header: config.api.user_header.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.api.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.api.bind_addr))?;

    info!(
        addr = %config.api.bind_addr,
        user_header = %config.api.user_header,
        "Key vault API listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Key vault stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
    }
}
