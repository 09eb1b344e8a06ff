use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use banking_ledger::infrastructure::logging::init_logging;
use banking_ledger::{create_router, AppConfig, LedgerService, PostgresLedgerStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    let _logging_guard = init_logging(&config.logging)?;

    info!("Starting banking ledger");

    let store = PostgresLedgerStore::connect(&config).await?;
    store.init().await?;

    let service = Arc::new(LedgerService::new(
        Arc::new(store),
        config.conflict_retries,
    ));
    let app = create_router(service);

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("Server listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
