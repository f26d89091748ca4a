use anyhow::Context;
use clap::Parser;
use ledger_core::Ledger;
use ledger_node::{open_store, router, Args};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let config = Args::parse().into_config()?;
    let store = open_store(config.store, &config.data_dir)?;

    // Bootstrapping may mine a genesis block; a chain that can't be loaded is fatal.
    let ledger_config = config.ledger.clone();
    let ledger = tokio::task::spawn_blocking(move || Ledger::open(store, ledger_config))
        .await?
        .context("failed to load chain")?;
    info!(
        name = %config.ledger.name,
        height = ledger.height(),
        store = ?config.store,
        "chain loaded"
    );

    let app = router(Arc::new(ledger));
    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    info!("ledger-node listening on http://{}", config.listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
