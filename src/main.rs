//! blobd - ephemeral blob store daemon
//!
//! Accepts uploads over HTTP, hands back a generated name, and expires blobs
//! that have not been read for a configurable period.

mod config;
mod http;
mod store;

use anyhow::{Context, Result};
use std::env;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use config::Command;
use http::{AppState, HttpServer};
use store::{BlobStore, Sweeper};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let log_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Parse command
    let args: Vec<String> = env::args().skip(1).collect();
    let config = match config::parse_args(&args, |key| env::var(key).ok()) {
        Ok(Command::Serve(config)) => config,
        Ok(Command::Help) => {
            config::print_help();
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            config::print_help();
            std::process::exit(1);
        }
    };

    let store = match BlobStore::with_config(config.store_config()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "Failed to initialize blob store");
            return Err(e.into());
        }
    };

    let sweeper = Sweeper::spawn(Arc::clone(&store));

    let mut server = HttpServer::new(Arc::new(AppState::new(Arc::clone(&store))));
    server.start(config.listen_addr()).await?;

    info!(dir = %store.directory().display(), "Daemon ready");

    let result = server.run(shutdown_signal()).await;
    if let Err(e) = &result {
        error!(error = %e, "HTTP server error");
    }

    info!("Shutting down, clearing blob store...");
    sweeper.stop();

    let clear_store = Arc::clone(&store);
    let report = tokio::task::spawn_blocking(move || clear_store.clear())
        .await
        .context("Store clear task failed")?;
    if report.retained > 0 {
        error!(
            retained = report.retained,
            dir = %store.directory().display(),
            "Some blob files could not be removed"
        );
    }

    info!("Shutdown complete.");
    result
}

/// Resolve on Ctrl+C
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        // Without a signal handler the daemon can only be killed; keep serving
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
