//! Standalone worker for the movie command bus.
//!
//! Starts an in-process broker and store, optionally seeds the store from a
//! movie CSV given as the first argument, and runs until Ctrl-C.
//!
//! Configuration comes from `MOVIE_BUS_CONFIG` (a YAML file) and
//! `MOVIE_BUS__*` environment variables.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use broker::InMemoryBroker;
use server::{MovieService, ServiceConfig};
use store::InMemoryMovieStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,server=debug")),
        )
        .init();

    let config_path = std::env::var("MOVIE_BUS_CONFIG").ok();
    let config = ServiceConfig::load(config_path.as_deref())?;
    info!(?config, "Starting movie bus worker");

    let broker = Arc::new(InMemoryBroker::new());
    let store = Arc::new(InMemoryMovieStore::new());
    let service = MovieService::start(config, broker.clone(), store).await?;

    if let Some(path) = std::env::args().nth(1) {
        let movies = data_loader::load_movies(Path::new(&path))
            .with_context(|| format!("Failed to load {}", path))?;
        let report = service.publish_movies(movies).await?;
        info!(sent = report.sent, rejected = report.rejected.len(), "Seeded movies from {}", path);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down");
    service.shutdown().await?;
    broker.close();
    Ok(())
}
