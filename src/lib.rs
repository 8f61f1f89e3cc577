//! streampulse -- availability monitoring for debrid/CDN stream delivery.
//!
//! This crate exercises a debrid service's real request paths (auth, cached
//! content resolution, direct-link probing) on a schedule, classifies every
//! failure mode, and keeps a self-pruning history served over a small HTTP
//! API.

pub mod api;
pub mod checker;
pub mod config;
pub mod debrid;
pub mod history;
pub mod scheduler;

use std::sync::Arc;

use anyhow::Result;

use crate::checker::probe::HttpProber;
use crate::debrid::{DebridApi, DebridClient};
use crate::history::HistoryStore;
use crate::scheduler::CycleEngine;

/// Start the streampulse daemon: check scheduler plus API server. Returns
/// after the server shuts down and the in-flight cycle (if any) finished.
pub async fn serve(bind: &str, config_path: &str) -> Result<()> {
    let cfg = config::Config::load(config_path)?;
    if cfg.api_token.is_none() {
        tracing::warn!("no api token configured; all remote checks will be skipped");
    }

    let store = HistoryStore::new(&cfg.history_path);
    let client: Arc<dyn DebridApi> =
        Arc::new(DebridClient::new(&cfg.api_base_url, cfg.api_token.clone())?);
    let prober = Arc::new(HttpProber::default());
    let engine = CycleEngine::new(config_path, store.clone(), client, prober);
    engine.start()?;

    let state = api::state::AppState { engine: engine.clone(), store };
    let app = api::router(state);

    let addr: std::net::SocketAddr = bind.parse()?;
    tracing::info!(%addr, "streampulse listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let any in-flight cycle finish and append before exiting.
    engine.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
