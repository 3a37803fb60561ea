//! HTTP surface for the release gate.
//!
//! `api.rs` holds the route handlers; this module wires them to the
//! database, the deploy queue, the deploy worker and the periodic sweep.
//! Claims of a previous run are picked up by the sweep once that run's
//! heartbeat is older than the claim lease.

pub mod api;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db::{DbHandle, SideloaderDb};
use crate::release::dispatch::run_sweep;
use crate::release::{CommandDeployer, DeployWorker, QueueExecutor, ReleaseGate};
use api::{AppState, SharedState};

/// Build the full application router.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the configured address and serve until Ctrl+C.
pub async fn start_server(config: &Config) -> Result<()> {
    let addr = format!("{}:{}", config.toml.server.host, config.toml.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    serve(config, listener, shutdown_signal()).await
}

/// Serve on an already bound listener together with the deploy worker and
/// the sweep, until `shutdown` resolves.
///
/// Nothing touches the database before the listener exists, so a second
/// instance that cannot bind leaves the running one's claims alone.
pub async fn serve<F>(config: &Config, listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    config.ensure_directories()?;
    let db_path = config.db_path();
    let db = SideloaderDb::new(&db_path)
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    let instance_id = db.instance_id().to_string();

    let db = DbHandle::new(db);
    let gate = ReleaseGate::new();
    // Heartbeat before any request can claim a release under this instance.
    {
        let gate = gate.clone();
        db.call(move |db| Ok(gate.heartbeat(db)?)).await?;
    }

    let (executor, rx) = QueueExecutor::new();
    let executor = Arc::new(executor);

    let deployer = Arc::new(CommandDeployer::new(
        config.toml.deploy.command.clone(),
        config.deploy_timeout(),
    ));
    let worker = Arc::new(DeployWorker::new(db.clone(), gate.clone(), deployer));
    let worker = tokio::spawn(worker.run(rx));
    let sweep = tokio::spawn(run_sweep(
        db.clone(),
        gate.clone(),
        executor.clone(),
        config.sweep_interval(),
        config.claim_lease(),
    ));

    let state = Arc::new(AppState {
        db,
        gate,
        executor,
        public_url: config.public_url(),
    });
    let app = build_router(state);

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, db = %db_path.display(), instance = %instance_id, "sideloader listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error");

    sweep.abort();
    worker.abort();
    served?;
    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
