// src/server/mod.rs

//! Webhook server and sync worker wiring.
//!
//! The server exposes `POST /webhook` plus a health check. Accepted
//! webhook events feed a single-slot signal channel consumed by one sync
//! worker; the worker runs one pull cycle per token and survives sync
//! failures, exiting only on cancellation.

pub mod webhook;

use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::repos::{pull, SyncPolicy};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shared state for request handlers
pub struct ServerState {
    pub sig_tx: mpsc::Sender<()>,
}

/// Build the application router
pub fn create_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/webhook", post(webhook::handle))
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

/// Consume sync signals until cancellation.
///
/// Each token triggers one pull cycle. Sync failures are logged and the
/// worker keeps serving future signals.
pub async fn sync_worker(
    ctx: CancellationToken,
    mut sig_rx: mpsc::Receiver<()>,
    db: Arc<Database>,
    config: Config,
    policy: SyncPolicy,
) {
    loop {
        tokio::select! {
            _ = ctx.cancelled() => {
                info!("sync worker stopping");
                return;
            }
            received = sig_rx.recv() => {
                if received.is_none() {
                    return;
                }

                let db = db.clone();
                let config = config.clone();
                let pull_ctx = ctx.clone();
                let result = tokio::task::spawn_blocking(move || {
                    pull(&pull_ctx, &db, &config, &policy)
                })
                .await;

                match result {
                    Ok(Ok(())) => info!("sync cycle complete"),
                    Ok(Err(e)) => warn!(error = %e, "error while pulling repositories"),
                    Err(e) => warn!(error = %e, "sync task failed"),
                }
            }
        }
    }
}

/// Run the webhook server until interrupted.
///
/// Opens the store, starts the sync worker, queues one initial sync, and
/// serves until Ctrl-C cancels everything.
pub async fn run_server(config: Config, bind_addr: SocketAddr) -> Result<()> {
    info!(addr = %bind_addr, "starting webhook server");
    info!(db = ?config.db_path, repos = config.repos.len(), "index configuration");

    let db = Arc::new(Database::open(&config.db_path)?);
    let (sig_tx, sig_rx) = mpsc::channel(1);
    let token = CancellationToken::new();

    let worker = tokio::spawn(sync_worker(
        token.clone(),
        sig_rx,
        db.clone(),
        config.clone(),
        SyncPolicy::default(),
    ));

    // Bring the index up to date before the first webhook arrives
    webhook::enqueue_sync(&sig_tx);

    let state = Arc::new(ServerState { sig_tx });
    let app = create_router(state);

    let shutdown_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; shutting down");
            shutdown_token.cancel();
        }
    });

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(token.clone().cancelled_owned())
    .await?;

    token.cancel();
    let _ = worker.await;
    Ok(())
}
