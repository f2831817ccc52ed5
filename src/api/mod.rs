//! HTTP surface.
//!
//! Provides:
//! - The provider webhook endpoint (POST /webhooks)
//! - Health and version checks
//! - Read-only meeting inspection (GET /meetings/:id, GET /meetings/:id/changes)

pub mod error;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{extract::DefaultBodyLimit, response::Json, routing::get, Router};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

use crate::db::Database;
use crate::webhook::WebhookReceiver;

/// Provider payloads carry full transcripts; anything past this is refused.
const MAX_WEBHOOK_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Shared state for every route.
#[derive(Clone)]
pub struct ApiState {
    pub receiver: Arc<WebhookReceiver>,
    pub db: Database,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .merge(routes::webhooks::router())
        .merge(routes::meetings::router())
        .layer(ServiceBuilder::new().layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY_BYTES)))
        .with_state(state)
}

pub struct ApiServer {
    addr: SocketAddr,
    state: ApiState,
}

impl ApiServer {
    pub fn new(addr: SocketAddr, state: ApiState) -> Self {
        Self { addr, state }
    }

    /// Serve until `shutdown` is cancelled, then finish in-flight requests.
    pub async fn start(self, shutdown: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.addr))?;

        info!("API server listening on http://{}", self.addr);
        info!("Endpoints:");
        info!("  POST /webhooks              - Provider webhook deliveries");
        info!("  GET  /health                - Liveness check");
        info!("  GET  /version               - Version info");
        info!("  GET  /meetings/:id          - Meeting record");
        info!("  GET  /meetings/:id/changes  - Meeting change history");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("API server failed")?;

        info!("API server stopped");
        Ok(())
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "service": "meetsync",
        "status": "ok"
    }))
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": "meetsync"
    }))
}
