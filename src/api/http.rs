//! HTTP API Server
//!
//! Read-only status endpoints for operators and the control tool.

use std::sync::Arc;
use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::clock::{ClockSynchronizer, LogicalClock, PhysicalClock};
use crate::config::ApiConfig;
use crate::membership::MembershipDirectory;
use crate::replication::ReplicationMode;
use crate::state::{StateCounts, StateStore};
use crate::error::{Error, Result};

/// Shared application state
pub struct AppState {
    pub directory: Arc<MembershipDirectory>,
    pub store: Arc<StateStore>,
    pub clock: Arc<LogicalClock>,
    pub physical: Arc<PhysicalClock>,
    pub sync: Arc<ClockSynchronizer>,
    pub replication_mode: ReplicationMode,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ApiConfig, state: AppState) -> Self {
        Self {
            config,
            state: Arc::new(state),
        }
    }

    /// Create the router
    fn create_router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/health", get(handle_health))
            .route("/status", get(handle_status))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the listener. Failing here is a startup failure.
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(&self.config.bind_address)
            .await
            .map_err(|e| Error::ConnectionFailed {
                address: self.config.bind_address.clone(),
                reason: format!("bind failed: {}", e),
            })
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(&self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!("HTTP API listening on {}", listener.local_addr()?);

        let app = Self::create_router(Arc::clone(&self.state));
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                while shutdown.changed().await.is_ok() {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            })
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Response Types ============

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub name: String,
    pub is_primary: bool,
}

/// Node status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub name: String,
    pub rank: Option<u64>,
    pub coordinator: Option<String>,
    pub is_primary: bool,
    pub backups: Vec<String>,
    pub known_nodes: usize,
    pub logical_clock: u64,
    pub physical_offset_ms: i64,
    pub replication_mode: ReplicationMode,
    pub requests_processed: u64,
    pub counts: StateCounts,
}

// ============ Handlers ============

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        name: state.directory.name().to_string(),
        is_primary: state.directory.is_primary().await,
    })
}

async fn handle_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let view = state.directory.snapshot().await;

    Json(StatusResponse {
        name: state.directory.name().to_string(),
        rank: state.directory.identity().rank(),
        coordinator: view.coordinator().map(str::to_string),
        is_primary: view.is_primary(),
        backups: view.backups().to_vec(),
        known_nodes: view.len(),
        logical_clock: state.clock.current(),
        physical_offset_ms: state.physical.offset(),
        replication_mode: state.replication_mode,
        requests_processed: state.sync.request_count(),
        counts: state.store.counts().await,
    })
}
