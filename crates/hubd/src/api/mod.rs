//! JSON HTTP API.
//!
//! Thin bindings from HTTP routes to [`SessionCoordinator`] operations.

pub mod handlers;

use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::coordinator::SessionCoordinator;
use crate::server::ServerError;

/// Builds the API router.
pub fn router(coordinator: SessionCoordinator) -> Router {
    Router::new()
        // Queries
        .route("/api/clients", get(handlers::clients))
        .route("/api/sessions", get(handlers::sessions))
        .route("/api/server_info", get(handlers::server_info))
        .route(
            "/api/live_config",
            get(handlers::get_live_config).post(handlers::set_live_config),
        )
        .route("/api/live_status", get(handlers::live_status))
        .route("/api/relays", get(handlers::relays))
        // Intents
        .route("/api/send", post(handlers::send))
        .route("/api/live_start", post(handlers::live_start))
        .route("/api/live_stop", post(handlers::live_stop))
        .route("/api/file_play", post(handlers::file_play))
        .route("/api/file_stop", post(handlers::file_stop))
        .route("/api/status_req", post(handlers::status_req))
        .route("/api/disconnect", post(handlers::disconnect))
        .with_state(coordinator)
}

/// HTTP server for the JSON API.
pub struct ApiServer {
    addr: SocketAddr,
    coordinator: SessionCoordinator,
    cancel: CancellationToken,
}

impl ApiServer {
    pub fn new(addr: SocketAddr, coordinator: SessionCoordinator, cancel: CancellationToken) -> Self {
        Self {
            addr,
            coordinator,
            cancel,
        }
    }

    /// Binds and serves until cancelled.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.addr,
                source,
            })?;

        info!(addr = %listener.local_addr()?, "HTTP API listening");

        let cancel = self.cancel.clone();
        axum::serve(listener, router(self.coordinator))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        info!("HTTP API stopped");
        Ok(())
    }
}
