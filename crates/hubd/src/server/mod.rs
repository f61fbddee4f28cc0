//! WebSocket endpoint devices connect to.
//!
//! Devices connect to `ws://<host>:<ws_port>/?device_id=<id>`; the query
//! parameter is optional. Each upgraded socket is handed to
//! [`connection::handle_socket`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │   Device     │────▶│  DeviceServer    │────▶│ handle_socket    │
//! │ (WebSocket)  │     │  (axum, "/")     │     │ (per connection) │
//! └──────────────┘     └──────────────────┘     └────────┬─────────┘
//!                                                        │
//!                                                        ▼
//!                                               ┌──────────────────┐
//!                                               │  RegistryHandle  │
//!                                               └──────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and the connection is closed

pub mod connection;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use hub_core::DeviceId;

use crate::registry::RegistryHandle;

pub use connection::{ConnectionError, InboundHandler, InboundOutcome, OUTBOUND_QUEUE};

/// Maximum inbound message size (64 KB)
const MAX_MESSAGE_SIZE: usize = 65_536;

/// Errors from the device server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Query string accepted on connect.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub device_id: Option<String>,
}

#[derive(Clone)]
struct ServerState {
    registry: RegistryHandle,
    cancel: CancellationToken,
    connection_counter: Arc<AtomicU64>,
}

/// The device WebSocket server.
pub struct DeviceServer {
    addr: SocketAddr,
    state: ServerState,
}

impl DeviceServer {
    /// Creates a new server for `addr`.
    ///
    /// Open connections close when `cancel` fires.
    pub fn new(addr: SocketAddr, registry: RegistryHandle, cancel: CancellationToken) -> Self {
        Self {
            addr,
            state: ServerState {
                registry,
                cancel,
                connection_counter: Arc::new(AtomicU64::new(0)),
            },
        }
    }

    /// The axum router serving the upgrade endpoint.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(upgrade))
            .with_state(self.state.clone())
    }

    /// Binds and serves until cancelled.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.addr,
                source,
            })?;
        self.serve(listener).await
    }

    /// Serves on an already-bound listener until cancelled.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let local = listener.local_addr()?;
        info!(addr = %local, "Device WebSocket server listening");

        let cancel = self.state.cancel.clone();
        let app = self.router();

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

        info!("Device WebSocket server stopped");
        Ok(())
    }
}

async fn upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<ServerState>,
) -> Response {
    let connection_id = state.connection_counter.fetch_add(1, Ordering::Relaxed) + 1;
    let remote_addr = connect_info.map(|ConnectInfo(addr)| addr);
    let preferred_id = params
        .device_id
        .as_deref()
        .and_then(|id| DeviceId::parse(id).ok());

    debug!(
        connection = connection_id,
        remote_addr = ?remote_addr,
        preferred_id = ?preferred_id,
        "Device connecting"
    );

    ws.max_message_size(MAX_MESSAGE_SIZE).on_upgrade(move |socket| {
        connection::handle_socket(
            socket,
            state.registry,
            preferred_id,
            remote_addr,
            connection_id,
            state.cancel,
        )
    })
}
