//! Handling of a single device WebSocket connection.
//!
//! Each connection:
//! - Registers with the registry (preferred id or `anon-N`)
//! - Queues a `hello` frame carrying the assigned id
//! - Runs a writer task draining the outbound queue into the socket
//! - Reads inbound frames until the socket closes or the daemon shuts down
//! - Unregisters itself on the way out
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in graceful disconnect

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hub_core::DeviceId;
use hub_protocol::{parse_device_frame, DeviceMessage, InboundFrame, ServerMessage};

use crate::registry::{ConnectionId, DeviceConnection, Outbound, RegistryError, RegistryHandle};

/// Capacity of each connection's outbound queue.
pub const OUTBOUND_QUEUE: usize = 64;

/// Errors ending a connection before its read loop starts.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("registration failed: {0}")]
    Registration(#[from] RegistryError),

    #[error("failed to encode hello: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What an inbound frame led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// The device took a new id
    Renamed { from: DeviceId, to: DeviceId },
    /// The device asked for an id it cannot have
    RenameRejected(String),
    /// Logged and otherwise ignored
    Logged,
}

/// Interprets inbound frames for one connection.
///
/// Tracks the connection's current id, which changes when the device
/// sends `register`.
pub struct InboundHandler {
    registry: RegistryHandle,
    device_id: DeviceId,
    connection: ConnectionId,
}

impl InboundHandler {
    pub fn new(registry: RegistryHandle, device_id: DeviceId, connection: ConnectionId) -> Self {
        Self {
            registry,
            device_id,
            connection,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Handles one text frame.
    pub async fn on_text(&mut self, text: &str) -> InboundOutcome {
        match parse_device_frame(text) {
            InboundFrame::Message {
                message: DeviceMessage::Register { device_id },
                ..
            } => self.on_register(&device_id).await,
            InboundFrame::Message { raw, .. } => {
                info!(device_id = %self.device_id, payload = %raw, "Device message");
                InboundOutcome::Logged
            }
            InboundFrame::Malformed { raw, reason } => {
                warn!(
                    device_id = %self.device_id,
                    payload = %raw,
                    reason = %reason,
                    "Malformed device message"
                );
                InboundOutcome::Logged
            }
            InboundFrame::NotJson(text) => {
                info!(device_id = %self.device_id, text = %text, "Device text");
                InboundOutcome::Logged
            }
        }
    }

    async fn on_register(&mut self, requested: &str) -> InboundOutcome {
        let new_id = match DeviceId::parse(requested) {
            Ok(id) => id,
            Err(e) => {
                warn!(device_id = %self.device_id, error = %e, "Ignoring register with bad id");
                return InboundOutcome::RenameRejected(e.to_string());
            }
        };

        if new_id == self.device_id {
            return InboundOutcome::Logged;
        }

        match self.registry.rename(&self.device_id, &new_id).await {
            Ok(()) => {
                let from = std::mem::replace(&mut self.device_id, new_id.clone());
                info!(
                    from = %from,
                    to = %new_id,
                    connection = self.connection,
                    "Device re-registered"
                );
                InboundOutcome::Renamed { from, to: new_id }
            }
            Err(e) => {
                warn!(
                    device_id = %self.device_id,
                    requested = %new_id,
                    error = %e,
                    "Device rename rejected"
                );
                InboundOutcome::RenameRejected(e.to_string())
            }
        }
    }
}

/// Drives one upgraded socket until it closes or `cancel` fires.
pub async fn handle_socket(
    mut socket: WebSocket,
    registry: RegistryHandle,
    preferred_id: Option<DeviceId>,
    remote_addr: Option<SocketAddr>,
    connection_id: ConnectionId,
    cancel: CancellationToken,
) {
    let (connection, outbound) = DeviceConnection::new(connection_id, OUTBOUND_QUEUE);

    let device_id = match register(&registry, preferred_id, connection, remote_addr).await {
        Ok(id) => id,
        Err(e) => {
            warn!(
                connection = connection_id,
                remote_addr = ?remote_addr,
                error = %e,
                "Rejecting device connection"
            );
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(sink, outbound, device_id.clone()));
    let mut handler = InboundHandler::new(registry.clone(), device_id, connection_id);

    tokio::select! {
        _ = read_loop(stream, &mut handler) => {}
        _ = &mut writer => {
            debug!(connection = connection_id, "Writer finished, closing connection");
        }
        _ = cancel.cancelled() => {
            debug!(connection = connection_id, "Shutdown, closing connection");
        }
    }
    writer.abort();

    match registry
        .unregister_connection(handler.device_id(), connection_id)
        .await
    {
        Ok(true) => {}
        Ok(false) => debug!(
            device_id = %handler.device_id(),
            "Entry already replaced or removed"
        ),
        Err(e) => debug!(error = %e, "Unregister failed"),
    }

    info!(
        device_id = %handler.device_id(),
        connection = connection_id,
        "Device disconnected"
    );
}

/// Registers the connection and queues its `hello`.
async fn register(
    registry: &RegistryHandle,
    preferred_id: Option<DeviceId>,
    connection: DeviceConnection,
    remote_addr: Option<SocketAddr>,
) -> Result<DeviceId, ConnectionError> {
    let device_id = registry
        .register(preferred_id, connection.clone(), remote_addr)
        .await?;

    let hello = serde_json::to_string(&ServerMessage::hello(device_id.clone()))?;
    if let Err(e) = connection.try_send_text(hello) {
        debug!(device_id = %device_id, reason = ?e, "Could not queue hello");
    }

    Ok(device_id)
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    device_id: DeviceId,
) {
    while let Some(frame) = outbound.recv().await {
        match frame {
            Outbound::Text(text) => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(device_id = %device_id, error = %e, "Write failed");
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(mut stream: SplitStream<WebSocket>, handler: &mut InboundHandler) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                handler.on_text(&text).await;
            }
            Ok(Message::Binary(bytes)) => {
                debug!(device_id = %handler.device_id(), len = bytes.len(), "Ignoring binary frame");
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(device_id = %handler.device_id(), error = %e, "Read failed");
                break;
            }
        }
    }
}
