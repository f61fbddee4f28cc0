//! Device sessions and their connection handles.
//!
//! A `DeviceConnection` is the registry's only way to reach a device: a
//! bounded queue drained by the connection's writer task. When that task
//! ends the queue's receiver is dropped and the handle reports closed.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use hub_core::DeviceId;

/// Number of a device connection, unique for the daemon's lifetime.
pub type ConnectionId = u64;

/// Frame queued for a device's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A serialized JSON control message
    Text(String),
    /// Close the connection
    Close,
}

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The writer task has gone away
    Closed,
    /// The device is not keeping up
    Full,
}

/// Send capability plus liveness flag for one device connection.
#[derive(Debug, Clone)]
pub struct DeviceConnection {
    id: ConnectionId,
    sender: mpsc::Sender<Outbound>,
}

impl DeviceConnection {
    /// Creates a connection handle and the queue its writer task drains.
    pub fn new(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { id, sender }, receiver)
    }

    /// Connection number assigned by the server.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns true while the writer task is alive.
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Queues a text frame without waiting.
    pub fn try_send_text(&self, text: String) -> Result<(), QueueError> {
        self.try_send(Outbound::Text(text))
    }

    /// Asks the writer task to close the connection.
    pub fn close(&self) -> Result<(), QueueError> {
        self.try_send(Outbound::Close)
    }

    fn try_send(&self, frame: Outbound) -> Result<(), QueueError> {
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }
}

/// One live device connection as held by the registry.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    pub id: DeviceId,
    pub connection: DeviceConnection,
    pub remote_addr: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
}

impl DeviceSession {
    pub fn new(id: DeviceId, connection: DeviceConnection, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            id,
            connection,
            remote_addr,
            connected_at: Utc::now(),
        }
    }
}

/// Read-only snapshot of a session for API callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSessionView {
    pub device_id: DeviceId,
    pub remote_addr: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
    pub open: bool,
}

impl DeviceSessionView {
    pub fn from_session(session: &DeviceSession) -> Self {
        Self {
            device_id: session.id.clone(),
            remote_addr: session.remote_addr,
            connected_at: session.connected_at,
            open: session.connection.is_open(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_queues_frames() {
        let (conn, mut rx) = DeviceConnection::new(7, 4);
        assert_eq!(conn.id(), 7);
        assert!(conn.is_open());

        conn.try_send_text("{\"type\":\"status_req\"}".to_string()).unwrap();
        conn.close().unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Outbound::Text("{\"type\":\"status_req\"}".to_string()))
        );
        assert_eq!(rx.recv().await, Some(Outbound::Close));
    }

    #[test]
    fn test_connection_closed_when_receiver_dropped() {
        let (conn, rx) = DeviceConnection::new(1, 4);
        drop(rx);
        assert!(!conn.is_open());
        assert_eq!(conn.try_send_text("x".to_string()), Err(QueueError::Closed));
    }

    #[test]
    fn test_connection_full_queue() {
        let (conn, _rx) = DeviceConnection::new(1, 1);
        conn.try_send_text("a".to_string()).unwrap();
        assert_eq!(conn.try_send_text("b".to_string()), Err(QueueError::Full));
    }

    #[test]
    fn test_view_reflects_liveness() {
        let (conn, rx) = DeviceConnection::new(1, 1);
        let session = DeviceSession::new(DeviceId::new("hall"), conn, None);
        assert!(DeviceSessionView::from_session(&session).open);

        drop(rx);
        let view = DeviceSessionView::from_session(&session);
        assert!(!view.open);
        assert_eq!(view.device_id.as_str(), "hall");
    }
}
