//! Registry actor commands and errors.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `DeviceEvent`: Events broadcast when the device set changes
//!
//! All types are designed for async message passing and follow the panic-free policy.

use std::net::SocketAddr;

use hub_core::{DeviceId, Target};
use thiserror::Error;
use tokio::sync::oneshot;

use super::session::{ConnectionId, DeviceConnection, DeviceSessionView};

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command uses a oneshot channel for the response, enabling
/// request-response patterns in async code without blocking.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Register a newly established connection.
    ///
    /// # Errors
    /// - `RegistryError::DeviceAlreadyConnected` if the preferred id is held by a live connection
    /// - `RegistryError::RegistryFull` if at maximum capacity
    Register {
        /// Id the device asked for, if any
        preferred_id: Option<DeviceId>,
        /// Handle used to reach the device
        connection: DeviceConnection,
        /// Peer address, informational
        remote_addr: Option<SocketAddr>,
        /// Channel to send the assigned id
        respond_to: oneshot::Sender<Result<DeviceId, RegistryError>>,
    },

    /// Move a session to a new id.
    ///
    /// # Errors
    /// - `RegistryError::DeviceNotFound` if `old_id` is not registered
    /// - `RegistryError::DeviceAlreadyConnected` if `new_id` is held by another live connection
    Rename {
        old_id: DeviceId,
        new_id: DeviceId,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Remove a session. Idempotent.
    ///
    /// With `connection` set, the entry is only removed if it still
    /// belongs to that connection.
    Unregister {
        device_id: DeviceId,
        connection: Option<ConnectionId>,
        /// Whether an entry was removed
        respond_to: oneshot::Sender<bool>,
    },

    /// Snapshot of registered ids.
    List {
        respond_to: oneshot::Sender<Vec<DeviceId>>,
    },

    /// Remote address of a device.
    ResolveAddress {
        device_id: DeviceId,
        respond_to: oneshot::Sender<Option<SocketAddr>>,
    },

    /// Connection handles addressed by a target (open or not).
    Connections {
        target: Target,
        respond_to: oneshot::Sender<Vec<(DeviceId, DeviceConnection)>>,
    },

    /// Session views for every registered device.
    Sessions {
        respond_to: oneshot::Sender<Vec<DeviceSessionView>>,
    },

    /// Drop entries whose connection has already closed.
    ///
    /// Fire-and-forget; sent periodically by the prune task.
    PruneClosed,
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The registry has reached its maximum device capacity.
    #[error("registry is full (max: {max} devices)")]
    RegistryFull {
        /// Maximum number of devices allowed
        max: usize,
    },

    /// The requested device was not found.
    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    /// A live connection already uses this id.
    #[error("device already connected: {0}")]
    DeviceAlreadyConnected(DeviceId),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Device Events
// ============================================================================

/// Events broadcast when devices connect, rename or leave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected {
        device_id: DeviceId,
        remote_addr: Option<SocketAddr>,
    },
    Renamed {
        old_id: DeviceId,
        new_id: DeviceId,
    },
    Disconnected {
        device_id: DeviceId,
    },
}

impl DeviceEvent {
    /// Id the event refers to (the new id for renames).
    pub fn device_id(&self) -> &DeviceId {
        match self {
            DeviceEvent::Connected { device_id, .. } => device_id,
            DeviceEvent::Renamed { new_id, .. } => new_id,
            DeviceEvent::Disconnected { device_id } => device_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::RegistryFull { max: 256 };
        assert_eq!(err.to_string(), "registry is full (max: 256 devices)");

        let err = RegistryError::DeviceNotFound(DeviceId::new("anon-3"));
        assert_eq!(err.to_string(), "device not found: anon-3");

        let err = RegistryError::DeviceAlreadyConnected(DeviceId::new("kitchen"));
        assert_eq!(err.to_string(), "device already connected: kitchen");

        assert_eq!(RegistryError::ChannelClosed.to_string(), "response channel closed");
    }

    #[test]
    fn test_event_device_id() {
        let event = DeviceEvent::Renamed {
            old_id: DeviceId::new("anon-1"),
            new_id: DeviceId::new("hall"),
        };
        assert_eq!(event.device_id().as_str(), "hall");
    }

    #[tokio::test]
    async fn test_command_channel_closed_error() {
        let (tx, rx) = oneshot::channel::<Result<DeviceId, RegistryError>>();
        drop(tx);
        assert!(rx.await.is_err());
    }
}
