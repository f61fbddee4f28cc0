//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` is a cheap-to-clone interface for sending commands
//! to the registry actor and subscribing to device events.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`
//! - Query methods return empty results when the actor is gone

use std::net::SocketAddr;

use tokio::sync::{broadcast, mpsc, oneshot};

use hub_core::{DeviceId, Target};

use super::commands::{DeviceEvent, RegistryCommand, RegistryError};
use super::session::{ConnectionId, DeviceConnection, DeviceSessionView};

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// Shared by connection handlers, the router and the HTTP layer.
///
/// ```ignore
/// let id = registry.register(None, connection, Some(addr)).await?;
/// registry.rename(&id, &DeviceId::new("kitchen-speaker")).await?;
/// let ids = registry.list().await;
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<DeviceEvent>,
}

impl RegistryHandle {
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<DeviceEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Registers a new connection, returning the id it was given.
    ///
    /// # Errors
    ///
    /// - `RegistryError::DeviceAlreadyConnected` if `preferred_id` is held by a live connection
    /// - `RegistryError::RegistryFull` if at capacity
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register(
        &self,
        preferred_id: Option<DeviceId>,
        connection: DeviceConnection,
        remote_addr: Option<SocketAddr>,
    ) -> Result<DeviceId, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Register {
                preferred_id,
                connection,
                remote_addr,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Moves a session from `old_id` to `new_id`.
    pub async fn rename(&self, old_id: &DeviceId, new_id: &DeviceId) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Rename {
                old_id: old_id.clone(),
                new_id: new_id.clone(),
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Removes a device regardless of which connection holds it.
    ///
    /// Returns `Ok(false)` if nothing was registered under `device_id`.
    pub async fn unregister(&self, device_id: &DeviceId) -> Result<bool, RegistryError> {
        self.send_unregister(device_id, None).await
    }

    /// Removes a device only if it still belongs to `connection`.
    pub async fn unregister_connection(
        &self,
        device_id: &DeviceId,
        connection: ConnectionId,
    ) -> Result<bool, RegistryError> {
        self.send_unregister(device_id, Some(connection)).await
    }

    async fn send_unregister(
        &self,
        device_id: &DeviceId,
        connection: Option<ConnectionId>,
    ) -> Result<bool, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Unregister {
                device_id: device_id.clone(),
                connection,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Sorted snapshot of registered ids.
    ///
    /// Returns an empty list if the actor has shut down.
    pub async fn list(&self) -> Vec<DeviceId> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::List { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Remote address recorded at connect time.
    pub async fn resolve_address(&self, device_id: &DeviceId) -> Option<SocketAddr> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::ResolveAddress {
                device_id: device_id.clone(),
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok().flatten()
    }

    /// Connection handles addressed by `target`, open or not.
    pub async fn connections(&self, target: &Target) -> Vec<(DeviceId, DeviceConnection)> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Connections {
                target: target.clone(),
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    pub async fn sessions(&self) -> Vec<DeviceSessionView> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Sessions { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Returns true if `device_id` is registered with an open connection.
    pub async fn is_connected(&self, device_id: &DeviceId) -> bool {
        self.connections(&Target::Device(device_id.clone()))
            .await
            .iter()
            .any(|(_, conn)| conn.is_open())
    }

    /// Triggers removal of entries whose connection has closed.
    ///
    /// Fire-and-forget.
    pub async fn prune_closed(&self) -> Result<(), RegistryError> {
        self.sender
            .send(RegistryCommand::PruneClosed)
            .await
            .map_err(|_| RegistryError::ChannelClosed)
    }

    /// Subscribes to device events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.event_sender.subscribe()
    }
}
