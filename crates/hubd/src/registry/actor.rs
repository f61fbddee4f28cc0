//! Registry actor - owns all device session state and processes commands.
//!
//! The RegistryActor is the single owner of the session table. It receives
//! commands via an mpsc channel and answers through oneshot channels.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Response send failures are ignored (the caller went away)

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use hub_core::{DeviceId, Target};

use super::commands::{DeviceEvent, RegistryCommand, RegistryError};
use super::session::{ConnectionId, DeviceConnection, DeviceSession, DeviceSessionView};

/// Maximum number of devices the registry can hold.
pub const MAX_DEVICES: usize = 256;

/// The registry actor - owns all device sessions.
///
/// Processes commands sequentially in a single task, so every mutation of
/// the table is serialised without locks.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Live sessions keyed by device id
    sessions: HashMap<DeviceId, DeviceSession>,

    /// Next number for `anon-N` ids; never reused
    anon_counter: u64,

    /// Event broadcaster
    event_sender: broadcast::Sender<DeviceEvent>,
}

impl RegistryActor {
    /// Creates a new registry actor.
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_sender: broadcast::Sender<DeviceEvent>,
    ) -> Self {
        Self {
            receiver,
            sessions: HashMap::new(),
            anon_counter: 1,
            event_sender,
        }
    }

    /// Publishes an event. No subscribers is fine.
    fn publish(&self, event: DeviceEvent) {
        let _ = self.event_sender.send(event);
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(devices = self.sessions.len(), "Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                preferred_id,
                connection,
                remote_addr,
                respond_to,
            } => {
                let result = self.handle_register(preferred_id, connection, remote_addr);
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Rename {
                old_id,
                new_id,
                respond_to,
            } => {
                let result = self.handle_rename(old_id, new_id);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Unregister {
                device_id,
                connection,
                respond_to,
            } => {
                let removed = self.handle_unregister(&device_id, connection);
                let _ = respond_to.send(removed);
            }
            RegistryCommand::List { respond_to } => {
                let _ = respond_to.send(self.handle_list());
            }
            RegistryCommand::ResolveAddress {
                device_id,
                respond_to,
            } => {
                let addr = self.sessions.get(&device_id).and_then(|s| s.remote_addr);
                let _ = respond_to.send(addr);
            }
            RegistryCommand::Connections { target, respond_to } => {
                let _ = respond_to.send(self.handle_connections(&target));
            }
            RegistryCommand::Sessions { respond_to } => {
                let _ = respond_to.send(self.handle_sessions());
            }
            RegistryCommand::PruneClosed => {
                self.handle_prune_closed();
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Handles registration of a new connection.
    ///
    /// A preferred id held by a live connection is rejected. An entry
    /// whose connection already closed is replaced.
    fn handle_register(
        &mut self,
        preferred_id: Option<DeviceId>,
        connection: DeviceConnection,
        remote_addr: Option<SocketAddr>,
    ) -> Result<DeviceId, RegistryError> {
        let device_id = match preferred_id {
            Some(id) => {
                if let Some(existing) = self.sessions.get(&id) {
                    if existing.connection.is_open() {
                        warn!(
                            device_id = %id,
                            existing_connection = existing.connection.id(),
                            "Device id already connected, rejecting registration"
                        );
                        return Err(RegistryError::DeviceAlreadyConnected(id));
                    }
                    debug!(device_id = %id, "Replacing stale session with closed connection");
                }
                id
            }
            None => self.next_anonymous_id(),
        };

        if !self.sessions.contains_key(&device_id) && self.sessions.len() >= MAX_DEVICES {
            warn!(
                device_id = %device_id,
                current = self.sessions.len(),
                max = MAX_DEVICES,
                "Registry is full, rejecting registration"
            );
            return Err(RegistryError::RegistryFull { max: MAX_DEVICES });
        }

        let connection_id = connection.id();
        self.sessions.insert(
            device_id.clone(),
            DeviceSession::new(device_id.clone(), connection, remote_addr),
        );

        info!(
            device_id = %device_id,
            connection = connection_id,
            remote_addr = ?remote_addr,
            total_devices = self.sessions.len(),
            "Device registered"
        );

        self.publish(DeviceEvent::Connected {
            device_id: device_id.clone(),
            remote_addr,
        });
        Ok(device_id)
    }

    /// Returns the next `anon-N` id not currently in use.
    fn next_anonymous_id(&mut self) -> DeviceId {
        loop {
            let candidate = DeviceId::anonymous(self.anon_counter);
            self.anon_counter = self.anon_counter.wrapping_add(1);
            if !self.sessions.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Handles a device-initiated rename.
    fn handle_rename(&mut self, old_id: DeviceId, new_id: DeviceId) -> Result<(), RegistryError> {
        if old_id == new_id {
            return if self.sessions.contains_key(&old_id) {
                Ok(())
            } else {
                Err(RegistryError::DeviceNotFound(old_id))
            };
        }

        if !self.sessions.contains_key(&old_id) {
            debug!(old_id = %old_id, new_id = %new_id, "Rename for unknown device");
            return Err(RegistryError::DeviceNotFound(old_id));
        }

        if let Some(existing) = self.sessions.get(&new_id) {
            if existing.connection.is_open() {
                warn!(
                    old_id = %old_id,
                    new_id = %new_id,
                    "Rename target already connected, keeping old id"
                );
                return Err(RegistryError::DeviceAlreadyConnected(new_id));
            }
        }

        let Some(mut session) = self.sessions.remove(&old_id) else {
            return Err(RegistryError::DeviceNotFound(old_id));
        };
        session.id = new_id.clone();
        self.sessions.insert(new_id.clone(), session);

        info!(old_id = %old_id, new_id = %new_id, "Device renamed");
        self.publish(DeviceEvent::Renamed { old_id, new_id });
        Ok(())
    }

    /// Handles removal. Returns whether an entry was removed.
    fn handle_unregister(&mut self, device_id: &DeviceId, connection: Option<ConnectionId>) -> bool {
        let owned = match (self.sessions.get(device_id), connection) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(session), Some(conn)) => session.connection.id() == conn,
        };

        if !owned {
            debug!(device_id = %device_id, connection = ?connection, "Nothing to unregister");
            return false;
        }

        self.sessions.remove(device_id);
        info!(
            device_id = %device_id,
            total_devices = self.sessions.len(),
            "Device unregistered"
        );
        self.publish(DeviceEvent::Disconnected {
            device_id: device_id.clone(),
        });
        true
    }

    /// Sorted snapshot of ids.
    fn handle_list(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Connection handles addressed by `target`.
    fn handle_connections(&self, target: &Target) -> Vec<(DeviceId, DeviceConnection)> {
        match target {
            Target::All => {
                let mut all: Vec<(DeviceId, DeviceConnection)> = self
                    .sessions
                    .values()
                    .map(|s| (s.id.clone(), s.connection.clone()))
                    .collect();
                all.sort_by(|a, b| a.0.cmp(&b.0));
                all
            }
            Target::Device(id) => self
                .sessions
                .get(id)
                .map(|s| vec![(s.id.clone(), s.connection.clone())])
                .unwrap_or_default(),
        }
    }

    fn handle_sessions(&self) -> Vec<DeviceSessionView> {
        let mut views: Vec<DeviceSessionView> =
            self.sessions.values().map(DeviceSessionView::from_session).collect();
        views.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        views
    }

    /// Removes sessions whose writer task has ended without an unregister.
    fn handle_prune_closed(&mut self) {
        let closed: Vec<DeviceId> = self
            .sessions
            .iter()
            .filter(|(_, session)| !session.connection.is_open())
            .map(|(id, _)| id.clone())
            .collect();

        let pruned = closed.len();
        for device_id in closed {
            debug!(device_id = %device_id, "Pruning closed connection");
            self.sessions.remove(&device_id);
            self.publish(DeviceEvent::Disconnected { device_id });
        }

        if pruned > 0 {
            info!(
                pruned,
                remaining = self.sessions.len(),
                "Pruned closed device sessions"
            );
        }
    }

    /// Returns the number of devices (for testing).
    #[cfg(test)]
    pub fn device_count(&self) -> usize {
        self.sessions.len()
    }
}
