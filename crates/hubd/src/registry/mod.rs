//! Device session registry using the Actor pattern.
//!
//! The registry owns the mapping from device id to live connection. It
//! receives commands via a tokio mpsc channel and is the single source of
//! truth for who is connected.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ DeviceServer /  │────▶│  RegistryActor  │────▶│ Broadcast Channel│
//! │ ControlRouter   │     └─────────────────┘     └──────────────────┘
//! └─────────────────┘             │                       │
//!         │   RegistryCommand     │   DeviceEvent         │
//!         │   (mpsc channel)      │   (broadcast)         │
//!         ▼                       ▼                       ▼
//!  register / rename      HashMap<DeviceId,        subscribers
//!  connections            DeviceSession>
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Duration};
use tracing::debug;

mod actor;
mod commands;
mod handle;
mod session;

pub use actor::{RegistryActor, MAX_DEVICES};
pub use commands::{DeviceEvent, RegistryCommand, RegistryError};
pub use handle::RegistryHandle;
pub use session::{
    ConnectionId, DeviceConnection, DeviceSession, DeviceSessionView, Outbound, QueueError,
};

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Interval between sweeps for connections that closed without unregistering
const PRUNE_INTERVAL_SECS: u64 = 5;

/// Spawns the registry actor and returns a handle for interaction.
///
/// This function:
/// 1. Creates command and event channels
/// 2. Spawns the RegistryActor on a tokio task
/// 3. Spawns a background prune task
/// 4. Returns a RegistryHandle for client use
///
/// # Example
///
/// ```no_run
/// use hubd::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let registry = spawn_registry();
///     let devices = registry.list().await;
/// }
/// ```
pub fn spawn_registry() -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, event_tx.clone());
    tokio::spawn(actor.run());

    let handle = RegistryHandle::new(cmd_tx.clone(), event_tx);

    spawn_prune_task(cmd_tx.downgrade());

    handle
}

/// Spawns a background task that periodically prunes closed connections.
///
/// Holds only a weak sender so the actor stops once every handle is dropped.
fn spawn_prune_task(sender: mpsc::WeakSender<RegistryCommand>) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(PRUNE_INTERVAL_SECS));

        loop {
            ticker.tick().await;

            let Some(sender) = sender.upgrade() else {
                debug!("Prune task stopping: registry handles dropped");
                break;
            };

            if sender.send(RegistryCommand::PruneClosed).await.is_err() {
                debug!("Prune task stopping: registry channel closed");
                break;
            }
        }
    });
}
