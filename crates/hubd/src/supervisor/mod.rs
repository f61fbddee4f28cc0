//! Live relay supervisor using the Actor pattern.
//!
//! Owns at most one relay per key. A relay is either a synthetic generator
//! (a timer task sending silent RTP frames) or an external encoder child
//! (ffmpeg or a mic-sender program) writing RTP to the device.
//!
//! ```text
//! SupervisorHandle ──SupervisorCommand──▶ SupervisorActor ──spawn──▶ relay task
//!                                               ▲                       │
//!                                               └──── RelayExited ──────┘
//! ```
//!
//! Stopping cancels the relay task's token: the synthetic generator stops
//! ticking and drops its socket; an external child gets SIGINT and is
//! killed if it is still alive after [`STOP_GRACE`]. A shutdown waits for
//! that to finish.

use tokio::sync::mpsc;

mod actor;
mod commands;
mod handle;
mod relay;

pub use actor::{SupervisorActor, SHUTDOWN_MARGIN};
pub use commands::{
    RelayExit, RelayInfo, RelayStatus, StartOutcome, SupervisorCommand, SupervisorError,
};
pub use handle::SupervisorHandle;
pub use relay::{
    external_command, normalize_input_device, ExternalCommand, LiveSource, StartRequest,
    STOP_GRACE,
};

const COMMAND_BUFFER: usize = 64;

/// Spawns the supervisor actor and returns a handle to it.
///
/// The actor stops, cancelling every relay, once all handles are dropped.
pub fn spawn_supervisor() -> SupervisorHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = SupervisorActor::new(cmd_rx, cmd_tx.downgrade());
    tokio::spawn(actor.run());

    SupervisorHandle::new(cmd_tx)
}
