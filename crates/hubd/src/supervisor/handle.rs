//! Client interface for the SupervisorActor.

use tokio::sync::{mpsc, oneshot};

use hub_core::{DeviceId, Target};

use super::commands::{RelayInfo, RelayStatus, StartOutcome, SupervisorCommand, SupervisorError};
use super::relay::StartRequest;

/// Cheap-to-clone handle to the supervisor actor.
#[derive(Clone)]
pub struct SupervisorHandle {
    sender: mpsc::Sender<SupervisorCommand>,
}

impl SupervisorHandle {
    pub fn new(sender: mpsc::Sender<SupervisorCommand>) -> Self {
        Self { sender }
    }

    /// Starts a relay unless one exists for `request.key`.
    ///
    /// # Errors
    ///
    /// - `SupervisorError::InvalidRequest` for a bad key, port, frame size or address
    /// - `SupervisorError::MissingInputDevice` / `MissingMicSender` for incomplete config
    /// - `SupervisorError::Spawn` / `Bind` if the relay could not be launched
    /// - `SupervisorError::ChannelClosed` if the actor has shut down
    pub async fn start(&self, request: StartRequest) -> Result<StartOutcome, SupervisorError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(SupervisorCommand::Start {
                request,
                respond_to: tx,
            })
            .await
            .map_err(|_| SupervisorError::ChannelClosed)?;

        rx.await.map_err(|_| SupervisorError::ChannelClosed)?
    }

    /// Stops the relay for a key, or every relay for `Target::All`.
    ///
    /// Returns the keys that were stopped; a missing key stops nothing.
    pub async fn stop(&self, target: &Target) -> Result<Vec<DeviceId>, SupervisorError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(SupervisorCommand::Stop {
                target: target.clone(),
                respond_to: tx,
            })
            .await
            .map_err(|_| SupervisorError::ChannelClosed)?;

        rx.await.map_err(|_| SupervisorError::ChannelClosed)
    }

    /// Stops every relay and waits for the children to exit.
    ///
    /// Returns once each child has exited after SIGINT or been killed,
    /// bounded by `STOP_GRACE` plus a small margin.
    pub async fn shutdown(&self) -> Result<Vec<DeviceId>, SupervisorError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(SupervisorCommand::Shutdown { respond_to: tx })
            .await
            .map_err(|_| SupervisorError::ChannelClosed)?;

        rx.await.map_err(|_| SupervisorError::ChannelClosed)
    }

    /// Whether any relay matches `target`. Not running if the actor is gone.
    pub async fn status(&self, target: &Target) -> RelayStatus {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(SupervisorCommand::Status {
                target: target.clone(),
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return RelayStatus::default();
        }

        rx.await.unwrap_or_default()
    }

    pub async fn list(&self) -> Vec<RelayInfo> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(SupervisorCommand::List { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }
}
