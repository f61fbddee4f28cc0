//! Control message delivery.
//!
//! The router resolves a [`Target`] to connections through the registry and
//! queues one serialized frame on each. Queuing never waits: a device that
//! is gone or not draining its queue is reported, not retried.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use hub_core::{DeviceId, Target};

use crate::registry::{QueueError, RegistryHandle};

/// Errors returned by [`ControlRouter`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// A single-device target has no open connection.
    #[error("device not connected: {0}")]
    NotConnected(DeviceId),

    /// A single-device target's outbound queue is full.
    #[error("outbound queue full for device: {0}")]
    QueueFull(DeviceId),

    /// The message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// Per-call outcome of a delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Devices the frame was queued for
    pub delivered: Vec<DeviceId>,
    /// Devices addressed but unreachable
    pub skipped: Vec<DeviceId>,
}

impl DeliveryReport {
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }
}

/// Delivers control messages to one or all devices.
#[derive(Clone)]
pub struct ControlRouter {
    registry: RegistryHandle,
}

impl ControlRouter {
    pub fn new(registry: RegistryHandle) -> Self {
        Self { registry }
    }

    /// Serializes `message` once and queues it for every addressed device.
    ///
    /// # Errors
    ///
    /// - `RouteError::Encode` if serialization fails
    /// - `RouteError::NotConnected` / `RouteError::QueueFull` for a
    ///   single-device target that cannot take the frame
    pub async fn deliver<M: Serialize>(
        &self,
        target: &Target,
        message: &M,
    ) -> Result<DeliveryReport, RouteError> {
        let text = serde_json::to_string(message).map_err(|e| RouteError::Encode(e.to_string()))?;
        self.deliver_text(target, text).await
    }

    /// Queues an already-serialized frame.
    pub async fn deliver_text(
        &self,
        target: &Target,
        text: String,
    ) -> Result<DeliveryReport, RouteError> {
        let connections = self.registry.connections(target).await;
        let mut report = DeliveryReport::default();

        match target {
            Target::Device(device_id) => {
                let Some((id, connection)) = connections.into_iter().next() else {
                    debug!(device_id = %device_id, "Target device not registered");
                    return Err(RouteError::NotConnected(device_id.clone()));
                };
                match connection.try_send_text(text) {
                    Ok(()) => report.delivered.push(id),
                    Err(QueueError::Closed) => {
                        debug!(device_id = %id, "Target device connection closed");
                        return Err(RouteError::NotConnected(id));
                    }
                    Err(QueueError::Full) => {
                        warn!(device_id = %id, "Outbound queue full, dropping message");
                        return Err(RouteError::QueueFull(id));
                    }
                }
            }
            Target::All => {
                for (id, connection) in connections {
                    match connection.try_send_text(text.clone()) {
                        Ok(()) => report.delivered.push(id),
                        Err(e) => {
                            debug!(device_id = %id, reason = ?e, "Skipping unreachable device");
                            report.skipped.push(id);
                        }
                    }
                }
            }
        }

        debug!(
            route = %target,
            delivered = report.delivered_count(),
            skipped = report.skipped.len(),
            "Message delivered"
        );
        Ok(report)
    }

    /// Asks the addressed connections to close.
    ///
    /// Registry entries are removed by the connection handlers as their
    /// sockets shut down.
    pub async fn disconnect(&self, target: &Target) -> Result<DeliveryReport, RouteError> {
        let connections = self.registry.connections(target).await;
        let mut report = DeliveryReport::default();

        if let Target::Device(device_id) = target {
            if connections.is_empty() {
                return Err(RouteError::NotConnected(device_id.clone()));
            }
        }

        for (id, connection) in connections {
            match connection.close() {
                Ok(()) => report.delivered.push(id),
                Err(_) => report.skipped.push(id),
            }
        }

        info!(
            route = %target,
            closed = report.delivered_count(),
            "Disconnect requested"
        );
        Ok(report)
    }
}
