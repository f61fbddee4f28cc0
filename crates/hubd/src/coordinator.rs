//! Session coordinator - the entry point for external callers.
//!
//! Combines the control router and the relay supervisor. Live intents
//! report the device notification and the relay action as two independent
//! results: neither is rolled back when the other fails.

use std::net::Ipv4Addr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use hub_core::constants::DEFAULT_FRAME_MS;
use hub_core::{DeviceId, Target};
use hub_protocol::{ServerMessage, StorePolicy};

use crate::config::{HubConfig, LiveCaptureConfig, LiveCaptureUpdate};
use crate::net::local_ipv4_addresses;
use crate::registry::{DeviceSessionView, RegistryHandle};
use crate::router::{ControlRouter, DeliveryReport, RouteError};
use crate::supervisor::{
    RelayInfo, RelayStatus, StartOutcome, StartRequest, SupervisorError, SupervisorHandle,
};

/// Parameters of a live-start intent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LiveStartRequest {
    pub rtp_ip: String,
    pub rtp_port: u16,
    #[serde(default)]
    pub frame_ms: Option<u32>,
}

impl LiveStartRequest {
    /// Frame duration with the default applied for missing or zero values.
    pub fn frame_ms(&self) -> u32 {
        self.frame_ms.filter(|&ms| ms > 0).unwrap_or(DEFAULT_FRAME_MS)
    }
}

/// Parameters of a file-play intent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FilePlayRequest {
    pub url: String,
    /// `cache` or `no-store`; anything else means cache
    #[serde(default)]
    pub store_policy: Option<String>,
}

/// Outcome of a live-start intent.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveOutcome {
    pub notified: Result<DeliveryReport, RouteError>,
    pub relay: Result<StartOutcome, SupervisorError>,
}

/// Outcome of a live-stop intent.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveStopOutcome {
    /// Relay keys that were stopped
    pub stopped: Result<Vec<DeviceId>, SupervisorError>,
    pub notified: Result<DeliveryReport, RouteError>,
}

/// Relay side effect of a raw send.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayAction {
    Started(Result<StartOutcome, SupervisorError>),
    Stopped(Result<Vec<DeviceId>, SupervisorError>),
}

/// Outcome of a raw send.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSendOutcome {
    pub notified: Result<DeliveryReport, RouteError>,
    pub relay: Option<RelayAction>,
}

/// Listener details advertised to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub public_host: String,
    /// Non-loopback IPv4 addresses of this host
    pub addresses: Vec<Ipv4Addr>,
    pub http_port: u16,
    pub ws_port: u16,
}

/// Relay key a target's live stream is stored under.
///
/// `Target::All` maps to the key `all`.
pub fn relay_key(target: &Target) -> DeviceId {
    DeviceId::new(target.as_str())
}

/// Façade over router, registry and supervisor.
#[derive(Clone)]
pub struct SessionCoordinator {
    registry: RegistryHandle,
    router: ControlRouter,
    supervisor: SupervisorHandle,
    config: Arc<HubConfig>,
    capture: Arc<RwLock<LiveCaptureConfig>>,
}

impl SessionCoordinator {
    pub fn new(registry: RegistryHandle, supervisor: SupervisorHandle, config: HubConfig) -> Self {
        let capture = config.live_capture();
        Self {
            router: ControlRouter::new(registry.clone()),
            registry,
            supervisor,
            config: Arc::new(config),
            capture: Arc::new(RwLock::new(capture)),
        }
    }

    // ========================================================================
    // Intents
    // ========================================================================

    /// Notifies the target and starts the matching relay.
    pub async fn live_start(&self, target: &Target, request: LiveStartRequest) -> LiveOutcome {
        let frame_ms = request.frame_ms();
        let message = ServerMessage::live_start(request.rtp_ip.clone(), request.rtp_port, frame_ms);
        let notified = self.router.deliver(target, &message).await;

        let source = {
            let capture = self.capture.read().await;
            self.config.live_source(&capture)
        };
        let relay = self
            .supervisor
            .start(StartRequest {
                key: relay_key(target),
                rtp_ip: request.rtp_ip,
                rtp_port: request.rtp_port,
                frame_ms,
                source,
            })
            .await;

        info!(
            route = %target,
            notified = notified.is_ok(),
            relay = ?relay,
            "Live start handled"
        );
        LiveOutcome { notified, relay }
    }

    /// Stops the matching relay(s) and notifies the target.
    pub async fn live_stop(&self, target: &Target) -> LiveStopOutcome {
        let stopped = self.stop_relays(target).await;
        let notified = self.router.deliver(target, &ServerMessage::live_stop()).await;

        info!(
            route = %target,
            stopped = ?stopped,
            notified = notified.is_ok(),
            "Live stop handled"
        );
        LiveStopOutcome { stopped, notified }
    }

    pub async fn file_play(
        &self,
        target: &Target,
        request: FilePlayRequest,
    ) -> Result<DeliveryReport, RouteError> {
        let policy = StorePolicy::from_hint(request.store_policy.as_deref());
        let message = ServerMessage::file_play(request.url, policy);
        self.router.deliver(target, &message).await
    }

    pub async fn file_stop(&self, target: &Target) -> Result<DeliveryReport, RouteError> {
        self.router.deliver(target, &ServerMessage::file_stop()).await
    }

    pub async fn status_req(&self, target: &Target) -> Result<DeliveryReport, RouteError> {
        self.router.deliver(target, &ServerMessage::status_req()).await
    }

    /// Closes the target's connections. Relays are left running.
    pub async fn disconnect(&self, target: &Target) -> Result<DeliveryReport, RouteError> {
        self.router.disconnect(target).await
    }

    /// Forwards an arbitrary JSON payload.
    ///
    /// A `live_start` payload carrying `rtp_ip` and `rtp_port` also starts
    /// the relay; a `live_stop` payload stops it. The relay action happens
    /// before the payload is delivered.
    pub async fn send_raw(&self, target: &Target, payload: Value) -> RawSendOutcome {
        let relay = match payload.get("type").and_then(Value::as_str) {
            Some("live_start") => match live_endpoint(&payload) {
                Some((rtp_ip, rtp_port, frame_ms)) => {
                    let source = {
                        let capture = self.capture.read().await;
                        self.config.live_source(&capture)
                    };
                    let started = self
                        .supervisor
                        .start(StartRequest {
                            key: relay_key(target),
                            rtp_ip,
                            rtp_port,
                            frame_ms,
                            source,
                        })
                        .await;
                    Some(RelayAction::Started(started))
                }
                None => {
                    debug!(route = %target, "Raw live_start without endpoint, relay not started");
                    None
                }
            },
            Some("live_stop") => Some(RelayAction::Stopped(self.stop_relays(target).await)),
            _ => None,
        };

        let notified = self.router.deliver(target, &payload).await;
        RawSendOutcome { notified, relay }
    }

    async fn stop_relays(&self, target: &Target) -> Result<Vec<DeviceId>, SupervisorError> {
        let stopped = self.supervisor.stop(target).await;
        if let Err(e) = &stopped {
            warn!(route = %target, error = %e, "Relay stop failed");
        }
        stopped
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn live_status(&self, target: &Target) -> RelayStatus {
        self.supervisor.status(target).await
    }

    pub async fn relays(&self) -> Vec<RelayInfo> {
        self.supervisor.list().await
    }

    pub async fn devices(&self) -> Vec<DeviceId> {
        self.registry.list().await
    }

    pub async fn sessions(&self) -> Vec<DeviceSessionView> {
        self.registry.sessions().await
    }

    pub async fn live_config(&self) -> LiveCaptureConfig {
        self.capture.read().await.clone()
    }

    pub async fn update_live_config(&self, update: LiveCaptureUpdate) -> LiveCaptureConfig {
        let mut capture = self.capture.write().await;
        capture.apply(update);
        info!(
            input_format = %capture.input_format,
            input_device = %capture.input_device,
            "Live capture config updated"
        );
        capture.clone()
    }

    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            public_host: self.config.public_host.clone(),
            addresses: local_ipv4_addresses(),
            http_port: self.config.http_port,
            ws_port: self.config.ws_port,
        }
    }

    /// Stops every relay and waits for the children to exit. Called once
    /// on daemon shutdown.
    pub async fn shutdown(&self) {
        match self.supervisor.shutdown().await {
            Ok(stopped) => info!(stopped = stopped.len(), "All relays stopped"),
            Err(e) => warn!(error = %e, "Relay sweep failed during shutdown"),
        }
    }
}

/// Reads `rtp_ip`, `rtp_port` and `frame_ms` from a raw payload.
///
/// The port may be a number or a numeric string.
fn live_endpoint(payload: &Value) -> Option<(String, u16, u32)> {
    let rtp_ip = payload
        .get("rtp_ip")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|ip| !ip.is_empty())?
        .to_string();

    let rtp_port = match payload.get("rtp_port")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .and_then(|p| u16::try_from(p).ok())
    .filter(|&p| p > 0)?;

    let frame_ms = payload
        .get("frame_ms")
        .and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        })
        .and_then(|ms| u32::try_from(ms).ok())
        .filter(|&ms| ms > 0)
        .unwrap_or(DEFAULT_FRAME_MS);

    Some((rtp_ip, rtp_port, frame_ms))
}
