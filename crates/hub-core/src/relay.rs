//! Live relay kinds, lifecycle states and capture modes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::DomainError;

/// How live audio is produced for a device.
///
/// Selected from configuration on every start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveMode {
    /// In-process silence generator (debug flow without microphone).
    Dummy,
    /// `ffmpeg` capturing the configured input device.
    #[default]
    Ffmpeg,
    /// Dedicated microphone-capture program.
    #[serde(alias = "mic")]
    MicSender,
}

impl LiveMode {
    /// Relay kind this mode produces.
    pub fn relay_kind(self) -> RelayKind {
        match self {
            Self::Dummy => RelayKind::Synthetic,
            Self::Ffmpeg | Self::MicSender => RelayKind::External,
        }
    }
}

impl FromStr for LiveMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dummy" => Ok(Self::Dummy),
            "ffmpeg" => Ok(Self::Ffmpeg),
            "mic" | "mic_sender" | "mic-sender" => Ok(Self::MicSender),
            other => Err(DomainError::invalid(
                "live_mode",
                other,
                "dummy, ffmpeg or mic_sender",
            )),
        }
    }
}

impl fmt::Display for LiveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dummy => write!(f, "dummy"),
            Self::Ffmpeg => write!(f, "ffmpeg"),
            Self::MicSender => write!(f, "mic_sender"),
        }
    }
}

/// Variant of a running relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayKind {
    /// Timer-driven silence generator inside the daemon.
    Synthetic,
    /// Spawned encoder subprocess.
    External,
}

impl fmt::Display for RelayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synthetic => write!(f, "synthetic"),
            Self::External => write!(f, "external"),
        }
    }
}

/// Lifecycle of a relay.
///
/// ```text
/// Starting ──spawn ok──▶ Running ──stop──▶ Stopping ──exit / grace timeout──▶ Stopped
///     │                     │
///     └──spawn failed───────┴──────── unsolicited exit ─────────────────────▶ Stopped
/// ```
///
/// There is no external start signal for spawned processes, so `Running`
/// is optimistic until an exit is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl RelayState {
    /// Returns true if the state machine allows moving to `next`.
    pub fn can_transition_to(self, next: RelayState) -> bool {
        use RelayState::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Stopped)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Running, Stopped)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}
