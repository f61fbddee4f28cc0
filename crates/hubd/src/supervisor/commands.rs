//! Supervisor actor commands, results and errors.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::oneshot;

use hub_core::{DeviceId, RelayKind, RelayState, Target};

use super::relay::StartRequest;

// ============================================================================
// Supervisor Commands
// ============================================================================

/// Commands sent to the supervisor actor.
#[derive(Debug)]
pub enum SupervisorCommand {
    /// Start a relay unless one already exists for the key.
    Start {
        request: StartRequest,
        respond_to: oneshot::Sender<Result<StartOutcome, SupervisorError>>,
    },

    /// Stop one relay, or every relay for `Target::All`.
    Stop {
        target: Target,
        /// Keys that were stopped
        respond_to: oneshot::Sender<Vec<DeviceId>>,
    },

    /// Stop every relay and wait for the relay tasks to finish.
    ///
    /// Answered once every child has exited or the shutdown deadline passed.
    Shutdown {
        respond_to: oneshot::Sender<Vec<DeviceId>>,
    },

    Status {
        target: Target,
        respond_to: oneshot::Sender<RelayStatus>,
    },

    List {
        respond_to: oneshot::Sender<Vec<RelayInfo>>,
    },

    /// Sent by a relay task when its child exited on its own.
    ///
    /// Ignored unless `generation` matches the current entry for `key`.
    RelayExited {
        key: DeviceId,
        generation: u64,
        exit: RelayExit,
    },
}

// ============================================================================
// Results
// ============================================================================

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { kind: RelayKind },
    AlreadyRunning,
}

/// Answer to a status query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStatus {
    pub running: bool,
}

/// Snapshot of one relay entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayInfo {
    pub key: DeviceId,
    pub kind: RelayKind,
    pub state: RelayState,
    pub rtp_ip: String,
    pub rtp_port: u16,
    pub frame_ms: u32,
    pub started_at: DateTime<Utc>,
}

/// How a relay child ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayExit {
    /// Exit code, if the child exited normally
    pub code: Option<i32>,
    /// Terminating signal on unix
    pub signal: Option<i32>,
    /// Set when waiting on the child failed
    pub error: Option<String>,
}

impl RelayExit {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            error: None,
        }
    }

    pub fn from_error(error: &std::io::Error) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

// ============================================================================
// Supervisor Errors
// ============================================================================

/// Errors that can occur during supervisor operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    /// The start request failed validation.
    #[error("invalid relay request: {0}")]
    InvalidRequest(String),

    /// ffmpeg mode needs a capture device.
    #[error("live input device is not configured")]
    MissingInputDevice,

    /// mic-sender mode needs a binary path.
    #[error("mic sender binary is not configured")]
    MissingMicSender,

    /// The relay program could not be started.
    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// The synthetic relay's UDP socket could not be created.
    #[error("failed to bind relay socket: {0}")]
    Bind(String),

    /// The response channel was closed before receiving a response.
    #[error("response channel closed")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_outcome_serializes_tagged() {
        let json = serde_json::to_value(StartOutcome::Started {
            kind: RelayKind::Synthetic,
        })
        .unwrap();
        assert_eq!(json["outcome"], "started");
        assert_eq!(json["kind"], "synthetic");

        let json = serde_json::to_value(StartOutcome::AlreadyRunning).unwrap();
        assert_eq!(json["outcome"], "already_running");
    }

    #[test]
    fn test_supervisor_error_display() {
        let err = SupervisorError::Spawn {
            program: "ffmpeg".to_string(),
            reason: "No such file or directory".to_string(),
        };
        assert_eq!(err.to_string(), "failed to spawn ffmpeg: No such file or directory");
        assert_eq!(
            SupervisorError::MissingInputDevice.to_string(),
            "live input device is not configured"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_relay_exit_from_status() {
        use std::os::unix::process::ExitStatusExt;

        let exit = RelayExit::from_status(std::process::ExitStatus::from_raw(3 << 8));
        assert_eq!(exit.code, Some(3));
        assert_eq!(exit.signal, None);

        let exit = RelayExit::from_status(std::process::ExitStatus::from_raw(libc::SIGINT));
        assert_eq!(exit.code, None);
        assert_eq!(exit.signal, Some(libc::SIGINT));
    }
}
