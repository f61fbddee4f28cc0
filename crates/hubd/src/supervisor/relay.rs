//! Relay launch: request validation, command construction and the tasks
//! that drive a synthetic generator or supervise an encoder child.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::UdpSocket;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use hub_core::constants::{DEFAULT_SAMPLE_RATE, DUMMY_PAYLOAD_SIZE, LIVE_BITRATE};
use hub_core::{DeviceId, LiveMode, RelayState, RtpPacketizer};

use super::commands::{RelayExit, SupervisorCommand, SupervisorError};

/// Time a child gets to exit after SIGINT before it is killed.
pub const STOP_GRACE: Duration = Duration::from_secs(1);

/// Where live audio comes from, snapshotted per start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSource {
    pub mode: LiveMode,
    pub ffmpeg_bin: String,
    pub mic_sender_bin: Option<String>,
    pub input_format: String,
    pub input_device: String,
    pub payload_type: u8,
}

impl Default for LiveSource {
    fn default() -> Self {
        Self {
            mode: LiveMode::Dummy,
            ffmpeg_bin: "ffmpeg".to_string(),
            mic_sender_bin: None,
            input_format: String::new(),
            input_device: String::new(),
            payload_type: hub_core::constants::RTP_PT_OPUS,
        }
    }
}

/// Parameters for one relay start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub key: DeviceId,
    pub rtp_ip: String,
    pub rtp_port: u16,
    pub frame_ms: u32,
    pub source: LiveSource,
}

impl StartRequest {
    /// Checks the request and returns the parsed destination address.
    pub fn validate(&self) -> Result<SocketAddr, SupervisorError> {
        if self.key.as_str().trim().is_empty() {
            return Err(SupervisorError::InvalidRequest("relay key is empty".to_string()));
        }
        if self.rtp_port == 0 {
            return Err(SupervisorError::InvalidRequest("rtp_port must be 1-65535".to_string()));
        }
        if self.frame_ms == 0 {
            return Err(SupervisorError::InvalidRequest("frame_ms must be positive".to_string()));
        }
        let ip: IpAddr = self.rtp_ip.trim().parse().map_err(|_| {
            SupervisorError::InvalidRequest(format!("rtp_ip is not an IP address: {}", self.rtp_ip))
        })?;
        Ok(SocketAddr::new(ip, self.rtp_port))
    }
}

/// Strips quoting from a dshow-style `audio="Name"` device string.
///
/// Arguments are passed without a shell, so quotes would reach the
/// capture program literally.
pub fn normalize_input_device(device: &str) -> String {
    let trimmed = device.trim();
    if let Some(rest) = trimmed.strip_prefix("audio=") {
        let name = rest.trim();
        let name = name
            .strip_prefix('"')
            .and_then(|n| n.strip_suffix('"'))
            .unwrap_or(name);
        return format!("audio={name}");
    }
    trimmed
        .strip_prefix('"')
        .and_then(|n| n.strip_suffix('"'))
        .unwrap_or(trimmed)
        .to_string()
}

/// Program and argument list for an external relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Builds the encoder command line for `request`.
///
/// # Errors
///
/// - `SupervisorError::MissingInputDevice` for ffmpeg without a device
/// - `SupervisorError::MissingMicSender` for mic-sender without a binary
/// - `SupervisorError::InvalidRequest` for the synthetic mode
pub fn external_command(
    request: &StartRequest,
    dest: SocketAddr,
) -> Result<ExternalCommand, SupervisorError> {
    let source = &request.source;
    match source.mode {
        LiveMode::Ffmpeg => {
            let device = normalize_input_device(&source.input_device);
            if device.is_empty() {
                return Err(SupervisorError::MissingInputDevice);
            }
            let sample_rate = DEFAULT_SAMPLE_RATE.to_string();
            let bitrate = LIVE_BITRATE.to_string();
            let frame_ms = request.frame_ms.to_string();
            let payload_type = (source.payload_type & 0x7f).to_string();
            let url = format!("rtp://{dest}");
            let args = [
                "-hide_banner",
                "-loglevel",
                "info",
                "-f",
                source.input_format.as_str(),
                "-i",
                device.as_str(),
                "-vn",
                "-ac",
                "1",
                "-ar",
                sample_rate.as_str(),
                "-c:a",
                "libopus",
                "-application",
                "lowdelay",
                "-b:a",
                bitrate.as_str(),
                "-vbr",
                "constrained",
                "-frame_duration",
                frame_ms.as_str(),
                "-payload_type",
                payload_type.as_str(),
                "-f",
                "rtp",
                url.as_str(),
            ]
            .iter()
            .map(|s| s.to_string())
            .collect();

            Ok(ExternalCommand {
                program: source.ffmpeg_bin.clone(),
                args,
            })
        }
        LiveMode::MicSender => {
            let program = source
                .mic_sender_bin
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .ok_or(SupervisorError::MissingMicSender)?;

            let mut args = vec![
                "--ip".to_string(),
                dest.ip().to_string(),
                "--port".to_string(),
                dest.port().to_string(),
            ];
            let device = normalize_input_device(&source.input_device);
            if !device.is_empty() {
                args.push("--device".to_string());
                args.push(device);
            }

            Ok(ExternalCommand {
                program: program.to_string(),
                args,
            })
        }
        LiveMode::Dummy => Err(SupervisorError::InvalidRequest(
            "dummy mode has no external command".to_string(),
        )),
    }
}

// ============================================================================
// Synthetic relay
// ============================================================================

/// Binds a UDP socket and spawns the timer task emitting silent frames.
pub fn launch_synthetic(
    request: &StartRequest,
    dest: SocketAddr,
    cancel: CancellationToken,
    tasks: &TaskTracker,
) -> Result<(), SupervisorError> {
    let bind_addr = match dest {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    };

    let std_socket =
        std::net::UdpSocket::bind(bind_addr).map_err(|e| SupervisorError::Bind(e.to_string()))?;
    std_socket
        .set_nonblocking(true)
        .map_err(|e| SupervisorError::Bind(e.to_string()))?;
    let socket = UdpSocket::from_std(std_socket).map_err(|e| SupervisorError::Bind(e.to_string()))?;

    let packetizer = RtpPacketizer::new(
        request.source.payload_type,
        DEFAULT_SAMPLE_RATE,
        request.frame_ms,
    );

    tasks.spawn(run_synthetic(
        socket,
        dest,
        packetizer,
        request.frame_ms,
        request.key.clone(),
        cancel,
    ));
    Ok(())
}

async fn run_synthetic(
    socket: UdpSocket,
    dest: SocketAddr,
    mut packetizer: RtpPacketizer,
    frame_ms: u32,
    key: DeviceId,
    cancel: CancellationToken,
) {
    let mut ticker = interval(Duration::from_millis(u64::from(frame_ms)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let payload = [0u8; DUMMY_PAYLOAD_SIZE];
    let mut sent: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let packet = packetizer.next_packet(&payload);
                match socket.send_to(&packet, dest).await {
                    Ok(_) => sent += 1,
                    Err(e) => debug!(key = %key, error = %e, "Synthetic relay send failed"),
                }
            }
        }
    }

    info!(key = %key, packets = sent, state = %RelayState::Stopped, "Synthetic relay stopped");
}

// ============================================================================
// External relay
// ============================================================================

/// Spawns the encoder child and the task supervising it.
///
/// The child is killed if its supervising task is dropped.
pub fn launch_external(
    request: &StartRequest,
    command: ExternalCommand,
    generation: u64,
    cancel: CancellationToken,
    exits: mpsc::WeakSender<SupervisorCommand>,
    tasks: &TaskTracker,
) -> Result<u32, SupervisorError> {
    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SupervisorError::Spawn {
            program: command.program.clone(),
            reason: e.to_string(),
        })?;

    let pid = child.id().unwrap_or_default();

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(drain_output(stdout, request.key.clone(), "stdout"));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(drain_output(stderr, request.key.clone(), "stderr"));
    }

    tasks.spawn(supervise_child(
        child,
        request.key.clone(),
        generation,
        cancel,
        exits,
    ));

    Ok(pid)
}

/// Logs a child output stream line by line until it closes.
async fn drain_output<R>(stream: R, key: DeviceId, stream_name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if stream_name == "stderr" {
                    info!(target: "relay", key = %key, "{line}");
                } else {
                    debug!(target: "relay", key = %key, "{line}");
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(target: "relay", key = %key, stream = stream_name, error = %e, "Output read failed");
                break;
            }
        }
    }
}

/// Waits for the child to exit or for a stop request.
async fn supervise_child(
    mut child: Child,
    key: DeviceId,
    generation: u64,
    cancel: CancellationToken,
    exits: mpsc::WeakSender<SupervisorCommand>,
) {
    let waited = tokio::select! {
        result = child.wait() => Some(result),
        _ = cancel.cancelled() => None,
    };

    match waited {
        Some(result) => {
            let exit = match result {
                Ok(status) => RelayExit::from_status(status),
                Err(e) => RelayExit::from_error(&e),
            };
            if let Some(sender) = exits.upgrade() {
                let _ = sender
                    .send(SupervisorCommand::RelayExited {
                        key,
                        generation,
                        exit,
                    })
                    .await;
            }
        }
        None => stop_child(&mut child, &key).await,
    }
}

/// SIGINT, then a forced kill once the grace period runs out.
async fn stop_child(child: &mut Child, key: &DeviceId) {
    debug!(key = %key, state = %RelayState::Stopping, "Stopping relay child");

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: plain signal delivery to a child we spawned and still own
        let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
        if result != 0 {
            debug!(key = %key, pid, "SIGINT delivery failed");
        }
    }

    match tokio::time::timeout(STOP_GRACE, child.wait()).await {
        Ok(Ok(status)) => {
            info!(
                key = %key,
                exit = ?RelayExit::from_status(status),
                state = %RelayState::Stopped,
                "Relay child stopped"
            );
        }
        Ok(Err(e)) => warn!(key = %key, error = %e, "Waiting for relay child failed"),
        Err(_) => {
            warn!(key = %key, grace = ?STOP_GRACE, "Relay child ignored SIGINT, killing");
            if let Err(e) = child.kill().await {
                warn!(key = %key, error = %e, "Failed to kill relay child");
            } else {
                info!(key = %key, state = %RelayState::Stopped, "Relay child killed");
            }
        }
    }
}
