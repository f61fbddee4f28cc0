//! Integration tests for the relay supervisor.
//!
//! Starts real relays against a local UDP socket and real child processes
//! through SupervisorHandle.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use hub_core::{DeviceId, LiveMode, RelayKind, RtpHeader, Target};
use hubd::supervisor::{
    spawn_supervisor, LiveSource, StartOutcome, StartRequest, SupervisorError, SupervisorHandle,
    SHUTDOWN_MARGIN, STOP_GRACE,
};
use tokio::net::UdpSocket;
use tokio::time::timeout;

// ============================================================================
// Test Helpers
// ============================================================================

fn request(key: &str, port: u16, source: LiveSource) -> StartRequest {
    StartRequest {
        key: DeviceId::new(key),
        rtp_ip: "127.0.0.1".to_string(),
        rtp_port: port,
        frame_ms: 20,
        source,
    }
}

fn dummy() -> LiveSource {
    LiveSource::default()
}

fn ffmpeg(bin: &str) -> LiveSource {
    LiveSource {
        mode: LiveMode::Ffmpeg,
        ffmpeg_bin: bin.to_string(),
        input_format: "alsa".to_string(),
        input_device: "default".to_string(),
        ..LiveSource::default()
    }
}

/// Writes an executable shell script into `dir`.
#[cfg(unix)]
fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
fn mic_sender(script: &Path) -> LiveSource {
    LiveSource {
        mode: LiveMode::MicSender,
        mic_sender_bin: Some(script.to_string_lossy().into_owned()),
        ..LiveSource::default()
    }
}

/// Whether `pid` still names a live (unreaped) process.
#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    // SAFETY: signal 0 only checks for existence
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Reads the pid a script wrote, waiting for the file to appear.
#[cfg(unix)]
async fn read_pid(path: &Path) -> i32 {
    for _ in 0..50 {
        if let Ok(text) = std::fs::read_to_string(path) {
            if let Ok(pid) = text.trim().parse() {
                return pid;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("script never wrote {}", path.display());
}

/// Polls until the relay for `key` is no longer running.
async fn wait_until_stopped(supervisor: &SupervisorHandle, key: &str) -> bool {
    let target = Target::device(key);
    for _ in 0..50 {
        if !supervisor.status(&target).await.running {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

// ============================================================================
// Synthetic Relay Tests
// ============================================================================

#[tokio::test]
async fn test_dummy_relay_emits_paced_rtp() {
    let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = receiver.local_addr().unwrap().port();
    let supervisor = spawn_supervisor();

    let outcome = supervisor.start(request("kitchen", port, dummy())).await.unwrap();
    assert_eq!(
        outcome,
        StartOutcome::Started {
            kind: RelayKind::Synthetic
        }
    );

    let mut buf = [0u8; 2048];
    let mut headers = Vec::new();
    let started = Instant::now();
    for _ in 0..6 {
        let (len, _) = timeout(Duration::from_secs(1), receiver.recv_from(&mut buf))
            .await
            .expect("packet should arrive")
            .unwrap();
        assert_eq!(buf[0], 0x80);
        assert_eq!(buf[1] & 0x7f, 111);
        headers.push(RtpHeader::parse(&buf[..len]).expect("valid RTP"));
    }
    let elapsed = started.elapsed();

    for pair in headers.windows(2) {
        assert_eq!(pair[1].sequence, pair[0].sequence.wrapping_add(1));
        assert_eq!(pair[1].timestamp, pair[0].timestamp.wrapping_add(320));
    }
    // Five intervals of 20 ms after the first immediate tick.
    assert!(elapsed >= Duration::from_millis(80), "too fast: {elapsed:?}");

    let stopped = supervisor.stop(&Target::device("kitchen")).await.unwrap();
    assert_eq!(stopped, vec![DeviceId::new("kitchen")]);
    assert!(!supervisor.status(&Target::device("kitchen")).await.running);
}

#[tokio::test]
async fn test_double_start_reports_already_running() {
    let supervisor = spawn_supervisor();

    let first = supervisor.start(request("hall", 5004, dummy())).await.unwrap();
    assert!(matches!(first, StartOutcome::Started { .. }));

    let second = supervisor.start(request("hall", 5006, dummy())).await.unwrap();
    assert_eq!(second, StartOutcome::AlreadyRunning);

    let relays = supervisor.list().await;
    assert_eq!(relays.len(), 1);
    assert_eq!(relays[0].rtp_port, 5004);

    supervisor.stop(&Target::All).await.unwrap();
}

#[tokio::test]
async fn test_stop_all_sweeps_every_relay() {
    let supervisor = spawn_supervisor();
    supervisor.start(request("b", 5004, dummy())).await.unwrap();
    supervisor.start(request("a", 5006, dummy())).await.unwrap();
    assert!(supervisor.status(&Target::All).await.running);

    let stopped = supervisor.stop(&Target::All).await.unwrap();
    assert_eq!(stopped, vec![DeviceId::new("a"), DeviceId::new("b")]);
    assert!(!supervisor.status(&Target::All).await.running);
    assert!(supervisor.list().await.is_empty());
}

#[tokio::test]
async fn test_stop_unknown_key_is_noop() {
    let supervisor = spawn_supervisor();
    let stopped = supervisor.stop(&Target::device("ghost")).await.unwrap();
    assert!(stopped.is_empty());
}

// ============================================================================
// External Relay Tests
// ============================================================================

#[tokio::test]
async fn test_missing_binary_reports_spawn_error() {
    let supervisor = spawn_supervisor();
    let err = supervisor
        .start(request("kitchen", 5004, ffmpeg("/nonexistent/ffmpeg-binary")))
        .await
        .unwrap_err();

    assert!(matches!(err, SupervisorError::Spawn { .. }));
    assert!(!supervisor.status(&Target::device("kitchen")).await.running);
}

#[tokio::test]
async fn test_missing_input_device_rejected() {
    let supervisor = spawn_supervisor();
    let mut source = ffmpeg("ffmpeg");
    source.input_device = String::new();

    let err = supervisor
        .start(request("kitchen", 5004, source))
        .await
        .unwrap_err();
    assert_eq!(err, SupervisorError::MissingInputDevice);
    assert!(supervisor.list().await.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_exited_child_is_reaped() {
    let supervisor = spawn_supervisor();
    let outcome = supervisor.start(request("kitchen", 5004, ffmpeg("true"))).await.unwrap();
    assert_eq!(
        outcome,
        StartOutcome::Started {
            kind: RelayKind::External
        }
    );

    assert!(
        wait_until_stopped(&supervisor, "kitchen").await,
        "exited child should leave the table"
    );

    // The key is free again once the child is gone.
    let again = supervisor.start(request("kitchen", 5004, dummy())).await.unwrap();
    assert!(matches!(again, StartOutcome::Started { .. }));
    supervisor.shutdown().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_mic_sender_exits_on_sigint() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("pid");
    let script = write_script(
        dir.path(),
        "mic_sender.sh",
        &format!(
            "trap 'exit 0' INT\necho $$ > '{}'\nwhile true; do sleep 0.05; done\n",
            pid_file.display()
        ),
    );

    let supervisor = spawn_supervisor();
    supervisor.start(request("porch", 5004, mic_sender(&script))).await.unwrap();
    let pid = read_pid(&pid_file).await;
    assert!(supervisor.status(&Target::device("porch")).await.running);

    let stopped = supervisor.stop(&Target::device("porch")).await.unwrap();
    assert_eq!(stopped, vec![DeviceId::new("porch")]);
    assert!(!supervisor.status(&Target::device("porch")).await.running);

    // Well inside the grace period: the child left on SIGINT alone.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!process_alive(pid), "child should exit on SIGINT");
}

#[cfg(unix)]
#[tokio::test]
async fn test_child_ignoring_sigint_is_killed_after_grace() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("pid");
    let script = write_script(
        dir.path(),
        "stubborn.sh",
        &format!(
            "trap '' INT\necho $$ > '{}'\nwhile true; do sleep 0.05; done\n",
            pid_file.display()
        ),
    );

    let supervisor = spawn_supervisor();
    supervisor.start(request("porch", 5004, mic_sender(&script))).await.unwrap();
    let pid = read_pid(&pid_file).await;

    supervisor.stop(&Target::device("porch")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(process_alive(pid), "child should survive SIGINT within the grace");

    tokio::time::sleep(STOP_GRACE).await;
    assert!(!process_alive(pid), "child should be killed after the grace");
}

#[cfg(unix)]
#[tokio::test]
async fn test_shutdown_waits_for_graceful_exit() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("pid");
    let marker = dir.path().join("done");
    let script = write_script(
        dir.path(),
        "slow_exit.sh",
        &format!(
            "trap 'sleep 0.3; touch \"{}\"; exit 0' INT\necho $$ > '{}'\nwhile true; do sleep 0.05; done\n",
            marker.display(),
            pid_file.display()
        ),
    );

    let supervisor = spawn_supervisor();
    supervisor.start(request("porch", 5004, mic_sender(&script))).await.unwrap();
    let pid = read_pid(&pid_file).await;

    let started = Instant::now();
    let stopped = supervisor.shutdown().await.unwrap();

    assert_eq!(stopped, vec![DeviceId::new("porch")]);
    assert!(marker.exists(), "SIGINT handler should finish before shutdown returns");
    assert!(!process_alive(pid));
    assert!(started.elapsed() < STOP_GRACE + SHUTDOWN_MARGIN);
}
