//! Speaker hub daemon - device registry, control router and live relays
//!
//! Accepts device WebSocket connections, routes control messages to them
//! and supervises the live audio relays that stream RTP to them.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: HTTP API on :8080, devices on :9001
//! hubd
//!
//! # Synthetic relays, custom ports
//! hubd --live-mode dummy --ws-port 9100 --http-port 8081
//!
//! # Settings from a file, overridden by env and flags
//! WS_PORT=9200 hubd --config hubd.toml
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hub_core::LiveMode;
use hubd::api::ApiServer;
use hubd::config::HubConfig;
use hubd::coordinator::SessionCoordinator;
use hubd::registry::spawn_registry;
use hubd::rtp_debug;
use hubd::server::DeviceServer;
use hubd::supervisor::spawn_supervisor;

/// Speaker hub daemon
#[derive(Parser, Debug)]
#[command(name = "hubd", version, about)]
struct Args {
    /// TOML config file (flags and environment take precedence)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address for both listeners
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// HTTP API port
    #[arg(long, env = "HTTP_PORT")]
    http_port: Option<u16>,

    /// Device WebSocket port
    #[arg(long, env = "WS_PORT")]
    ws_port: Option<u16>,

    /// Host name advertised by /api/server_info
    #[arg(long, env = "PUBLIC_HOST")]
    public_host: Option<String>,

    /// Relay source: dummy, ffmpeg or mic_sender
    #[arg(long, env = "LIVE_MODE")]
    live_mode: Option<LiveMode>,

    /// Path to the mic-sender program
    #[arg(long, env = "MIC_SENDER_BIN")]
    mic_sender_bin: Option<String>,

    /// Path to ffmpeg
    #[arg(long, env = "FFMPEG_BIN")]
    ffmpeg_bin: Option<String>,

    /// ffmpeg capture format (dshow, avfoundation, alsa, ...)
    #[arg(long, env = "LIVE_INPUT_FORMAT")]
    live_input_format: Option<String>,

    /// ffmpeg capture device
    #[arg(long, env = "LIVE_INPUT_DEVICE")]
    live_input_device: Option<String>,

    /// Run the local RTP debug listener
    #[arg(long, env = "RTP_DEBUG", value_parser = clap::builder::BoolishValueParser::new())]
    rtp_debug: bool,

    /// RTP debug listener port
    #[arg(long, env = "RTP_DEBUG_PORT")]
    rtp_debug_port: Option<u16>,
}

impl Args {
    /// Layers flags and environment over the file (or default) config.
    fn into_config(self) -> Result<HubConfig> {
        let mut config = match &self.config {
            Some(path) => HubConfig::from_file(path)?,
            None => HubConfig::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.http_port {
            config.http_port = port;
        }
        if let Some(port) = self.ws_port {
            config.ws_port = port;
        }
        if let Some(public_host) = self.public_host {
            config.public_host = public_host;
        }
        if let Some(mode) = self.live_mode {
            config.live_mode = mode;
        }
        if let Some(bin) = self.mic_sender_bin.filter(|b| !b.trim().is_empty()) {
            config.mic_sender_bin = Some(bin);
        }
        if let Some(bin) = self.ffmpeg_bin.filter(|b| !b.trim().is_empty()) {
            config.ffmpeg_bin = bin;
        }
        if let Some(format) = self.live_input_format.filter(|f| !f.trim().is_empty()) {
            config.live_input_format = format;
        }
        if let Some(device) = self.live_input_device {
            config.live_input_device = device;
        }
        if self.rtp_debug {
            config.rtp_debug = true;
        }
        if let Some(port) = self.rtp_debug_port {
            config.rtp_debug_port = port;
        }

        Ok(config)
    }
}

fn main() -> Result<()> {
    let config = Args::parse().into_config()?;
    run_daemon(config)
}

#[tokio::main(flavor = "current_thread")]
async fn run_daemon(config: HubConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("hubd=info".parse()?)
                .add_directive("hub_core=info".parse()?)
                .add_directive("hub_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        live_mode = %config.live_mode,
        "Speaker hub daemon starting"
    );

    let host: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("Invalid bind address: {}", config.host))?;
    let ws_addr = SocketAddr::new(host, config.ws_port);
    let http_addr = SocketAddr::new(host, config.http_port);

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let registry = spawn_registry();
    info!("Device registry started");

    let supervisor = spawn_supervisor();
    info!("Relay supervisor started");

    if config.rtp_debug {
        let addr = SocketAddr::new(host, config.rtp_debug_port);
        let token = cancel_token.clone();
        tokio::spawn(async move {
            if let Err(e) = rtp_debug::run(addr, token).await {
                warn!(addr = %addr, error = %e, "RTP debug listener failed");
            }
        });
    }

    let coordinator = SessionCoordinator::new(registry.clone(), supervisor, config);

    let device_server = DeviceServer::new(ws_addr, registry, cancel_token.clone());
    let api_server = ApiServer::new(http_addr, coordinator.clone(), cancel_token.clone());

    // A listener failing takes the whole daemon down.
    let ws_token = cancel_token.clone();
    let ws_task = tokio::spawn(async move {
        let result = device_server.run().await;
        if result.is_err() {
            ws_token.cancel();
        }
        result
    });
    let api_token = cancel_token.clone();
    let api_task = tokio::spawn(async move {
        let result = api_server.run().await;
        if result.is_err() {
            api_token.cancel();
        }
        result
    });

    let (ws_result, api_result) = tokio::join!(ws_task, api_task);

    coordinator.shutdown().await;

    let ws_result = ws_result.context("Device server task failed")?;
    let api_result = api_result.context("HTTP API task failed")?;
    if let Err(e) = &ws_result {
        error!(error = %e, "Device server error");
    }
    if let Err(e) = &api_result {
        error!(error = %e, "HTTP API error");
    }
    ws_result?;
    api_result?;

    info!("Speaker hub daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
