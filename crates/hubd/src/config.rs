//! Daemon configuration.
//!
//! Every field has a default so the daemon runs without a config file.
//! The binary layers an optional TOML file, environment variables and
//! command-line flags on top of [`HubConfig::default`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use hub_core::constants::RTP_PT_OPUS;
use hub_core::LiveMode;

use crate::supervisor::LiveSource;

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Full daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Bind address for both listeners
    pub host: String,
    /// Port of the JSON HTTP API
    pub http_port: u16,
    /// Port devices connect to over WebSocket
    pub ws_port: u16,
    /// Host name advertised to clients (empty = not configured)
    pub public_host: String,
    pub live_mode: LiveMode,
    pub ffmpeg_bin: String,
    pub mic_sender_bin: Option<String>,
    pub live_input_format: String,
    pub live_input_device: String,
    /// Run the local RTP debug listener
    pub rtp_debug: bool,
    pub rtp_debug_port: u16,
    pub payload_type: u8,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            http_port: 8080,
            ws_port: 9001,
            public_host: String::new(),
            live_mode: LiveMode::Ffmpeg,
            ffmpeg_bin: "ffmpeg".into(),
            mic_sender_bin: None,
            live_input_format: default_input_format().into(),
            live_input_device: String::new(),
            rtp_debug: false,
            rtp_debug_port: 4000,
            payload_type: RTP_PT_OPUS,
        }
    }
}

/// Capture backend ffmpeg uses on this platform.
pub fn default_input_format() -> &'static str {
    if cfg!(target_os = "windows") {
        "dshow"
    } else if cfg!(target_os = "macos") {
        "avfoundation"
    } else {
        "alsa"
    }
}

impl HubConfig {
    /// Loads a TOML file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn live_capture(&self) -> LiveCaptureConfig {
        LiveCaptureConfig {
            input_format: self.live_input_format.clone(),
            input_device: self.live_input_device.clone(),
        }
    }

    /// Relay source for a start request, using the current capture settings.
    pub fn live_source(&self, capture: &LiveCaptureConfig) -> LiveSource {
        LiveSource {
            mode: self.live_mode,
            ffmpeg_bin: self.ffmpeg_bin.clone(),
            mic_sender_bin: self.mic_sender_bin.clone(),
            input_format: capture.input_format.clone(),
            input_device: capture.input_device.clone(),
            payload_type: self.payload_type,
        }
    }
}

/// Capture settings that can be changed while the daemon runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveCaptureConfig {
    pub input_format: String,
    pub input_device: String,
}

/// Partial update for [`LiveCaptureConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LiveCaptureUpdate {
    #[serde(default)]
    pub input_format: Option<String>,
    #[serde(default)]
    pub input_device: Option<String>,
}

impl LiveCaptureConfig {
    /// Applies an update. An empty format is ignored; an empty device
    /// clears the device.
    pub fn apply(&mut self, update: LiveCaptureUpdate) {
        if let Some(format) = update.input_format {
            let format = format.trim();
            if !format.is_empty() {
                self.input_format = format.to_string();
            }
        }
        if let Some(device) = update.input_device {
            self.input_device = device.trim().to_string();
        }
    }
}
