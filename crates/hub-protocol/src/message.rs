//! Protocol message types for device communication.

use std::fmt;

use chrono::Utc;
use hub_core::constants::{DEFAULT_FRAME_MS, DEFAULT_SAMPLE_RATE};
use hub_core::DeviceId;
use serde::{Deserialize, Serialize};

use crate::version::ProtocolVersion;

/// Opaque correlation id attached to intents: `<prefix>-<unix millis>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a SessionId from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh id stamped with the current time.
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}-{}", Utc::now().timestamp_millis()))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Codec named in playback intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Opus,
    Mp3,
}

/// Whether a device may keep a downloaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StorePolicy {
    #[default]
    #[serde(rename = "cache")]
    Cache,
    #[serde(rename = "no-store")]
    NoStore,
}

impl StorePolicy {
    /// Lenient parse: anything other than `no-store` means cache.
    pub fn from_hint(hint: Option<&str>) -> Self {
        match hint {
            Some("no-store") => Self::NoStore,
            _ => Self::Cache,
        }
    }
}

/// Messages sent from the server to devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once on connect with the id the device is registered under
    Hello { device_id: DeviceId },

    /// Start receiving live RTP audio on the given endpoint
    LiveStart {
        proto_ver: ProtocolVersion,
        session_id: SessionId,
        rtp_ip: String,
        rtp_port: u16,
        codec: AudioCodec,
        sample_rate: u32,
        frame_ms: u32,
    },

    /// Stop live playback
    LiveStop {
        proto_ver: ProtocolVersion,
        session_id: SessionId,
    },

    /// Fetch and play a file
    FilePlay {
        proto_ver: ProtocolVersion,
        session_id: SessionId,
        url: String,
        codec: AudioCodec,
        auto_play: bool,
        store_policy: StorePolicy,
    },

    /// Stop file playback
    FileStop {
        proto_ver: ProtocolVersion,
        session_id: SessionId,
    },

    /// Ask the device to report its status
    StatusReq { proto_ver: ProtocolVersion },
}

impl ServerMessage {
    /// Creates a hello message.
    pub fn hello(device_id: DeviceId) -> Self {
        Self::Hello { device_id }
    }

    /// Creates a live start intent for an Opus stream.
    ///
    /// `frame_ms` of zero falls back to the default frame duration.
    pub fn live_start(rtp_ip: impl Into<String>, rtp_port: u16, frame_ms: u32) -> Self {
        Self::LiveStart {
            proto_ver: ProtocolVersion::CURRENT,
            session_id: SessionId::generate("live"),
            rtp_ip: rtp_ip.into(),
            rtp_port,
            codec: AudioCodec::Opus,
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_ms: if frame_ms == 0 { DEFAULT_FRAME_MS } else { frame_ms },
        }
    }

    /// Creates a live stop intent.
    pub fn live_stop() -> Self {
        Self::LiveStop {
            proto_ver: ProtocolVersion::CURRENT,
            session_id: SessionId::generate("live"),
        }
    }

    /// Creates a file play intent for an MP3 url.
    pub fn file_play(url: impl Into<String>, store_policy: StorePolicy) -> Self {
        Self::FilePlay {
            proto_ver: ProtocolVersion::CURRENT,
            session_id: SessionId::generate("file"),
            url: url.into(),
            codec: AudioCodec::Mp3,
            auto_play: true,
            store_policy,
        }
    }

    /// Creates a file stop intent.
    pub fn file_stop() -> Self {
        Self::FileStop {
            proto_ver: ProtocolVersion::CURRENT,
            session_id: SessionId::generate("file"),
        }
    }

    /// Creates a status request.
    pub fn status_req() -> Self {
        Self::StatusReq {
            proto_ver: ProtocolVersion::CURRENT,
        }
    }
}

/// Messages sent from devices to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    /// Device announces its self-chosen identity
    Register { device_id: String },

    /// Any other message type (status reports, acks); logged only
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_hello_serialization() {
        let msg = ServerMessage::hello(DeviceId::new("anon-1"));
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"hello","device_id":"anon-1"}"#);
    }

    #[test]
    fn test_live_start_fields() {
        let msg = ServerMessage::live_start("10.0.0.5", 5004, 20);
        let value: Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "live_start");
        assert_eq!(value["proto_ver"], 1);
        assert_eq!(value["rtp_ip"], "10.0.0.5");
        assert_eq!(value["rtp_port"], 5004);
        assert_eq!(value["codec"], "opus");
        assert_eq!(value["sample_rate"], 16_000);
        assert_eq!(value["frame_ms"], 20);
        assert!(value["session_id"].as_str().unwrap().starts_with("live-"));
    }

    #[test]
    fn test_live_start_zero_frame_uses_default() {
        match ServerMessage::live_start("10.0.0.5", 5004, 0) {
            ServerMessage::LiveStart { frame_ms, .. } => assert_eq!(frame_ms, DEFAULT_FRAME_MS),
            other => panic!("Expected LiveStart, got {other:?}"),
        }
    }

    #[test]
    fn test_file_play_fields() {
        let msg = ServerMessage::file_play("http://hub/media/a.mp3", StorePolicy::NoStore);
        let value: Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "file_play");
        assert_eq!(value["codec"], "mp3");
        assert_eq!(value["auto_play"], true);
        assert_eq!(value["store_policy"], "no-store");
        assert!(value["session_id"].as_str().unwrap().starts_with("file-"));
    }

    #[test]
    fn test_status_req_has_no_session() {
        let value: Value = serde_json::to_value(ServerMessage::status_req()).unwrap();
        assert_eq!(value, serde_json::json!({"type": "status_req", "proto_ver": 1}));
    }

    #[test]
    fn test_store_policy_hint() {
        assert_eq!(StorePolicy::from_hint(Some("no-store")), StorePolicy::NoStore);
        assert_eq!(StorePolicy::from_hint(Some("whatever")), StorePolicy::Cache);
        assert_eq!(StorePolicy::from_hint(None), StorePolicy::Cache);
    }

    #[test]
    fn test_device_message_register() {
        let msg: DeviceMessage =
            serde_json::from_str(r#"{"type":"register","device_id":"kitchen"}"#).unwrap();
        assert_eq!(
            msg,
            DeviceMessage::Register {
                device_id: "kitchen".to_string()
            }
        );
    }

    #[test]
    fn test_device_message_unknown_type() {
        let msg: DeviceMessage =
            serde_json::from_str(r#"{"type":"status","playing":true}"#).unwrap();
        assert_eq!(msg, DeviceMessage::Other);
    }
}
