//! Hub Protocol - Control messages exchanged with playback devices
//!
//! Every message is one JSON object per WebSocket text frame, tagged by
//! its `type` field. The server sends intents (`hello`, `live_start`,
//! `live_stop`, `file_play`, `file_stop`, `status_req`); devices send
//! `register` to rename themselves and may send anything else, which the
//! server logs and ignores.

pub mod message;
pub mod parse;
pub mod version;

pub use message::{AudioCodec, DeviceMessage, ServerMessage, SessionId, StorePolicy};
pub use parse::{parse_device_frame, InboundFrame};
pub use version::ProtocolVersion;
