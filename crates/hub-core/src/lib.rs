//! Hub Core - Shared types for the speaker-hub control plane
//!
//! This crate provides the domain types shared between the daemon
//! (`hubd`) and the wire protocol (`hub-protocol`):
//! - `device` - device identifiers and delivery targets
//! - `relay` - live relay kinds, states and capture modes
//! - `rtp` - minimal RTP packet framing for Opus payloads
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod device;
pub mod error;
pub mod relay;
pub mod rtp;

// Re-exports for convenience
pub use device::{DeviceId, Target, ALL_TARGET, ANON_DEVICE_PREFIX};
pub use error::{DomainError, DomainResult};
pub use relay::{LiveMode, RelayKind, RelayState};
pub use rtp::{build_packet, RtpHeader, RtpPacketizer, RTP_HEADER_LEN};

/// Live-audio defaults shared by the daemon and the protocol.
pub mod constants {
    /// Default frame duration in milliseconds.
    pub const DEFAULT_FRAME_MS: u32 = 20;

    /// Default sample rate announced to devices and used for capture.
    pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

    /// Dynamic RTP payload type used for Opus.
    pub const RTP_PT_OPUS: u8 = 111;

    /// Fixed synchronization source identifier.
    pub const RTP_SSRC: u32 = 0x1234_5678;

    /// Payload size of a synthetic silence frame.
    pub const DUMMY_PAYLOAD_SIZE: usize = 40;

    /// Opus bitrate passed to external encoders.
    pub const LIVE_BITRATE: u32 = 32_000;
}
