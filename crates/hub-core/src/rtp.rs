//! Minimal RTP framing for Opus payloads.
//!
//! Only the fixed 12-byte header is produced: version 2, no padding,
//! no extension, no CSRC list, marker bit clear.
//!
//! ```text
//!  0                   1                   2                   3
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use crate::constants::{RTP_PT_OPUS, RTP_SSRC};

/// Length of the fixed RTP header.
pub const RTP_HEADER_LEN: usize = 12;

/// First header byte: version 2, no padding/extension/CSRC.
const RTP_VERSION_BYTE: u8 = 0x80;

/// Fixed RTP header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Header for the default Opus payload type and SSRC.
    pub fn opus(sequence: u16, timestamp: u32) -> Self {
        Self {
            payload_type: RTP_PT_OPUS,
            sequence,
            timestamp,
            ssrc: RTP_SSRC,
        }
    }

    /// Serialises the header into its 12-byte wire form.
    pub fn to_bytes(&self) -> [u8; RTP_HEADER_LEN] {
        let seq = self.sequence.to_be_bytes();
        let ts = self.timestamp.to_be_bytes();
        let ssrc = self.ssrc.to_be_bytes();
        [
            RTP_VERSION_BYTE,
            self.payload_type & 0x7f,
            seq[0],
            seq[1],
            ts[0],
            ts[1],
            ts[2],
            ts[3],
            ssrc[0],
            ssrc[1],
            ssrc[2],
            ssrc[3],
        ]
    }

    /// Parses the fixed header of a received packet.
    ///
    /// Returns `None` for short buffers or a version other than 2.
    /// Extensions and CSRC lists are not interpreted.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let header = buf.get(..RTP_HEADER_LEN)?;
        let mut fields = [0u8; RTP_HEADER_LEN];
        fields.copy_from_slice(header);
        if fields[0] >> 6 != 2 {
            return None;
        }
        Some(Self {
            payload_type: fields[1] & 0x7f,
            sequence: u16::from_be_bytes([fields[2], fields[3]]),
            timestamp: u32::from_be_bytes([fields[4], fields[5], fields[6], fields[7]]),
            ssrc: u32::from_be_bytes([fields[8], fields[9], fields[10], fields[11]]),
        })
    }
}

/// Builds a packet: 12-byte header followed by `payload`.
///
/// The payload is not validated; silence frames and Opus frames share
/// this builder.
pub fn build_packet(header: &RtpHeader, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(RTP_HEADER_LEN + payload.len());
    packet.extend_from_slice(&header.to_bytes());
    packet.extend_from_slice(payload);
    packet
}

/// Caller-side sequence/timestamp counters for a single stream.
///
/// Sequence advances by one per packet (mod 2^16); timestamp advances by
/// the frame's sample count (mod 2^32).
#[derive(Debug, Clone)]
pub struct RtpPacketizer {
    payload_type: u8,
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
    samples_per_frame: u32,
}

impl RtpPacketizer {
    /// Creates a packetizer for `sample_rate` audio in `frame_ms` frames.
    ///
    /// Sequence starts at 1 and timestamp at 0. Frames too long for a
    /// 32-bit sample count saturate at `u32::MAX`.
    pub fn new(payload_type: u8, sample_rate: u32, frame_ms: u32) -> Self {
        let samples = (u64::from(sample_rate) * u64::from(frame_ms) + 500) / 1000;
        let samples_per_frame = u32::try_from(samples).unwrap_or(u32::MAX);
        Self {
            payload_type,
            ssrc: RTP_SSRC,
            sequence: 1,
            timestamp: 0,
            samples_per_frame,
        }
    }

    /// Overrides the starting counters.
    #[must_use]
    pub fn starting_at(mut self, sequence: u16, timestamp: u32) -> Self {
        self.sequence = sequence;
        self.timestamp = timestamp;
        self
    }

    /// Header for the next packet, without advancing.
    pub fn header(&self) -> RtpHeader {
        RtpHeader {
            payload_type: self.payload_type,
            sequence: self.sequence,
            timestamp: self.timestamp,
            ssrc: self.ssrc,
        }
    }

    /// Builds the next packet and advances the counters.
    pub fn next_packet(&mut self, payload: &[u8]) -> Vec<u8> {
        let packet = build_packet(&self.header(), payload);
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(self.samples_per_frame);
        packet
    }

    /// Samples covered by one frame.
    pub fn samples_per_frame(&self) -> u32 {
        self.samples_per_frame
    }
}
