//! Local RTP listener for checking relay output.
//!
//! Logs every packet header at debug level and a running count every
//! [`SUMMARY_EVERY`] packets.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hub_core::{RtpHeader, RTP_HEADER_LEN};

/// Packets between summary log lines.
pub const SUMMARY_EVERY: u64 = 250;

const RECV_BUFFER: usize = 2048;

/// Running totals kept by the listener.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RtpStats {
    pub packets: u64,
    pub malformed: u64,
    pub last_sequence: Option<u16>,
}

impl RtpStats {
    /// Accounts for one datagram. Returns the header if it parsed.
    pub fn record(&mut self, datagram: &[u8]) -> Option<RtpHeader> {
        match RtpHeader::parse(datagram) {
            Some(header) => {
                self.packets += 1;
                self.last_sequence = Some(header.sequence);
                Some(header)
            }
            None => {
                self.malformed += 1;
                None
            }
        }
    }

    pub fn should_summarize(&self) -> bool {
        self.packets > 0 && self.packets % SUMMARY_EVERY == 0
    }
}

/// Binds `addr` and logs incoming RTP until cancelled.
pub async fn run(addr: SocketAddr, cancel: CancellationToken) -> std::io::Result<RtpStats> {
    let socket = UdpSocket::bind(addr).await?;
    info!(addr = %socket.local_addr()?, "RTP debug listener bound");
    listen(socket, cancel).await
}

/// Logs incoming RTP on an already-bound socket until cancelled.
pub async fn listen(socket: UdpSocket, cancel: CancellationToken) -> std::io::Result<RtpStats> {
    let mut stats = RtpStats::default();
    let mut buf = [0u8; RECV_BUFFER];

    loop {
        let (len, from) = tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "RTP debug receive failed");
                    continue;
                }
            },
        };

        let datagram = &buf[..len];
        match stats.record(datagram) {
            Some(header) => {
                debug!(
                    from = %from,
                    seq = header.sequence,
                    ts = header.timestamp,
                    pt = header.payload_type,
                    payload = len.saturating_sub(RTP_HEADER_LEN),
                    "RTP packet"
                );
                if stats.should_summarize() {
                    info!(packets = stats.packets, from = %from, "RTP debug summary");
                }
            }
            None => debug!(from = %from, len, "Non-RTP datagram"),
        }
    }

    info!(
        packets = stats.packets,
        malformed = stats.malformed,
        "RTP debug listener stopped"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::{build_packet, RtpHeader};
    use std::time::Duration;

    #[test]
    fn test_stats_record() {
        let mut stats = RtpStats::default();
        let packet = build_packet(&RtpHeader::opus(7, 320), &[0u8; 40]);

        let header = stats.record(&packet).unwrap();
        assert_eq!(header.sequence, 7);
        assert_eq!(stats.packets, 1);
        assert_eq!(stats.last_sequence, Some(7));

        assert!(stats.record(&[0u8; 4]).is_none());
        assert_eq!(stats.malformed, 1);
    }

    #[test]
    fn test_summary_cadence() {
        let mut stats = RtpStats::default();
        assert!(!stats.should_summarize());
        stats.packets = SUMMARY_EVERY;
        assert!(stats.should_summarize());
        stats.packets += 1;
        assert!(!stats.should_summarize());
    }

    #[tokio::test]
    async fn test_listener_counts_packets() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(listen(socket, cancel.clone()));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for seq in 1..=3u16 {
            let packet = build_packet(&RtpHeader::opus(seq, u32::from(seq) * 320), &[0u8; 40]);
            sender.send_to(&packet, addr).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.packets, 3);
        assert_eq!(stats.last_sequence, Some(3));
    }
}
