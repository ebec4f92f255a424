//! Packet sources
//!
//! A source yields `(FlowKey, PacketRecord)` pairs in arrival order and
//! returns `None` once it is exhausted. Live capture lives outside this crate
//! and pushes into a [`ChannelSource`]; [`ReplaySource`] and `PcapSource`
//! (feature `pcap`) replay recorded traffic.

use crate::{
    flow::{FlowKey, PacketRecord, Timestamp, PROTO_TCP},
    FlowError, FlowResult,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;

/// Producer of parsed packets
#[async_trait]
pub trait PacketSource: Send {
    /// Next packet, or `None` when the source is exhausted
    async fn next_packet(&mut self) -> FlowResult<Option<(FlowKey, PacketRecord)>>;
}

/// Push interface: a capture thread sends packets through the paired sender
pub struct ChannelSource {
    rx: mpsc::Receiver<(FlowKey, PacketRecord)>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<(FlowKey, PacketRecord)>) -> Self {
        Self { rx }
    }

    /// Create a bounded channel and the source reading from it
    pub fn channel(capacity: usize) -> (mpsc::Sender<(FlowKey, PacketRecord)>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl PacketSource for ChannelSource {
    async fn next_packet(&mut self) -> FlowResult<Option<(FlowKey, PacketRecord)>> {
        Ok(self.rx.recv().await)
    }
}

/// One line of a replay file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayPacket {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: u8,
    /// Timestamp in seconds
    pub ts: f64,
    pub size: u64,
}

fn default_protocol() -> u8 {
    PROTO_TCP
}

impl ReplayPacket {
    fn into_pair(self, bidirectional: bool) -> (FlowKey, PacketRecord) {
        let key = FlowKey::new(self.src, self.dst, self.src_port, self.dst_port, self.protocol);
        let key = if bidirectional { key.canonical() } else { key };
        (key, PacketRecord::new(Timestamp::from_secs_f64(self.ts), self.size))
    }
}

/// Replays JSON-lines packet records
pub struct ReplaySource<R> {
    lines: Lines<R>,
    line_no: usize,
    bidirectional: bool,
}

impl ReplaySource<BufReader<tokio::fs::File>> {
    /// Open a replay file
    pub async fn open(path: impl AsRef<Path>, bidirectional: bool) -> FlowResult<Self> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self::new(BufReader::new(file), bidirectional))
    }
}

impl<R: AsyncBufRead + Unpin + Send> ReplaySource<R> {
    pub fn new(reader: R, bidirectional: bool) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            bidirectional,
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> PacketSource for ReplaySource<R> {
    async fn next_packet(&mut self) -> FlowResult<Option<(FlowKey, PacketRecord)>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let packet: ReplayPacket = serde_json::from_str(line)
                .map_err(|e| FlowError::Parse(format!("line {}: {}", self.line_no, e)))?;
            return Ok(Some(packet.into_pair(self.bidirectional)));
        }
        Ok(None)
    }
}

/// Capture timestamp from a pcap header, or the local clock when the
/// capture carries none.
#[cfg(any(feature = "pcap", test))]
fn capture_timestamp(secs: i64, micros: i64) -> Timestamp {
    if secs <= 0 && micros <= 0 {
        Timestamp::now()
    } else {
        Timestamp::from_micros(secs.max(0) as u64 * 1_000_000 + micros.max(0) as u64)
    }
}

#[cfg(feature = "pcap")]
pub use self::pcap_source::PcapSource;

#[cfg(feature = "pcap")]
mod pcap_source {
    use super::*;
    use crate::parse::{parse_ethernet, parse_ip};

    const LINKTYPE_ETHERNET: i32 = 1;
    const LINKTYPE_RAW: i32 = 101;
    const LINKTYPE_IPV4: i32 = 228;
    const LINKTYPE_IPV6: i32 = 229;

    /// Packets buffered between the capture thread and the pipeline
    const READ_AHEAD: usize = 1024;

    type Parsed = FlowResult<(FlowKey, PacketRecord)>;

    /// Offline capture replay through libpcap.
    ///
    /// libpcap reads block, so the capture runs on a blocking thread and
    /// hands parsed packets over a bounded channel.
    pub struct PcapSource {
        rx: mpsc::Receiver<Parsed>,
    }

    impl PcapSource {
        /// Open a pcap/pcapng file. Must be called inside a tokio runtime.
        pub fn open(path: impl AsRef<Path>, bidirectional: bool) -> FlowResult<Self> {
            let capture = pcap::Capture::from_file(path.as_ref())
                .map_err(|e| FlowError::Source(e.to_string()))?;
            let raw_ip = match capture.get_datalink().0 {
                LINKTYPE_ETHERNET => false,
                LINKTYPE_RAW | LINKTYPE_IPV4 | LINKTYPE_IPV6 => true,
                other => {
                    return Err(FlowError::Source(format!("unsupported link type {}", other)));
                }
            };

            let (tx, rx) = mpsc::channel(READ_AHEAD);
            tokio::task::spawn_blocking(move || read_capture(capture, raw_ip, bidirectional, tx));
            Ok(Self { rx })
        }
    }

    fn read_capture(
        mut capture: pcap::Capture<pcap::Offline>,
        raw_ip: bool,
        bidirectional: bool,
        tx: mpsc::Sender<Parsed>,
    ) {
        loop {
            let packet = match capture.next_packet() {
                Ok(packet) => packet,
                Err(pcap::Error::NoMorePackets) => return,
                Err(e) => {
                    let _ = tx.blocking_send(Err(FlowError::Source(e.to_string())));
                    return;
                }
            };

            let timestamp = capture_timestamp(packet.header.ts.tv_sec as i64, packet.header.ts.tv_usec as i64);
            let wire_len = packet.header.len as usize;
            let parsed = if raw_ip {
                parse_ip(packet.data, wire_len, timestamp)
            } else {
                parse_ethernet(packet.data, wire_len, timestamp)
            };

            if let Some((key, record)) = parsed {
                let key = if bidirectional { key.canonical() } else { key };
                if tx.blocking_send(Ok((key, record))).is_err() {
                    // Pipeline stopped reading
                    return;
                }
            }
        }
    }

    #[async_trait]
    impl PacketSource for PcapSource {
        async fn next_packet(&mut self) -> FlowResult<Option<(FlowKey, PacketRecord)>> {
            self.rx.recv().await.transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLAY: &str = r#"
# comment lines and blanks are skipped
{"src":"10.0.0.2","dst":"10.0.0.1","src_port":443,"dst_port":5000,"ts":0.5,"size":200}

{"src":"10.0.0.1","dst":"10.0.0.2","src_port":5000,"dst_port":443,"protocol":17,"ts":1.0,"size":150}
"#;

    #[tokio::test]
    async fn test_replay_source() {
        let mut source = ReplaySource::new(REPLAY.as_bytes(), true);

        let (k1, r1) = source.next_packet().await.unwrap().unwrap();
        assert_eq!(k1.src_port, 5000);
        assert_eq!(k1.protocol, PROTO_TCP);
        assert_eq!(r1.timestamp, Timestamp::from_micros(500_000));
        assert_eq!(r1.size_bytes, 200);

        let (k2, _) = source.next_packet().await.unwrap().unwrap();
        assert_eq!(k2.protocol, 17);
        assert_eq!(k2.src_port, 5000);

        assert!(source.next_packet().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replay_unidirectional_keeps_direction() {
        let mut source = ReplaySource::new(REPLAY.as_bytes(), false);
        let (k1, _) = source.next_packet().await.unwrap().unwrap();
        assert_eq!(k1.src_port, 443);
    }

    #[tokio::test]
    async fn test_replay_reports_bad_line() {
        let input = "{\"src\":\"10.0.0.1\"}\n";
        let mut source = ReplaySource::new(input.as_bytes(), true);
        match source.next_packet().await {
            Err(FlowError::Parse(msg)) => assert!(msg.starts_with("line 1")),
            other => panic!("expected parse error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_capture_timestamp() {
        assert_eq!(capture_timestamp(2, 500_000), Timestamp::from_micros(2_500_000));
        // Missing capture time falls back to the local clock
        assert!(capture_timestamp(0, 0) > Timestamp::from_secs_f64(1_000_000_000.0));
    }

    #[tokio::test]
    async fn test_channel_source() {
        let (tx, mut source) = ChannelSource::channel(8);
        let key = FlowKey::new(IpAddr::from([1, 1, 1, 1]), IpAddr::from([2, 2, 2, 2]), 1, 2, 6);
        tx.send((key, PacketRecord::new(Timestamp::from_micros(1), 64))).await.unwrap();
        drop(tx);

        assert_eq!(source.next_packet().await.unwrap().unwrap().0, key);
        assert!(source.next_packet().await.unwrap().is_none());
    }
}
