//! Flow identity and packet record types
//!
//! Both are plain immutable values. Direction normalisation is the packet
//! source's job; [`FlowKey::canonical`] is provided for sources that need it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// IP protocol number for TCP
pub const PROTO_TCP: u8 = 6;
/// IP protocol number for UDP
pub const PROTO_UDP: u8 = 17;

/// 5-tuple flow key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    /// Source IP
    pub src_ip: IpAddr,
    /// Destination IP
    pub dst_ip: IpAddr,
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
    /// IP protocol (TCP=6, UDP=17)
    pub protocol: u8,
}

impl FlowKey {
    /// Create new flow key
    pub const fn new(
        src_ip: IpAddr,
        dst_ip: IpAddr,
        src_port: u16,
        dst_port: u16,
        protocol: u8,
    ) -> Self {
        Self {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol,
        }
    }

    /// Create reverse (reply) flow key
    pub const fn reverse(&self) -> Self {
        Self::new(
            self.dst_ip,
            self.src_ip,
            self.dst_port,
            self.src_port,
            self.protocol,
        )
    }

    /// Direction-independent key: the smaller endpoint always comes first,
    /// so both halves of a conversation map to the same value.
    pub fn canonical(&self) -> Self {
        if (self.src_ip, self.src_port) <= (self.dst_ip, self.dst_port) {
            *self
        } else {
            self.reverse()
        }
    }

    /// Protocol name for display
    pub fn protocol_name(&self) -> &'static str {
        match self.protocol {
            PROTO_TCP => "TCP",
            PROTO_UDP => "UDP",
            1 => "ICMP",
            58 => "ICMPv6",
            _ => "OTHER",
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} {}",
            SocketAddr::new(self.src_ip, self.src_port),
            SocketAddr::new(self.dst_ip, self.dst_port),
            self.protocol_name()
        )
    }
}

/// Packet timestamp in microseconds. Wall-clock or monotonic, as long as one
/// source is consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// From microseconds
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// From fractional seconds (negative input clamps to zero)
    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs.max(0.0) * 1_000_000.0).round() as u64)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;
        Self(micros)
    }

    /// Microseconds value
    pub const fn as_micros(&self) -> u64 {
        self.0
    }

    /// Fractional seconds
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// Seconds elapsed since `earlier`, zero if `earlier` is later
    pub fn secs_since(&self, earlier: Timestamp) -> f64 {
        self.0.saturating_sub(earlier.0) as f64 / 1_000_000.0
    }
}

/// One observed packet, as delivered by the packet source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketRecord {
    /// Capture (or fallback local) timestamp
    pub timestamp: Timestamp,
    /// Packet length in bytes
    pub size_bytes: u64,
}

impl PacketRecord {
    /// Create new packet record
    pub const fn new(timestamp: Timestamp, size_bytes: u64) -> Self {
        Self {
            timestamp,
            size_bytes,
        }
    }
}
