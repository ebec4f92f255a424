//! Header extraction for packet sources
//!
//! Reads only L2-L4 headers: enough to build a [`FlowKey`] and a
//! [`PacketRecord`]. Anything that is not TCP or UDP over IPv4/IPv6 is skipped.

use crate::flow::{FlowKey, PacketRecord, Timestamp, PROTO_TCP, PROTO_UDP};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Ethernet header length
pub const ETH_HEADER_LEN: usize = 14;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const IPV6_HEADER_LEN: usize = 40;

/// Parse an Ethernet frame. `wire_len` is the on-the-wire frame length, which
/// may exceed `frame.len()` when the capture was truncated.
pub fn parse_ethernet(
    frame: &[u8],
    wire_len: usize,
    timestamp: Timestamp,
) -> Option<(FlowKey, PacketRecord)> {
    if frame.len() < ETH_HEADER_LEN {
        return None;
    }

    let eth_type = u16::from_be_bytes([frame[12], frame[13]]);
    match eth_type {
        ETHERTYPE_IPV4 | ETHERTYPE_IPV6 => parse_ip(
            &frame[ETH_HEADER_LEN..],
            wire_len.saturating_sub(ETH_HEADER_LEN),
            timestamp,
        ),
        _ => None,
    }
}

/// Parse a raw IP packet (no link layer). `ip_len` becomes the record size.
pub fn parse_ip(packet: &[u8], ip_len: usize, timestamp: Timestamp) -> Option<(FlowKey, PacketRecord)> {
    let version = packet.first()? >> 4;
    let key = match version {
        4 => parse_ipv4(packet)?,
        6 => parse_ipv6(packet)?,
        _ => {
            tracing::trace!(version, "unknown IP version");
            return None;
        }
    };
    Some((key, PacketRecord::new(timestamp, ip_len as u64)))
}

fn parse_ipv4(data: &[u8]) -> Option<FlowKey> {
    if data.len() < 20 {
        return None;
    }

    let ihl = ((data[0] & 0x0f) * 4) as usize;
    let protocol = data[9];
    let src_ip = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
    let dst_ip = Ipv4Addr::new(data[16], data[17], data[18], data[19]);
    let (src_port, dst_port) = transport_ports(data.get(ihl..)?, protocol)?;

    Some(FlowKey::new(
        IpAddr::V4(src_ip),
        IpAddr::V4(dst_ip),
        src_port,
        dst_port,
        protocol,
    ))
}

fn parse_ipv6(data: &[u8]) -> Option<FlowKey> {
    if data.len() < IPV6_HEADER_LEN {
        return None;
    }

    // Next header only; extension header chains are not followed
    let protocol = data[6];
    let src_ip: [u8; 16] = data[8..24].try_into().ok()?;
    let dst_ip: [u8; 16] = data[24..40].try_into().ok()?;
    let (src_port, dst_port) = transport_ports(&data[IPV6_HEADER_LEN..], protocol)?;

    Some(FlowKey::new(
        IpAddr::V6(Ipv6Addr::from(src_ip)),
        IpAddr::V6(Ipv6Addr::from(dst_ip)),
        src_port,
        dst_port,
        protocol,
    ))
}

fn transport_ports(l4: &[u8], protocol: u8) -> Option<(u16, u16)> {
    if protocol != PROTO_TCP && protocol != PROTO_UDP {
        return None;
    }
    if l4.len() < 4 {
        return None;
    }
    Some((
        u16::from_be_bytes([l4[0], l4[1]]),
        u16::from_be_bytes([l4[2], l4[3]]),
    ))
}
