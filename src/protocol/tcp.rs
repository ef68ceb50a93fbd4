//! TCP header access for NAT - RFC 793
//!
//! Only what address translation needs: ports, flags, and the
//! pseudo-header checksum.

use super::ipv4::{fold, sum_words};
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// Minimum TCP header size (without options)
pub const MIN_HEADER_SIZE: usize = 20;

/// TCP protocol number for the pseudo-header
pub const PROTOCOL_NUMBER: u8 = 6;

/// Control flags relevant to connection tracking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub ack: bool,
}

impl TcpFlags {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            fin: byte & 0x01 != 0,
            syn: byte & 0x02 != 0,
            rst: byte & 0x04 != 0,
            ack: byte & 0x10 != 0,
        }
    }

    pub fn to_byte(self) -> u8 {
        (self.fin as u8) | (self.syn as u8) << 1 | (self.rst as u8) << 2 | (self.ack as u8) << 4
    }

    /// FIN or RST: the flow is winding down
    pub fn is_closing(self) -> bool {
        self.fin || self.rst
    }
}

/// Parsed TCP header (zero-copy reference)
#[derive(Debug)]
pub struct TcpHeader<'a> {
    buffer: &'a [u8],
}

impl<'a> TcpHeader<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        check_header(buffer)?;
        Ok(Self { buffer })
    }

    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[0], self.buffer[1]])
    }

    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn flags(&self) -> TcpFlags {
        TcpFlags::from_byte(self.buffer[13])
    }

    pub fn validate_checksum(&self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> bool {
        tcp_checksum(src_ip, dst_ip, self.buffer) == 0
    }
}

fn check_header(buffer: &[u8]) -> Result<()> {
    if buffer.len() < MIN_HEADER_SIZE {
        return Err(Error::Parse("TCP header too short".into()));
    }
    let header_len = (buffer[12] >> 4) as usize * 4;
    if header_len < MIN_HEADER_SIZE || buffer.len() < header_len {
        return Err(Error::Parse(format!("bad TCP data offset ({header_len} bytes)")));
    }
    Ok(())
}

/// Mutable view of a TCP segment inside an IPv4 payload
pub struct TcpSegmentMut<'a> {
    buffer: &'a mut [u8],
}

impl<'a> TcpSegmentMut<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Result<Self> {
        check_header(buffer)?;
        Ok(Self { buffer })
    }

    pub fn set_src_port(&mut self, port: u16) {
        self.buffer[0..2].copy_from_slice(&port.to_be_bytes());
    }

    pub fn set_dst_port(&mut self, port: u16) {
        self.buffer[2..4].copy_from_slice(&port.to_be_bytes());
    }

    /// Recompute the checksum for the (possibly rewritten) addresses
    pub fn update_checksum(&mut self, src_ip: Ipv4Addr, dst_ip: Ipv4Addr) {
        self.buffer[16] = 0;
        self.buffer[17] = 0;
        let sum = tcp_checksum(src_ip, dst_ip, self.buffer);
        self.buffer[16..18].copy_from_slice(&sum.to_be_bytes());
    }
}

/// TCP checksum including the IPv4 pseudo-header
pub fn tcp_checksum(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, segment: &[u8]) -> u16 {
    let mut sum = sum_words(&src_ip.octets(), 0);
    sum = sum_words(&dst_ip.octets(), sum);
    sum = sum.wrapping_add(PROTOCOL_NUMBER as u32);
    sum = sum.wrapping_add(segment.len() as u32);
    !fold(sum_words(segment, sum))
}
