//! ICMP (Internet Control Message Protocol) - RFC 792

use super::ipv4;
use crate::{Error, Result};

/// ICMP header size (type, code, checksum, rest-of-header)
pub const ICMP_HEADER_SIZE: usize = 8;

/// Bytes of the offending datagram quoted in error messages
/// (a 20 byte IP header plus 8 bytes of its payload)
pub const ICMP_DATA_SIZE: usize = 28;

/// Next-hop MTU advertised in destination unreachable messages
pub const NEXT_HOP_MTU: u16 = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IcmpType {
    EchoReply = 0,
    DestinationUnreachable = 3,
    EchoRequest = 8,
    TimeExceeded = 11,
}

impl IcmpType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(IcmpType::EchoReply),
            3 => Some(IcmpType::DestinationUnreachable),
            8 => Some(IcmpType::EchoRequest),
            11 => Some(IcmpType::TimeExceeded),
            _ => None,
        }
    }
}

/// Destination Unreachable codes
pub mod dest_unreachable {
    pub const NET_UNREACHABLE: u8 = 0;
    pub const HOST_UNREACHABLE: u8 = 1;
    pub const PORT_UNREACHABLE: u8 = 3;
}

/// Time Exceeded codes
pub mod time_exceeded {
    pub const TTL_EXCEEDED: u8 = 0;
}

/// Parsed ICMP message (zero-copy reference)
#[derive(Debug)]
pub struct IcmpPacket<'a> {
    buffer: &'a [u8],
}

impl<'a> IcmpPacket<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < ICMP_HEADER_SIZE {
            return Err(Error::Parse("ICMP message too short".into()));
        }
        Ok(Self { buffer })
    }

    pub fn icmp_type(&self) -> u8 {
        self.buffer[0]
    }

    pub fn code(&self) -> u8 {
        self.buffer[1]
    }

    /// Echo identifier (query id used as the NAT port)
    pub fn identifier(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    pub fn sequence(&self) -> u16 {
        u16::from_be_bytes([self.buffer[6], self.buffer[7]])
    }

    /// Everything after the type/code/checksum words
    pub fn body(&self) -> &'a [u8] {
        &self.buffer[4..]
    }

    pub fn validate_checksum(&self) -> bool {
        icmp_checksum(self.buffer) == 0
    }

    pub fn is_echo_request(&self) -> bool {
        self.icmp_type() == IcmpType::EchoRequest as u8 && self.code() == 0
    }

    pub fn is_echo_reply(&self) -> bool {
        self.icmp_type() == IcmpType::EchoReply as u8 && self.code() == 0
    }
}

/// ICMP checksum over the whole message
pub fn icmp_checksum(data: &[u8]) -> u16 {
    ipv4::checksum(data)
}

fn finish(mut message: Vec<u8>) -> Vec<u8> {
    message[2] = 0;
    message[3] = 0;
    let sum = icmp_checksum(&message);
    message[2..4].copy_from_slice(&sum.to_be_bytes());
    message
}

/// Echo reply whose identifier, sequence and data mirror `body`.
///
/// `body` is the request with its first four bytes stripped
/// (see [`IcmpPacket::body`]).
pub fn build_echo_reply(body: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(4 + body.len());
    message.extend_from_slice(&[IcmpType::EchoReply as u8, 0, 0, 0]);
    message.extend_from_slice(body);
    finish(message)
}

/// Destination unreachable or time exceeded message.
///
/// Layout: type, code, checksum, unused(2), next-hop MTU(2), then the
/// first [`ICMP_DATA_SIZE`] bytes of `original` (zero padded).
pub fn build_error_message(icmp_type: IcmpType, code: u8, original: &[u8]) -> Result<Vec<u8>> {
    let mtu = match icmp_type {
        IcmpType::DestinationUnreachable => NEXT_HOP_MTU,
        IcmpType::TimeExceeded => 0,
        other => return Err(Error::UnsupportedIcmpType(other as u8)),
    };

    let mut message = vec![0u8; ICMP_HEADER_SIZE + ICMP_DATA_SIZE];
    message[0] = icmp_type as u8;
    message[1] = code;
    message[6..8].copy_from_slice(&mtu.to_be_bytes());

    let quoted = original.len().min(ICMP_DATA_SIZE);
    message[ICMP_HEADER_SIZE..ICMP_HEADER_SIZE + quoted].copy_from_slice(&original[..quoted]);

    Ok(finish(message))
}

/// Replace the echo identifier and refresh the checksum.
///
/// Used by NAT on echo requests leaving and echo replies returning.
pub fn rewrite_identifier(message: &mut [u8], identifier: u16) -> Result<()> {
    if message.len() < ICMP_HEADER_SIZE {
        return Err(Error::InvalidPacket("ICMP message too short to rewrite".into()));
    }
    message[4..6].copy_from_slice(&identifier.to_be_bytes());
    message[2] = 0;
    message[3] = 0;
    let sum = icmp_checksum(message);
    message[2..4].copy_from_slice(&sum.to_be_bytes());
    Ok(())
}

/// Echo request builder, used by tests and diagnostics
pub struct EchoRequestBuilder {
    identifier: u16,
    sequence: u16,
    data: Vec<u8>,
}

impl EchoRequestBuilder {
    pub fn new(identifier: u16, sequence: u16) -> Self {
        Self {
            identifier,
            sequence,
            data: Vec::new(),
        }
    }

    pub fn payload(mut self, data: &[u8]) -> Self {
        self.data = data.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut message = vec![IcmpType::EchoRequest as u8, 0, 0, 0];
        message.extend_from_slice(&self.identifier.to_be_bytes());
        message.extend_from_slice(&self.sequence.to_be_bytes());
        message.extend_from_slice(&self.data);
        finish(message)
    }
}
