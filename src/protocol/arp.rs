//! ARP over Ethernet/IPv4 - RFC 826

use super::ethernet::FrameBuilder;
use super::{EtherType, MacAddr};
use crate::{Error, Result};
use std::net::Ipv4Addr;

/// ARP payload size for Ethernet/IPv4
pub const ARP_PACKET_SIZE: usize = 28;

/// Hardware type for Ethernet
pub const HTYPE_ETHERNET: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ArpOp {
    Request = 1,
    Reply = 2,
}

impl ArpOp {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(ArpOp::Request),
            2 => Some(ArpOp::Reply),
            _ => None,
        }
    }
}

/// ARP packet (Ethernet/IPv4 only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: ArpOp,
    pub sender_mac: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Parse an ARP payload, rejecting anything that is not Ethernet/IPv4.
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < ARP_PACKET_SIZE {
            return Err(Error::Parse(format!(
                "ARP packet too short ({} bytes)",
                buffer.len()
            )));
        }

        let htype = u16::from_be_bytes([buffer[0], buffer[1]]);
        if htype != HTYPE_ETHERNET {
            return Err(Error::Parse(format!("unsupported hardware type {htype}")));
        }

        let ptype = u16::from_be_bytes([buffer[2], buffer[3]]);
        if ptype != EtherType::Ipv4 as u16 {
            return Err(Error::Parse(format!("unsupported protocol type 0x{ptype:04x}")));
        }

        if buffer[4] != 6 || buffer[5] != 4 {
            return Err(Error::Parse("bad ARP address lengths".into()));
        }

        let op = u16::from_be_bytes([buffer[6], buffer[7]]);
        let operation =
            ArpOp::from_u16(op).ok_or_else(|| Error::Parse(format!("unknown ARP opcode {op}")))?;

        let ip_at =
            |o: usize| Ipv4Addr::new(buffer[o], buffer[o + 1], buffer[o + 2], buffer[o + 3]);
        let mac_at = |o: usize| {
            let mut mac = [0u8; 6];
            mac.copy_from_slice(&buffer[o..o + 6]);
            MacAddr(mac)
        };

        Ok(Self {
            operation,
            sender_mac: mac_at(8),
            sender_ip: ip_at(14),
            target_mac: mac_at(18),
            target_ip: ip_at(24),
        })
    }

    pub fn to_bytes(&self) -> [u8; ARP_PACKET_SIZE] {
        let mut buf = [0u8; ARP_PACKET_SIZE];
        buf[0..2].copy_from_slice(&HTYPE_ETHERNET.to_be_bytes());
        buf[2..4].copy_from_slice(&(EtherType::Ipv4 as u16).to_be_bytes());
        buf[4] = 6;
        buf[5] = 4;
        buf[6..8].copy_from_slice(&(self.operation as u16).to_be_bytes());
        buf[8..14].copy_from_slice(&self.sender_mac.0);
        buf[14..18].copy_from_slice(&self.sender_ip.octets());
        buf[18..24].copy_from_slice(&self.target_mac.0);
        buf[24..28].copy_from_slice(&self.target_ip.octets());
        buf
    }

    /// Who-has request for `target_ip`; target MAC is left zero.
    pub fn request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self {
            operation: ArpOp::Request,
            sender_mac,
            sender_ip,
            target_mac: MacAddr::ZERO,
            target_ip,
        }
    }

    pub fn reply(
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        Self {
            operation: ArpOp::Reply,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        }
    }

    /// Wrap this packet in an Ethernet frame.
    ///
    /// Requests go to broadcast, replies to the target MAC.
    pub fn to_frame(&self) -> Vec<u8> {
        let dst = match self.operation {
            ArpOp::Request => MacAddr::BROADCAST,
            ArpOp::Reply => self.target_mac,
        };
        FrameBuilder::new()
            .dst_mac(dst)
            .src_mac(self.sender_mac)
            .ethertype(EtherType::Arp as u16)
            .payload(&self.to_bytes())
            .build()
    }
}
