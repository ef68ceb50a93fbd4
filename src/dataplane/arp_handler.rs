//! ARP packet handling
//!
//! Answers requests for the ingress interface's address and learns
//! bindings from replies addressed to us.

use super::arp_cache::{ArpCache, QueuedFrame};
use super::interfaces::Interface;
use crate::protocol::MacAddr;
use crate::protocol::arp::{ArpOp, ArpPacket};
use std::net::Ipv4Addr;
use tracing::{debug, trace};

/// Result of processing an ARP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArpAction {
    /// Nothing to send
    None,
    /// Send this reply out the ingress interface
    Reply(ArpPacket),
    /// `ip` resolved to `mac`; these frames can now go out
    Resolved {
        ip: Ipv4Addr,
        mac: MacAddr,
        frames: Vec<QueuedFrame>,
    },
}

/// Process an incoming ARP packet received on `iface`.
pub fn process_arp(packet: &ArpPacket, iface: &Interface, cache: &mut dyn ArpCache) -> ArpAction {
    match packet.operation {
        ArpOp::Request => {
            if packet.target_ip != iface.ip {
                trace!(
                    interface = %iface.name,
                    "ARP request for {} is not for us",
                    packet.target_ip
                );
                return ArpAction::None;
            }
            debug!(
                interface = %iface.name,
                "ARP who-has {} from {} ({})",
                packet.target_ip,
                packet.sender_ip,
                packet.sender_mac
            );
            ArpAction::Reply(ArpPacket::reply(
                iface.mac,
                iface.ip,
                packet.sender_mac,
                packet.sender_ip,
            ))
        }
        ArpOp::Reply => {
            if packet.target_mac != iface.mac || packet.target_ip != iface.ip {
                trace!(interface = %iface.name, "ARP reply not addressed to us");
                return ArpAction::None;
            }
            if cache.contains(packet.sender_ip) {
                trace!(
                    interface = %iface.name,
                    "duplicate ARP reply for {}",
                    packet.sender_ip
                );
                return ArpAction::None;
            }

            let frames = cache.insert(packet.sender_mac, packet.sender_ip);
            debug!(
                interface = %iface.name,
                "ARP {} is-at {}, releasing {} queued frames",
                packet.sender_ip,
                packet.sender_mac,
                frames.len()
            );
            ArpAction::Resolved {
                ip: packet.sender_ip,
                mac: packet.sender_mac,
                frames,
            }
        }
    }
}
