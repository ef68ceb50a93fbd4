//! IP forwarding engine
//!
//! Validates IPv4 packets, answers those addressed to the router, and
//! forwards the rest by longest prefix match, resolving the next hop
//! through the ARP cache. When NAT is active, packets crossing between
//! internal interfaces and the external interface are translated.

use super::arp_cache::{ArpCache, QueuedFrame};
use super::icmp_generator;
use super::interfaces::{Interface, InterfaceTable};
use super::nat::{Direction, Mapping, MappingType, NatTable};
use super::routing::RoutingTable;
use crate::protocol::arp::ArpPacket;
use crate::protocol::ethernet::{Frame, FrameBuilder, set_dst_mac};
use crate::protocol::icmp::{
    IcmpPacket, IcmpType, dest_unreachable, rewrite_identifier, time_exceeded,
};
use crate::protocol::ipv4::{Ipv4Header, Ipv4Packet, Protocol};
use crate::protocol::tcp::{TcpHeader, TcpSegmentMut};
use crate::protocol::{EtherType, MacAddr};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Result of a forwarding decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardAction {
    /// Next hop resolved; send the frame
    Forward { interface: String, frame: Vec<u8> },
    /// Packet queued on a new resolution; broadcast this request
    ArpRequest { interface: String, request: Vec<u8> },
    /// Packet queued behind an outstanding request
    Queued,
    /// Echo reply for a ping to one of our addresses
    EchoReply { interface: String, frame: Vec<u8> },
    /// Destination unreachable or time exceeded back to the sender
    IcmpError { interface: String, frame: Vec<u8> },
    Drop,
}

/// Which interfaces NAT sits between
pub struct NatPolicy {
    pub table: Arc<NatTable>,
    pub external: String,
    pub internal: HashSet<String>,
}

impl NatPolicy {
    pub fn new(table: Arc<NatTable>, external: impl Into<String>, internal: &[String]) -> Self {
        Self {
            table,
            external: external.into(),
            internal: internal.iter().cloned().collect(),
        }
    }

    fn is_outbound(&self, ingress: &str, egress: &str) -> bool {
        egress == self.external && self.internal.contains(ingress)
    }

    fn is_inbound(&self, ingress: &str, dst: Ipv4Addr) -> bool {
        ingress == self.external && dst == self.table.external_ip()
    }
}

/// Packet forwarder
pub struct Forwarder {
    interfaces: InterfaceTable,
    routes: RoutingTable,
    nat: Option<NatPolicy>,
}

impl Forwarder {
    pub fn new(interfaces: InterfaceTable, routes: RoutingTable) -> Self {
        Self {
            interfaces,
            routes,
            nat: None,
        }
    }

    pub fn interfaces(&self) -> &InterfaceTable {
        &self.interfaces
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    pub fn routes_mut(&mut self) -> &mut RoutingTable {
        &mut self.routes
    }

    pub fn set_nat(&mut self, nat: NatPolicy) {
        self.nat = Some(nat);
    }

    pub fn take_nat(&mut self) -> Option<NatPolicy> {
        self.nat.take()
    }

    pub fn nat(&self) -> Option<&NatPolicy> {
        self.nat.as_ref()
    }

    /// Forward an IPv4 frame received on `ingress`.
    pub fn forward(&self, ingress: &str, frame: &[u8], arp: &mut dyn ArpCache) -> ForwardAction {
        let Ok(eth) = Frame::parse(frame) else {
            return ForwardAction::Drop;
        };

        let header = match Ipv4Header::parse(eth.payload()) {
            Ok(h) => h,
            Err(e) => {
                trace!(interface = %ingress, "Dropping IPv4 packet: {}", e);
                return ForwardAction::Drop;
            }
        };
        if !header.validate_checksum() {
            trace!(
                interface = %ingress,
                "Bad IPv4 header checksum from {}",
                header.src_addr()
            );
            return ForwardAction::Drop;
        }

        let Some(iface) = self.interfaces.resolve(ingress) else {
            debug!("IPv4 packet on unknown interface {}", ingress);
            return ForwardAction::Drop;
        };

        let mut packet = match Ipv4Packet::from_bytes(eth.payload()) {
            Ok(p) => p,
            Err(e) => {
                trace!(interface = %ingress, "Dropping IPv4 packet: {}", e);
                return ForwardAction::Drop;
            }
        };

        let mut translated = false;
        if let Some(nat) = &self.nat
            && nat.is_inbound(ingress, packet.dst_addr())
        {
            if packet.ttl() <= 1
                && inbound_key(&packet).is_some_and(|(port, kind)| nat.table.contains(port, kind))
            {
                debug!(
                    interface = %ingress,
                    "TTL expired for {} -> {} before NAT",
                    packet.src_addr(),
                    packet.dst_addr()
                );
                return icmp_error(
                    IcmpType::TimeExceeded,
                    time_exceeded::TTL_EXCEEDED,
                    iface,
                    frame,
                );
            }
            translated = translate_inbound(&nat.table, &mut packet);
        }

        if !translated && self.interfaces.is_local(packet.dst_addr()) {
            return deliver_local(iface, frame, &packet);
        }

        if !translated
            && let Some(nat) = &self.nat
            && ingress == nat.external
        {
            trace!(
                interface = %ingress,
                "NAT: dropping unsolicited packet for {}",
                packet.dst_addr()
            );
            return ForwardAction::Drop;
        }

        if !packet.decrement_ttl() {
            debug!(
                interface = %ingress,
                "TTL expired for {} -> {}",
                packet.src_addr(),
                packet.dst_addr()
            );
            return icmp_error(
                IcmpType::TimeExceeded,
                time_exceeded::TTL_EXCEEDED,
                iface,
                frame,
            );
        }

        let dst = packet.dst_addr();
        let Some(route) = self.routes.lookup(dst) else {
            debug!(interface = %ingress, "No route to {}", dst);
            return icmp_error(
                IcmpType::DestinationUnreachable,
                dest_unreachable::NET_UNREACHABLE,
                iface,
                frame,
            );
        };

        let Some(egress) = self.interfaces.resolve(&route.interface) else {
            warn!(
                "Route {}/{} names unknown interface {}",
                route.destination,
                route.prefix_len(),
                route.interface
            );
            return ForwardAction::Drop;
        };

        if let Some(nat) = &self.nat
            && nat.is_outbound(ingress, &egress.name)
            && !translate_outbound(&nat.table, &mut packet)
        {
            return ForwardAction::Drop;
        }

        let next_hop = route.next_hop(dst);
        let mut out = FrameBuilder::new()
            .dst_mac(MacAddr::ZERO)
            .src_mac(egress.mac)
            .ethertype(EtherType::Ipv4 as u16)
            .payload(packet.as_bytes())
            .build();

        match arp.lookup(next_hop) {
            Some(mac) => {
                set_dst_mac(&mut out, mac);
                trace!("Forward {} via {} ({})", dst, egress.name, next_hop);
                ForwardAction::Forward {
                    interface: egress.name.clone(),
                    frame: out,
                }
            }
            None => {
                let queued = QueuedFrame {
                    frame: out,
                    egress: egress.name.clone(),
                    ingress: ingress.to_string(),
                    original: frame.to_vec(),
                };
                let pending = arp.queue(next_hop, queued, &egress.name);
                if pending.send_request {
                    debug!("Resolving {} on {}", next_hop, egress.name);
                    ForwardAction::ArpRequest {
                        interface: pending.interface,
                        request: ArpPacket::request(egress.mac, egress.ip, next_hop).to_frame(),
                    }
                } else {
                    trace!("{} frames waiting on {}", pending.queued, next_hop);
                    ForwardAction::Queued
                }
            }
        }
    }
}

/// Answer a packet addressed to one of our interfaces.
fn deliver_local(iface: &Interface, frame: &[u8], packet: &Ipv4Packet) -> ForwardAction {
    if packet.protocol() != Protocol::Icmp as u8 {
        return icmp_error(
            IcmpType::DestinationUnreachable,
            dest_unreachable::PORT_UNREACHABLE,
            iface,
            frame,
        );
    }

    match IcmpPacket::parse(packet.payload()) {
        Ok(icmp) if icmp.is_echo_request() && icmp.validate_checksum() => {
            // Answer from the address that was pinged
            let replying = Interface::new(iface.name.clone(), packet.dst_addr(), iface.mac);
            match icmp_generator::generate(IcmpType::EchoReply, 0, &replying, frame) {
                Ok(reply) => ForwardAction::EchoReply {
                    interface: iface.name.clone(),
                    frame: reply,
                },
                Err(e) => {
                    debug!("Echo reply not built: {}", e);
                    ForwardAction::Drop
                }
            }
        }
        _ => {
            trace!(
                interface = %iface.name,
                "Ignoring ICMP for {} from {}",
                packet.dst_addr(),
                packet.src_addr()
            );
            ForwardAction::Drop
        }
    }
}

fn icmp_error(icmp_type: IcmpType, code: u8, iface: &Interface, frame: &[u8]) -> ForwardAction {
    match icmp_generator::generate(icmp_type, code, iface, frame) {
        Ok(reply) => ForwardAction::IcmpError {
            interface: iface.name.clone(),
            frame: reply,
        },
        Err(e) => {
            debug!("ICMP {}/{} not built: {}", icmp_type as u8, code, e);
            ForwardAction::Drop
        }
    }
}

fn map_internal(
    nat: &NatTable,
    ip: Ipv4Addr,
    port: u16,
    mapping_type: MappingType,
) -> Option<Mapping> {
    nat.lookup_internal(ip, port, mapping_type)
        .or_else(|| nat.insert(ip, port, mapping_type).ok())
}

/// Rewrite the source of a packet leaving through the external interface.
///
/// Returns false when the packet cannot be translated and must not leave.
fn translate_outbound(nat: &NatTable, packet: &mut Ipv4Packet) -> bool {
    let src = packet.src_addr();
    let dst = packet.dst_addr();

    match Protocol::from_u8(packet.protocol()) {
        Some(Protocol::Icmp) => {
            let identifier = match IcmpPacket::parse(packet.payload()) {
                Ok(icmp) if icmp.is_echo_request() => icmp.identifier(),
                _ => {
                    trace!("NAT: only echo requests leave through NAT");
                    return false;
                }
            };
            let Some(mapping) = map_internal(nat, src, identifier, MappingType::Query) else {
                return false;
            };
            if rewrite_identifier(packet.payload_mut(), mapping.external_port).is_err() {
                return false;
            }
            packet.set_src_addr(mapping.external_ip);
        }
        Some(Protocol::Tcp) => {
            let (src_port, dst_port, flags) = match TcpHeader::parse(packet.payload()) {
                Ok(tcp) => (tcp.src_port(), tcp.dst_port(), tcp.flags()),
                Err(e) => {
                    trace!("NAT: {}", e);
                    return false;
                }
            };
            let Some(mapping) = map_internal(nat, src, src_port, MappingType::Stream) else {
                return false;
            };
            nat.record_tcp(
                mapping.external_port,
                dst,
                dst_port,
                flags,
                Direction::Outbound,
            );

            packet.set_src_addr(mapping.external_ip);
            let Ok(mut segment) = TcpSegmentMut::new(packet.payload_mut()) else {
                return false;
            };
            segment.set_src_port(mapping.external_port);
            segment.update_checksum(mapping.external_ip, dst);
        }
        None => {
            trace!("NAT: protocol {} not translated", packet.protocol());
            return false;
        }
    }

    packet.update_checksum();
    true
}

/// External port and mapping kind an inbound packet would be matched on
fn inbound_key(packet: &Ipv4Packet) -> Option<(u16, MappingType)> {
    match Protocol::from_u8(packet.protocol())? {
        Protocol::Icmp => match IcmpPacket::parse(packet.payload()) {
            Ok(icmp) if icmp.is_echo_reply() => Some((icmp.identifier(), MappingType::Query)),
            _ => None,
        },
        Protocol::Tcp => TcpHeader::parse(packet.payload())
            .ok()
            .map(|tcp| (tcp.dst_port(), MappingType::Stream)),
    }
}

/// Rewrite the destination of a packet arriving for the external address.
///
/// Returns false when no mapping matches; the packet is then ours.
fn translate_inbound(nat: &NatTable, packet: &mut Ipv4Packet) -> bool {
    let src = packet.src_addr();
    let Some((port, kind)) = inbound_key(packet) else {
        return false;
    };
    let Some(mapping) = nat.lookup_external(port, kind) else {
        return false;
    };

    match kind {
        MappingType::Query => {
            if rewrite_identifier(packet.payload_mut(), mapping.internal_port).is_err() {
                return false;
            }
            packet.set_dst_addr(mapping.internal_ip);
        }
        MappingType::Stream => {
            let (src_port, flags) = match TcpHeader::parse(packet.payload()) {
                Ok(tcp) => (tcp.src_port(), tcp.flags()),
                Err(_) => return false,
            };
            nat.record_tcp(port, src, src_port, flags, Direction::Inbound);

            packet.set_dst_addr(mapping.internal_ip);
            let Ok(mut segment) = TcpSegmentMut::new(packet.payload_mut()) else {
                return false;
            };
            segment.set_dst_port(mapping.internal_port);
            segment.update_checksum(src, mapping.internal_ip);
        }
    }

    packet.update_checksum();
    true
}
