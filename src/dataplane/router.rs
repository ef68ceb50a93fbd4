//! Router instance
//!
//! Entry point for received frames: demultiplexes by EtherType into the
//! ARP handler or the IP forwarding engine and turns their decisions into
//! outbound frames. Also drives ARP retries and aging.

use super::arp_cache::{ArpCache, ArpEvent, ArpTable, QueuedFrame};
use super::arp_handler::{ArpAction, process_arp};
use super::forwarder::{ForwardAction, Forwarder, NatPolicy};
use super::icmp_generator;
use super::interfaces::InterfaceTable;
use super::nat::NatTable;
use super::routing::RoutingTable;
use crate::protocol::arp::ArpPacket;
use crate::protocol::ethernet::{Frame, set_dst_mac};
use crate::protocol::icmp::{IcmpType, dest_unreachable};
use crate::protocol::{EtherType, MacAddr};
use crate::telemetry::MetricsRegistry;
use crate::{Error, Result};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{Interval, MissedTickBehavior, interval};
use tracing::{debug, info, trace, warn};

/// How often ARP retries and aging run
pub const AGING_INTERVAL: Duration = Duration::from_secs(1);

/// Outbound frames as (interface, frame)
pub type Outbound = Vec<(String, Vec<u8>)>;

/// A software router over a fixed set of interfaces
pub struct Router<A: ArpCache = ArpTable> {
    forwarder: Forwarder,
    arp: A,
    nat: Option<Arc<NatTable>>,
    metrics: Arc<MetricsRegistry>,
}

impl Router<ArpTable> {
    pub fn new(
        interfaces: InterfaceTable,
        routes: RoutingTable,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self::with_arp_cache(interfaces, routes, ArpTable::default(), metrics)
    }
}

impl<A: ArpCache> Router<A> {
    pub fn with_arp_cache(
        interfaces: InterfaceTable,
        routes: RoutingTable,
        arp: A,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        for name in interfaces.names() {
            metrics.register_interface(&name);
        }
        metrics.set_route_count(routes.len());

        Self {
            forwarder: Forwarder::new(interfaces, routes),
            arp,
            nat: None,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn interfaces(&self) -> &InterfaceTable {
        self.forwarder.interfaces()
    }

    pub fn routes(&self) -> &RoutingTable {
        self.forwarder.routes()
    }

    pub fn arp_cache(&self) -> &A {
        &self.arp
    }

    pub fn arp_cache_mut(&mut self) -> &mut A {
        &mut self.arp
    }

    /// Translate between `internal` interfaces and `external`.
    ///
    /// The table's external IP is expected to be the external interface's.
    pub fn enable_nat(
        &mut self,
        table: Arc<NatTable>,
        external: &str,
        internal: &[String],
    ) -> Result<()> {
        for name in std::iter::once(external).chain(internal.iter().map(String::as_str)) {
            if self.interfaces().resolve(name).is_none() {
                return Err(Error::InterfaceNotFound {
                    name: name.to_string(),
                });
            }
        }

        info!(
            "NAT enabled: external {} ({}), internal {:?}",
            external,
            table.external_ip(),
            internal
        );
        self.forwarder
            .set_nat(NatPolicy::new(table.clone(), external, internal));
        self.nat = Some(table);
        Ok(())
    }

    /// Stop translating; the table is handed back to the caller
    pub fn disable_nat(&mut self) -> Option<Arc<NatTable>> {
        self.forwarder.take_nat();
        self.nat.take()
    }

    pub fn is_nat_enabled(&self) -> bool {
        self.nat.is_some()
    }

    pub fn nat(&self) -> Option<&Arc<NatTable>> {
        self.nat.as_ref()
    }

    /// Stop the NAT reaper and release all NAT state.
    pub fn shutdown(&mut self) {
        if let Some(nat) = self.disable_nat() {
            nat.shutdown();
        }
    }

    /// Process a frame received on `ingress`.
    ///
    /// Returns the frames to transmit. Malformed or unwanted input is
    /// dropped and yields nothing.
    pub fn handle_frame(&mut self, ingress: &str, frame: &[u8]) -> Outbound {
        self.metrics.record_rx(ingress, frame.len());

        let eth = match Frame::parse(frame) {
            Ok(f) => f,
            Err(e) => {
                trace!(interface = %ingress, "Failed to parse Ethernet frame: {}", e);
                self.metrics.record_rx_error(ingress);
                return Vec::new();
            }
        };

        match EtherType::from_u16(eth.ethertype()) {
            Some(EtherType::Arp) => self.handle_arp(ingress, eth.payload()),
            Some(EtherType::Ipv4) => self.handle_ipv4(ingress, frame),
            None => {
                trace!(
                    interface = %ingress,
                    "Unsupported EtherType: 0x{:04x}",
                    eth.ethertype()
                );
                self.metrics.record_rx_drop(ingress);
                Vec::new()
            }
        }
    }

    fn handle_arp(&mut self, ingress: &str, payload: &[u8]) -> Outbound {
        let mut out = Vec::new();

        let packet = match ArpPacket::parse(payload) {
            Ok(p) => p,
            Err(e) => {
                trace!(interface = %ingress, "Failed to parse ARP: {}", e);
                self.metrics.record_rx_drop(ingress);
                return out;
            }
        };

        let Some(iface) = self.forwarder.interfaces().resolve(ingress) else {
            debug!("ARP on unknown interface {}", ingress);
            return out;
        };

        match process_arp(&packet, iface, &mut self.arp) {
            ArpAction::Reply(reply) => {
                self.metrics.arp_replies_sent.inc();
                self.emit(&mut out, ingress.to_string(), reply.to_frame());
            }
            ArpAction::Resolved { mac, frames, .. } => {
                for queued in frames {
                    self.release(&mut out, queued, mac);
                }
                self.metrics.set_arp_table_size(self.arp.len());
            }
            ArpAction::None => {}
        }

        out
    }

    fn handle_ipv4(&mut self, ingress: &str, frame: &[u8]) -> Outbound {
        let mut out = Vec::new();

        match self.forwarder.forward(ingress, frame, &mut self.arp) {
            ForwardAction::Forward { interface, frame } => {
                self.metrics.packets_forwarded.inc();
                self.emit(&mut out, interface, frame);
            }
            ForwardAction::ArpRequest { interface, request } => {
                self.metrics.arp_requests_sent.inc();
                self.emit(&mut out, interface, request);
            }
            ForwardAction::Queued => {}
            ForwardAction::EchoReply { interface, frame } => {
                self.metrics.icmp_echo_replies.inc();
                self.emit(&mut out, interface, frame);
            }
            ForwardAction::IcmpError { interface, frame } => {
                self.metrics.icmp_errors_sent.inc();
                self.emit(&mut out, interface, frame);
            }
            ForwardAction::Drop => {
                self.metrics.packets_dropped.inc();
                self.metrics.record_rx_drop(ingress);
            }
        }

        out
    }

    /// Send a frame that was waiting on ARP now that `mac` is known.
    fn release(&self, out: &mut Outbound, mut queued: QueuedFrame, mac: MacAddr) {
        set_dst_mac(&mut queued.frame, mac);
        self.metrics.packets_forwarded.inc();
        self.emit(out, queued.egress, queued.frame);
    }

    fn emit(&self, out: &mut Outbound, interface: String, frame: Vec<u8>) {
        self.metrics.record_tx(&interface, frame.len());
        out.push((interface, frame));
    }

    /// Run ARP retries and aging as of now.
    pub fn run_aging(&mut self) -> Outbound {
        self.run_aging_at(Instant::now())
    }

    pub fn run_aging_at(&mut self, now: Instant) -> Outbound {
        let mut out = Vec::new();

        for event in self.arp.sweep(now) {
            match event {
                ArpEvent::Resend { ip, interface } => {
                    if let Some(request) = self.arp_request(ip, &interface) {
                        self.metrics.arp_requests_sent.inc();
                        self.emit(&mut out, interface, request);
                    }
                }
                ArpEvent::GiveUp { ip, frames, .. } => {
                    debug!("ARP for {} unanswered, dropping {} frames", ip, frames.len());
                    for queued in frames {
                        self.host_unreachable(&mut out, &queued);
                    }
                }
            }
        }

        self.metrics.set_arp_table_size(self.arp.len());
        self.metrics.set_route_count(self.routes().len());
        out
    }

    fn arp_request(&self, ip: Ipv4Addr, interface: &str) -> Option<Vec<u8>> {
        let iface = self.interfaces().resolve(interface)?;
        Some(ArpPacket::request(iface.mac, iface.ip, ip).to_frame())
    }

    fn host_unreachable(&self, out: &mut Outbound, queued: &QueuedFrame) {
        self.metrics.packets_dropped.inc();

        let Some(iface) = self.interfaces().resolve(&queued.ingress) else {
            return;
        };
        match icmp_generator::generate(
            IcmpType::DestinationUnreachable,
            dest_unreachable::HOST_UNREACHABLE,
            iface,
            &queued.original,
        ) {
            Ok(frame) => {
                self.metrics.icmp_errors_sent.inc();
                self.emit(out, iface.name.clone(), frame);
            }
            Err(e) => warn!("Host unreachable not built: {}", e),
        }
    }

    /// Create an aging timer interval
    pub fn aging_interval() -> Interval {
        let mut timer = interval(AGING_INTERVAL);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    }
}
