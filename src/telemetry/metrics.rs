//! Metrics collection for packet statistics.
//!
//! Thread-safe counters for the forwarding path, ARP and NAT, plus
//! per-interface rx/tx statistics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Counter starting at zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Add one.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `val`.
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-interface statistics.
#[derive(Debug, Default)]
pub struct InterfaceStats {
    /// Frames received on the interface.
    pub rx_packets: Counter,
    /// Bytes received, Ethernet header included.
    pub rx_bytes: Counter,
    /// Frames sent out of the interface.
    pub tx_packets: Counter,
    /// Bytes sent, Ethernet header included.
    pub tx_bytes: Counter,
    /// Received frames the router discarded.
    pub rx_drops: Counter,
    /// Socket errors while receiving.
    pub rx_errors: Counter,
    /// Socket errors while sending.
    pub tx_errors: Counter,
}

impl InterfaceStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one received frame of `bytes` length.
    pub fn record_rx(&self, bytes: usize) {
        self.rx_packets.inc();
        self.rx_bytes.add(bytes as u64);
    }

    /// Count one sent frame of `bytes` length.
    pub fn record_tx(&self, bytes: usize) {
        self.tx_packets.inc();
        self.tx_bytes.add(bytes as u64);
    }
}

/// Global metrics registry for the router.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    interfaces: RwLock<HashMap<String, InterfaceStats>>,

    // ARP
    /// Requests broadcast for unresolved next hops, retries included
    pub arp_requests_sent: Counter,
    /// Replies to requests for one of our addresses
    pub arp_replies_sent: Counter,

    // Forwarding
    /// Packets sent on toward another host
    pub packets_forwarded: Counter,
    /// Malformed, unroutable or untranslatable packets
    pub packets_dropped: Counter,

    // ICMP
    /// Echo replies for pings addressed to the router
    pub icmp_echo_replies: Counter,
    /// Destination unreachable and time exceeded messages
    pub icmp_errors_sent: Counter,

    // NAT
    /// New mappings; refreshing an existing one does not count
    pub nat_mappings_created: Counter,
    /// Mappings removed by the reaper
    pub nat_mappings_evicted: Counter,
    /// Idle TCP connections dropped from their mappings
    pub nat_connections_pruned: Counter,
    /// Inserts refused because the external port pool was full
    pub nat_port_exhausted: Counter,

    // Gauges
    /// Resolved ARP entries
    pub arp_table_size: AtomicU64,
    /// Live NAT mappings
    pub nat_table_size: AtomicU64,
    /// Entries in the routing table
    pub route_count: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn interfaces(&self) -> RwLockReadGuard<'_, HashMap<String, InterfaceStats>> {
        self.interfaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an interface for statistics tracking.
    pub fn register_interface(&self, name: &str) {
        let mut interfaces = self
            .interfaces
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        interfaces.entry(name.to_string()).or_default();
    }

    /// Count a received frame against `interface`; unknown names are ignored.
    pub fn record_rx(&self, interface: &str, bytes: usize) {
        if let Some(stats) = self.interfaces().get(interface) {
            stats.record_rx(bytes);
        }
    }

    pub fn record_tx(&self, interface: &str, bytes: usize) {
        if let Some(stats) = self.interfaces().get(interface) {
            stats.record_tx(bytes);
        }
    }

    pub fn record_rx_drop(&self, interface: &str) {
        if let Some(stats) = self.interfaces().get(interface) {
            stats.rx_drops.inc();
        }
    }

    pub fn record_rx_error(&self, interface: &str) {
        if let Some(stats) = self.interfaces().get(interface) {
            stats.rx_errors.inc();
        }
    }

    /// Count a failed send on `interface`.
    pub fn record_tx_error(&self, interface: &str) {
        if let Some(stats) = self.interfaces().get(interface) {
            stats.tx_errors.inc();
        }
    }

    pub fn set_arp_table_size(&self, size: usize) {
        self.arp_table_size.store(size as u64, Ordering::Relaxed);
    }

    pub fn set_nat_table_size(&self, size: usize) {
        self.nat_table_size.store(size as u64, Ordering::Relaxed);
    }

    pub fn set_route_count(&self, count: usize) {
        self.route_count.store(count as u64, Ordering::Relaxed);
    }

    /// Exports all metrics as key-value pairs.
    pub fn export(&self) -> Vec<(String, u64)> {
        let mut result = vec![
            ("arp_requests_sent".into(), self.arp_requests_sent.get()),
            ("arp_replies_sent".into(), self.arp_replies_sent.get()),
            ("packets_forwarded".into(), self.packets_forwarded.get()),
            ("packets_dropped".into(), self.packets_dropped.get()),
            ("icmp_echo_replies".into(), self.icmp_echo_replies.get()),
            ("icmp_errors_sent".into(), self.icmp_errors_sent.get()),
            ("nat_mappings_created".into(), self.nat_mappings_created.get()),
            ("nat_mappings_evicted".into(), self.nat_mappings_evicted.get()),
            (
                "nat_connections_pruned".into(),
                self.nat_connections_pruned.get(),
            ),
            ("nat_port_exhausted".into(), self.nat_port_exhausted.get()),
            (
                "arp_table_size".into(),
                self.arp_table_size.load(Ordering::Relaxed),
            ),
            (
                "nat_table_size".into(),
                self.nat_table_size.load(Ordering::Relaxed),
            ),
            (
                "route_count".into(),
                self.route_count.load(Ordering::Relaxed),
            ),
        ];

        let interfaces = self.interfaces();
        let mut names: Vec<&String> = interfaces.keys().collect();
        names.sort();
        for name in names {
            let stats = &interfaces[name];
            result.extend([
                (format!("{}_rx_packets", name), stats.rx_packets.get()),
                (format!("{}_rx_bytes", name), stats.rx_bytes.get()),
                (format!("{}_tx_packets", name), stats.tx_packets.get()),
                (format!("{}_tx_bytes", name), stats.tx_bytes.get()),
                (format!("{}_rx_drops", name), stats.rx_drops.get()),
                (format!("{}_rx_errors", name), stats.rx_errors.get()),
                (format!("{}_tx_errors", name), stats.tx_errors.get()),
            ]);
        }

        result
    }
}
