//! In-process router fixture
//!
//! Topology:
//!   host (10.0.1.100) -- eth1 -- router -- eth2 -- gateway (172.64.3.254)
//!                                  |
//!                                eth3 -- 10.0.2.254 (serves 10.0.0.0/8)

use natrouter::dataplane::{
    ArpCache, Interface, InterfaceTable, NatTable, NatTimeouts, Outbound, Route, Router,
    RoutingTable, mask_from_prefix,
};
use natrouter::protocol::ethernet::{FrameBuilder, HEADER_SIZE};
use natrouter::protocol::ipv4::Ipv4Builder;
use natrouter::protocol::tcp::{MIN_HEADER_SIZE, TcpFlags, tcp_checksum};
use natrouter::protocol::{EtherType, MacAddr};
use natrouter::telemetry::MetricsRegistry;
use std::net::Ipv4Addr;
use std::sync::Arc;

pub const ETH1_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 1);
pub const ETH2_IP: Ipv4Addr = Ipv4Addr::new(172, 64, 3, 1);
pub const ETH3_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 1);
pub const ETH1_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 1]);
pub const ETH2_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 2]);
pub const ETH3_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 3]);

pub const HOST: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 100);
pub const HOST_MAC: MacAddr = MacAddr([0x02, 0xaa, 0, 0, 0, 1]);
pub const GATEWAY: Ipv4Addr = Ipv4Addr::new(172, 64, 3, 254);
pub const GATEWAY_MAC: MacAddr = MacAddr([0x02, 0xbb, 0, 0, 0, 1]);
pub const CORE: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 254);
pub const CORE_MAC: MacAddr = MacAddr([0x02, 0xcc, 0, 0, 0, 1]);
pub const SERVER: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);

pub fn make_router() -> Router {
    let mut interfaces = InterfaceTable::new();
    interfaces.add(Interface::new("eth1", ETH1_IP, ETH1_MAC));
    interfaces.add(Interface::new("eth2", ETH2_IP, ETH2_MAC));
    interfaces.add(Interface::new("eth3", ETH3_IP, ETH3_MAC));

    let mut routes = RoutingTable::new();
    routes.add(Route::new(
        Ipv4Addr::UNSPECIFIED,
        mask_from_prefix(0),
        GATEWAY,
        "eth2",
    ));
    routes.add(Route::new(
        Ipv4Addr::new(10, 0, 0, 0),
        mask_from_prefix(8),
        CORE,
        "eth3",
    ));
    routes.add(Route::new(
        Ipv4Addr::new(10, 0, 1, 0),
        mask_from_prefix(24),
        Ipv4Addr::UNSPECIFIED,
        "eth1",
    ));

    Router::new(interfaces, routes, Arc::new(MetricsRegistry::new()))
}

/// Router with NAT between eth1 (internal) and eth2 (external)
pub fn make_nat_router() -> (Router, Arc<NatTable>) {
    let mut router = make_router();
    let table = Arc::new(NatTable::new(
        ETH2_IP,
        NatTimeouts::default(),
        router.metrics().clone(),
    ));
    router
        .enable_nat(table.clone(), "eth2", &["eth1".to_string()])
        .unwrap();
    (router, table)
}

/// Pre-resolve the neighbours so forwarding does not wait on ARP
pub fn prime_arp(router: &mut Router) {
    let cache = router.arp_cache_mut();
    cache.insert(HOST_MAC, HOST);
    cache.insert(GATEWAY_MAC, GATEWAY);
    cache.insert(CORE_MAC, CORE);
}

pub fn make_frame(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    ttl: u8,
    protocol: u8,
    payload: &[u8],
) -> Vec<u8> {
    let packet = Ipv4Builder::new()
        .ttl(ttl)
        .protocol(protocol)
        .src_addr(src)
        .dst_addr(dst)
        .payload(payload)
        .build();
    FrameBuilder::new()
        .dst_mac(dst_mac)
        .src_mac(src_mac)
        .ethertype(EtherType::Ipv4 as u16)
        .payload(&packet)
        .build()
}

pub fn make_tcp(src: (Ipv4Addr, u16), dst: (Ipv4Addr, u16), flags: TcpFlags) -> Vec<u8> {
    let mut seg = vec![0u8; MIN_HEADER_SIZE];
    seg[0..2].copy_from_slice(&src.1.to_be_bytes());
    seg[2..4].copy_from_slice(&dst.1.to_be_bytes());
    seg[4..8].copy_from_slice(&7u32.to_be_bytes());
    seg[12] = 5 << 4;
    seg[13] = flags.to_byte();
    seg[14..16].copy_from_slice(&4096u16.to_be_bytes());
    let sum = tcp_checksum(src.0, dst.0, &seg);
    seg[16..18].copy_from_slice(&sum.to_be_bytes());
    seg
}

/// The only frame sent, and where it went
pub fn single(out: Outbound) -> (String, Vec<u8>) {
    assert_eq!(out.len(), 1, "expected exactly one frame, got {:?}", out);
    out.into_iter().next().unwrap()
}

/// IPv4 packet carried by an Ethernet frame
pub fn ip_of(frame: &[u8]) -> &[u8] {
    &frame[HEADER_SIZE..]
}
