//! Data plane tests: whole frames in, whole frames out
//!
//! Run with: cargo test --test dataplane

mod harness;

use harness::*;
use natrouter::dataplane::{ArpCache, MappingType, Outbound, PORT_BASE, Router};
use natrouter::protocol::MacAddr;
use natrouter::protocol::arp::{ArpOp, ArpPacket};
use natrouter::protocol::ethernet::{Frame, HEADER_SIZE};
use natrouter::protocol::icmp::{
    EchoRequestBuilder, IcmpPacket, IcmpType, build_echo_reply, dest_unreachable, time_exceeded,
};
use natrouter::protocol::ipv4::{INITIAL_TTL, Ipv4Header, Protocol};
use natrouter::protocol::tcp::{TcpFlags, TcpHeader};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

const UDP: u8 = 17;

fn syn() -> TcpFlags {
    TcpFlags {
        syn: true,
        ..Default::default()
    }
}

fn syn_ack() -> TcpFlags {
    TcpFlags {
        syn: true,
        ack: true,
        ..Default::default()
    }
}

fn echo_from_host(dst: Ipv4Addr, identifier: u16, ttl: u8) -> Vec<u8> {
    let request = EchoRequestBuilder::new(identifier, 1)
        .payload(b"abcdefgh")
        .build();
    make_frame(
        HOST_MAC,
        ETH1_MAC,
        HOST,
        dst,
        ttl,
        Protocol::Icmp as u8,
        &request,
    )
}

/// Echo request from the host on eth1
fn ping(router: &mut Router, dst: Ipv4Addr, identifier: u16) -> Outbound {
    router.handle_frame("eth1", &echo_from_host(dst, identifier, 64))
}

fn assert_icmp_error(frame: &[u8], icmp_type: IcmpType, code: u8, from: Ipv4Addr) {
    let eth = Frame::parse(frame).unwrap();
    assert_eq!(eth.dst_mac(), HOST_MAC);

    let ip = Ipv4Header::parse(eth.payload()).unwrap();
    assert!(ip.validate_checksum());
    assert_eq!(ip.src_addr(), from);
    assert_eq!(ip.dst_addr(), HOST);
    assert_eq!(ip.ttl(), INITIAL_TTL);

    let icmp = IcmpPacket::parse(ip.payload()).unwrap();
    assert_eq!(icmp.icmp_type(), icmp_type as u8);
    assert_eq!(icmp.code(), code);
    assert!(icmp.validate_checksum());

    // Quoted header of the offending datagram
    let quoted = Ipv4Header::parse(&icmp.body()[4..]).unwrap();
    assert_eq!(quoted.src_addr(), HOST);
}

#[test]
fn test_echo_request_to_router() {
    let mut router = make_router();

    let (iface, frame) = single(ping(&mut router, ETH1_IP, 0x4242));
    assert_eq!(iface, "eth1");

    let eth = Frame::parse(&frame).unwrap();
    assert_eq!(eth.dst_mac(), HOST_MAC);
    assert_eq!(eth.src_mac(), ETH1_MAC);

    let ip = Ipv4Header::parse(eth.payload()).unwrap();
    assert!(ip.validate_checksum());
    assert_eq!(ip.src_addr(), ETH1_IP);
    assert_eq!(ip.dst_addr(), HOST);

    let icmp = IcmpPacket::parse(ip.payload()).unwrap();
    assert!(icmp.is_echo_reply());
    assert!(icmp.validate_checksum());
    assert_eq!(icmp.identifier(), 0x4242);
    assert_eq!(icmp.sequence(), 1);
    assert_eq!(&icmp.body()[4..], b"abcdefgh");

    assert_eq!(router.metrics().icmp_echo_replies.get(), 1);
}

#[test]
fn test_ttl_expiry_sends_time_exceeded() {
    let mut router = make_router();
    prime_arp(&mut router);

    let out = router.handle_frame("eth1", &echo_from_host(SERVER, 1, 1));
    let (iface, frame) = single(out);

    assert_eq!(iface, "eth1");
    assert_icmp_error(
        &frame,
        IcmpType::TimeExceeded,
        time_exceeded::TTL_EXCEEDED,
        ETH1_IP,
    );
    assert_eq!(router.metrics().packets_forwarded.get(), 0);
}

#[test]
fn test_longest_prefix_wins() {
    let mut router = make_router();
    prime_arp(&mut router);
    let on_link = Ipv4Addr::new(10, 0, 1, 50);
    router
        .arp_cache_mut()
        .insert(MacAddr([0x02, 0xdd, 0, 0, 0, 1]), on_link);

    // 10.0.1.0/24 beats 10.0.0.0/8 and goes straight to the host
    let inbound = make_frame(
        CORE_MAC,
        ETH3_MAC,
        Ipv4Addr::new(10, 7, 0, 1),
        on_link,
        64,
        UDP,
        &[0u8; 8],
    );
    let (iface, frame) = single(router.handle_frame("eth3", &inbound));
    assert_eq!(iface, "eth1");
    assert_eq!(
        Frame::parse(&frame).unwrap().dst_mac(),
        MacAddr([0x02, 0xdd, 0, 0, 0, 1])
    );

    // Only /8 matches: via the core gateway
    let (iface, frame) = single(ping(&mut router, Ipv4Addr::new(10, 200, 0, 9), 5));
    assert_eq!(iface, "eth3");
    let eth = Frame::parse(&frame).unwrap();
    assert_eq!(eth.dst_mac(), CORE_MAC);
    assert_eq!(eth.src_mac(), ETH3_MAC);
    let ip = Ipv4Header::parse(eth.payload()).unwrap();
    assert_eq!(ip.ttl(), 63);
    assert!(ip.validate_checksum());

    // Everything else: default route
    let (iface, frame) = single(ping(&mut router, SERVER, 6));
    assert_eq!(iface, "eth2");
    assert_eq!(Frame::parse(&frame).unwrap().dst_mac(), GATEWAY_MAC);
    assert_eq!(router.metrics().packets_forwarded.get(), 3);
}

#[test]
fn test_arp_request_for_router() {
    let mut router = make_router();
    let request = ArpPacket::request(HOST_MAC, HOST, ETH1_IP).to_frame();

    let (iface, frame) = single(router.handle_frame("eth1", &request));
    assert_eq!(iface, "eth1");

    let eth = Frame::parse(&frame).unwrap();
    assert_eq!(eth.dst_mac(), HOST_MAC);
    assert_eq!(eth.src_mac(), ETH1_MAC);

    let reply = ArpPacket::parse(eth.payload()).unwrap();
    assert_eq!(reply.operation, ArpOp::Reply);
    assert_eq!(reply.sender_mac, ETH1_MAC);
    assert_eq!(reply.sender_ip, ETH1_IP);
    assert_eq!(reply.target_mac, HOST_MAC);
    assert_eq!(reply.target_ip, HOST);

    // Asking eth1 about eth2's address gets nothing
    let elsewhere = ArpPacket::request(HOST_MAC, HOST, ETH2_IP).to_frame();
    assert!(router.handle_frame("eth1", &elsewhere).is_empty());
}

#[test]
fn test_malformed_frames_dropped() {
    let mut router = make_router();

    assert!(router.handle_frame("eth1", &[0u8; HEADER_SIZE - 1]).is_empty());

    let mut corrupt = echo_from_host(ETH1_IP, 1, 64);
    corrupt[HEADER_SIZE + 10] ^= 0xff;
    assert!(router.handle_frame("eth1", &corrupt).is_empty());

    let truncated = echo_from_host(ETH1_IP, 1, 64);
    assert!(router.handle_frame("eth1", &truncated[..HEADER_SIZE + 12]).is_empty());

    assert!(router.handle_frame("eth9", &echo_from_host(ETH1_IP, 1, 64)).is_empty());
}

#[test]
fn test_arp_request_for_neighbour_ignored() {
    let mut router = make_router();
    let neighbour = Ipv4Addr::new(10, 0, 1, 77);

    let request = ArpPacket::request(HOST_MAC, HOST, neighbour).to_frame();
    assert!(router.handle_frame("eth1", &request).is_empty());

    let request = ArpPacket::request(GATEWAY_MAC, GATEWAY, ETH3_IP).to_frame();
    assert!(router.handle_frame("eth2", &request).is_empty());
    assert_eq!(router.arp_cache().pending_len(), 0);
}

#[test]
fn test_nat_malformed_frames_leave_no_state() {
    let (mut router, table) = make_nat_router();

    let segment = make_tcp((HOST, 40000), (SERVER, 80), syn());
    let mut corrupt = make_frame(HOST_MAC, ETH1_MAC, HOST, SERVER, 64, 6, &segment);
    corrupt[HEADER_SIZE + 10] ^= 0xff;
    assert!(router.handle_frame("eth1", &corrupt).is_empty());

    let whole = make_frame(HOST_MAC, ETH1_MAC, HOST, SERVER, 64, 6, &segment);
    assert!(router.handle_frame("eth1", &whole[..HEADER_SIZE + 12]).is_empty());

    assert!(table.is_empty());
    assert_eq!(table.ports_in_use(), 0);
    assert_eq!(router.arp_cache().pending_len(), 0);
    assert_eq!(router.metrics().nat_mappings_created.get(), 0);
}

#[test]
fn test_udp_to_router_port_unreachable() {
    let mut router = make_router();
    let datagram = make_frame(HOST_MAC, ETH1_MAC, HOST, ETH1_IP, 64, UDP, &[0u8; 8]);

    let (iface, frame) = single(router.handle_frame("eth1", &datagram));
    assert_eq!(iface, "eth1");
    assert_icmp_error(
        &frame,
        IcmpType::DestinationUnreachable,
        dest_unreachable::PORT_UNREACHABLE,
        ETH1_IP,
    );
}

#[test]
fn test_queued_until_arp_reply() {
    let mut router = make_router();
    router.arp_cache_mut().insert(HOST_MAC, HOST);

    let (iface, request) = single(ping(&mut router, SERVER, 1));
    assert_eq!(iface, "eth2");
    let eth = Frame::parse(&request).unwrap();
    assert!(eth.dst_mac().is_broadcast());
    let arp = ArpPacket::parse(eth.payload()).unwrap();
    assert_eq!(arp.operation, ArpOp::Request);
    assert_eq!(arp.sender_ip, ETH2_IP);
    assert_eq!(arp.target_ip, GATEWAY);

    // Second packet joins the queue without another request
    assert!(ping(&mut router, SERVER, 2).is_empty());

    let reply = ArpPacket::reply(GATEWAY_MAC, GATEWAY, ETH2_MAC, ETH2_IP).to_frame();
    let out = router.handle_frame("eth2", &reply);
    assert_eq!(out.len(), 2);
    for (iface, frame) in &out {
        assert_eq!(iface, "eth2");
        let eth = Frame::parse(frame).unwrap();
        assert_eq!(eth.dst_mac(), GATEWAY_MAC);
        assert_eq!(eth.src_mac(), ETH2_MAC);
    }

    // Now cached: forwarded immediately
    let (iface, _) = single(ping(&mut router, SERVER, 3));
    assert_eq!(iface, "eth2");
}

#[test]
fn test_arp_give_up_sends_host_unreachable() {
    let mut router = make_router();
    router.arp_cache_mut().insert(HOST_MAC, HOST);

    assert_eq!(ping(&mut router, SERVER, 1).len(), 1);
    let start = Instant::now();

    for step in 1..=4 {
        let out = router.run_aging_at(start + Duration::from_millis(1100 * step));
        let (iface, frame) = single(out);
        assert_eq!(iface, "eth2");
        let arp = ArpPacket::parse(Frame::parse(&frame).unwrap().payload()).unwrap();
        assert_eq!(arp.target_ip, GATEWAY);
    }

    let out = router.run_aging_at(start + Duration::from_millis(1100 * 5));
    let (iface, frame) = single(out);
    assert_eq!(iface, "eth1");
    assert_icmp_error(
        &frame,
        IcmpType::DestinationUnreachable,
        dest_unreachable::HOST_UNREACHABLE,
        ETH1_IP,
    );
    assert_eq!(router.metrics().arp_requests_sent.get(), 5);

    // Nothing left pending
    assert!(
        router
            .run_aging_at(start + Duration::from_secs(10))
            .is_empty()
    );
}

#[test]
fn test_nat_echo_round_trip() {
    let (mut router, table) = make_nat_router();
    prime_arp(&mut router);

    let (iface, frame) = single(ping(&mut router, SERVER, 0x1234));
    assert_eq!(iface, "eth2");
    let ip = Ipv4Header::parse(&frame[HEADER_SIZE..]).unwrap();
    assert!(ip.validate_checksum());
    assert_eq!(ip.src_addr(), ETH2_IP);
    assert_eq!(ip.dst_addr(), SERVER);
    let icmp = IcmpPacket::parse(ip.payload()).unwrap();
    assert!(icmp.validate_checksum());
    let external_id = icmp.identifier();
    assert!(external_id >= PORT_BASE);

    let mapping = table
        .lookup_external(external_id, MappingType::Query)
        .unwrap();
    assert_eq!(mapping.internal_ip, HOST);
    assert_eq!(mapping.internal_port, 0x1234);

    let reply = build_echo_reply(icmp.body());
    let inbound = make_frame(
        GATEWAY_MAC,
        ETH2_MAC,
        SERVER,
        ETH2_IP,
        60,
        Protocol::Icmp as u8,
        &reply,
    );
    let (iface, frame) = single(router.handle_frame("eth2", &inbound));
    assert_eq!(iface, "eth1");
    assert_eq!(Frame::parse(&frame).unwrap().dst_mac(), HOST_MAC);
    let ip = Ipv4Header::parse(ip_of(&frame)).unwrap();
    assert!(ip.validate_checksum());
    assert_eq!(ip.src_addr(), SERVER);
    assert_eq!(ip.dst_addr(), HOST);
    assert_eq!(ip.ttl(), 59);
    let icmp = IcmpPacket::parse(ip.payload()).unwrap();
    assert!(icmp.is_echo_reply());
    assert!(icmp.validate_checksum());
    assert_eq!(icmp.identifier(), 0x1234);
}

#[test]
fn test_nat_tcp_round_trip() {
    let (mut router, table) = make_nat_router();
    prime_arp(&mut router);

    let segment = make_tcp((HOST, 40000), (SERVER, 443), syn());
    let outbound = make_frame(
        HOST_MAC,
        ETH1_MAC,
        HOST,
        SERVER,
        64,
        Protocol::Tcp as u8,
        &segment,
    );
    let (iface, frame) = single(router.handle_frame("eth1", &outbound));
    assert_eq!(iface, "eth2");

    let ip = Ipv4Header::parse(ip_of(&frame)).unwrap();
    assert_eq!(ip.src_addr(), ETH2_IP);
    let tcp = TcpHeader::parse(ip.payload()).unwrap();
    assert!(tcp.validate_checksum(ETH2_IP, SERVER));
    assert_eq!(tcp.dst_port(), 443);
    let external_port = tcp.src_port();
    assert_eq!(table.len(), 1);

    let answer = make_tcp((SERVER, 443), (ETH2_IP, external_port), syn_ack());
    let inbound = make_frame(
        GATEWAY_MAC,
        ETH2_MAC,
        SERVER,
        ETH2_IP,
        64,
        Protocol::Tcp as u8,
        &answer,
    );
    let (iface, frame) = single(router.handle_frame("eth2", &inbound));
    assert_eq!(iface, "eth1");
    let ip = Ipv4Header::parse(ip_of(&frame)).unwrap();
    assert_eq!(ip.dst_addr(), HOST);
    let tcp = TcpHeader::parse(ip.payload()).unwrap();
    assert_eq!(tcp.dst_port(), 40000);
    assert!(tcp.flags().syn && tcp.flags().ack);
    assert!(tcp.validate_checksum(SERVER, HOST));

    let mapping = table
        .lookup_internal(HOST, 40000, MappingType::Stream)
        .unwrap();
    assert_eq!(mapping.external_port, external_port);
    assert_eq!(mapping.connections.len(), 1);
}

#[test]
fn test_nat_unsolicited_tcp_answered_by_router() {
    let (mut router, table) = make_nat_router();
    prime_arp(&mut router);

    let stray = make_tcp((SERVER, 5555), (ETH2_IP, 2000), syn());
    let inbound = make_frame(
        GATEWAY_MAC,
        ETH2_MAC,
        SERVER,
        ETH2_IP,
        64,
        Protocol::Tcp as u8,
        &stray,
    );

    let (iface, frame) = single(router.handle_frame("eth2", &inbound));
    assert_eq!(iface, "eth2");
    let ip = Ipv4Header::parse(ip_of(&frame)).unwrap();
    assert_eq!(ip.dst_addr(), SERVER);
    let icmp = IcmpPacket::parse(ip.payload()).unwrap();
    assert_eq!(icmp.icmp_type(), IcmpType::DestinationUnreachable as u8);
    assert_eq!(icmp.code(), dest_unreachable::PORT_UNREACHABLE);
    assert!(table.is_empty());
}

#[test]
fn test_nat_external_cannot_reach_inside() {
    let (mut router, _table) = make_nat_router();
    prime_arp(&mut router);

    let request = EchoRequestBuilder::new(9, 1).build();
    let inbound = make_frame(
        GATEWAY_MAC,
        ETH2_MAC,
        SERVER,
        HOST,
        64,
        Protocol::Icmp as u8,
        &request,
    );
    assert!(router.handle_frame("eth2", &inbound).is_empty());
    assert_eq!(router.metrics().packets_dropped.get(), 1);
}

#[tokio::test]
async fn test_nat_reaper_lifecycle() {
    let (mut router, table) = make_nat_router();
    prime_arp(&mut router);

    table.start_reaper().unwrap();
    assert!(table.is_reaper_running());

    assert_eq!(ping(&mut router, SERVER, 77).len(), 1);
    assert_eq!(table.len(), 1);

    // Idle query mappings go once the query timeout passes
    let later = Instant::now() + table.timeouts().query + Duration::from_secs(1);
    let stats = table.sweep_at(later);
    assert_eq!(stats.mappings_evicted, 1);
    assert!(table.is_empty());
    assert_eq!(table.ports_in_use(), 0);

    router.shutdown();
    assert!(!router.is_nat_enabled());
    assert!(!table.is_reaper_running());
}
