//! ICMP message generation
//!
//! Builds complete Ethernet + IPv4 + ICMP frames answering a received frame.
//! The reply goes back the way the original came: IP destination is the
//! original source, Ethernet destination is the original sender's MAC.

use super::interfaces::Interface;
use crate::protocol::EtherType;
use crate::protocol::ethernet::{Frame, FrameBuilder};
use crate::protocol::icmp::{IcmpPacket, IcmpType, build_echo_reply, build_error_message};
use crate::protocol::ipv4::{INITIAL_TTL, Ipv4Builder, Ipv4Header, Protocol};
use crate::{Error, Result};
use tracing::trace;

/// Build an ICMP reply to `original` (a full Ethernet frame) sent from `iface`.
///
/// Supports echo reply, destination unreachable and time exceeded; any
/// other type fails with [`Error::UnsupportedIcmpType`].
pub fn generate(
    icmp_type: IcmpType,
    code: u8,
    iface: &Interface,
    original: &[u8],
) -> Result<Vec<u8>> {
    let frame = Frame::parse(original)?;
    let ip = Ipv4Header::parse(frame.payload())?;

    let message = match icmp_type {
        IcmpType::EchoReply => {
            let request = IcmpPacket::parse(ip.payload())?;
            build_echo_reply(request.body())
        }
        IcmpType::DestinationUnreachable | IcmpType::TimeExceeded => {
            build_error_message(icmp_type, code, ip.datagram())?
        }
        other => return Err(Error::UnsupportedIcmpType(other as u8)),
    };

    trace!(
        "ICMP {}/{} from {} to {}",
        icmp_type as u8,
        code,
        iface.ip,
        ip.src_addr()
    );

    let packet = Ipv4Builder::new()
        .ttl(INITIAL_TTL)
        .protocol(Protocol::Icmp as u8)
        .src_addr(iface.ip)
        .dst_addr(ip.src_addr())
        .payload(&message)
        .build();

    Ok(FrameBuilder::new()
        .dst_mac(frame.src_mac())
        .src_mac(iface.mac)
        .ethertype(EtherType::Ipv4 as u16)
        .payload(&packet)
        .build())
}
