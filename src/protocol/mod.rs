//! Wire formats
//!
//! Ethernet, ARP, IPv4, ICMP and the slice of TCP that NAT needs,
//! each parsed in place and built with small builders.

pub mod arp;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod tcp;
pub mod types;

pub use types::*;
