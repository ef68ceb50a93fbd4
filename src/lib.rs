//! natrouter - Software Router with NAT
//!
//! A userspace IPv4 router data plane: Ethernet demultiplexing, ARP,
//! IP forwarding with ICMP diagnostics, and stateful NAT for ICMP echo
//! and TCP traffic crossing an internal/external boundary.

pub mod capture;
pub mod config;
pub mod dataplane;
pub mod error;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};
