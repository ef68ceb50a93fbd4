//! Data plane components
//!
//! Handles packet processing: ARP, forwarding decisions, ICMP generation
//! and NAT, driven frame by frame through [`Router`].

mod arp_cache;
mod arp_handler;
mod forwarder;
mod icmp_generator;
mod interfaces;
mod nat;
mod port_allocator;
mod router;
mod routing;

pub use arp_cache::{ArpCache, ArpEvent, ArpTable, ArpTimers, PendingRequest, QueuedFrame};
pub use arp_handler::{ArpAction, process_arp};
pub use forwarder::{ForwardAction, Forwarder, NatPolicy};
pub use icmp_generator::generate as generate_icmp;
pub use interfaces::{Interface, InterfaceTable};
pub use nat::{
    Connection, ConnectionStatus, Direction, Mapping, MappingType, NatTable, NatTimeouts,
    SweepStats,
};
pub use port_allocator::{NUM_PORTS, PORT_BASE, PortAllocator};
pub use router::{AGING_INTERVAL, Outbound, Router};
pub use routing::{Route, RoutingTable, TieBreak, mask_from_prefix};
