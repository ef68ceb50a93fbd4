//! Interface table

use crate::protocol::MacAddr;
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// A router port: fixed after startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
}

impl Interface {
    pub fn new(name: impl Into<String>, ip: Ipv4Addr, mac: MacAddr) -> Self {
        Self {
            name: name.into(),
            ip,
            mac,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InterfaceTable {
    interfaces: HashMap<String, Interface>,
}

impl InterfaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an interface by name
    pub fn add(&mut self, interface: Interface) {
        self.interfaces.insert(interface.name.clone(), interface);
    }

    pub fn resolve(&self, name: &str) -> Option<&Interface> {
        self.interfaces.get(name)
    }

    /// Interface owning `ip`, if any
    pub fn find_by_ip(&self, ip: Ipv4Addr) -> Option<&Interface> {
        self.interfaces.values().find(|iface| iface.ip == ip)
    }

    pub fn is_local(&self, ip: Ipv4Addr) -> bool {
        self.find_by_ip(ip).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.interfaces.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.values()
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}
