//! Configuration management
//!
//! Loads config.toml and turns it into the interface and route tables the
//! router runs with.

mod types;
mod validation;

pub use types::*;
pub use validation::{ValidationResult, validate};

use crate::dataplane::{Interface, InterfaceTable, Route, RoutingTable, mask_from_prefix};
use crate::protocol::MacAddr;
use crate::{Error, Result};
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::{debug, warn};

/// Load configuration from a TOML file
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    let config: Config = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
    Ok(config)
}

/// Parse `a.b.c.d/len`; a bare address is a /32.
pub fn parse_cidr(cidr: &str) -> Result<(Ipv4Addr, u8)> {
    let (addr, prefix) = match cidr.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (cidr, None),
    };

    let ip: Ipv4Addr = addr
        .parse()
        .map_err(|_| Error::Config(format!("Invalid IP: {}", addr)))?;
    let prefix_len = match prefix {
        Some(p) => p
            .parse::<u8>()
            .ok()
            .filter(|len| *len <= 32)
            .ok_or_else(|| Error::Config(format!("Invalid prefix: {}", p)))?,
        None => 32,
    };

    Ok((ip, prefix_len))
}

/// Build the interface table, reading missing MACs from sysfs.
pub fn interface_table(config: &Config) -> Result<InterfaceTable> {
    let mut table = InterfaceTable::new();

    for (name, iface) in &config.interfaces {
        let (ip, _) = parse_cidr(&iface.address)?;
        let mac = match &iface.mac {
            Some(mac) => mac
                .parse()
                .map_err(|e| Error::Config(format!("interfaces.{}: {}", name, e)))?,
            None => sysfs_mac(name)?,
        };
        debug!("Interface {}: {} {}", name, ip, mac);
        table.add(Interface::new(name.clone(), ip, mac));
    }

    Ok(table)
}

/// Build the route table: `[[routes]]` first, then the rtable file.
pub fn routing_table(config: &Config) -> Result<RoutingTable> {
    let mut table = RoutingTable::with_tie_break(config.route_tie_break);

    for route in &config.routes {
        let (destination, prefix_len) = parse_cidr(&route.destination)?;
        let gateway: Ipv4Addr = route
            .gateway
            .parse()
            .map_err(|_| Error::Config(format!("Invalid gateway: {}", route.gateway)))?;
        table.add(Route::new(
            destination,
            mask_from_prefix(prefix_len),
            gateway,
            route.interface.clone(),
        ));
    }

    if let Some(path) = &config.rtable {
        let text = std::fs::read_to_string(path).map_err(Error::Io)?;
        for route in RoutingTable::parse_rtable(&text)? {
            table.add(route);
        }
    }

    Ok(table)
}

fn sysfs_mac(name: &str) -> Result<MacAddr> {
    let path = format!("/sys/class/net/{}/address", name);
    let content = std::fs::read_to_string(&path).map_err(|e| {
        warn!("Cannot read {}: {}", path, e);
        Error::InterfaceNotFound {
            name: name.to_string(),
        }
    })?;
    content
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{}: {}", path, e)))
}
