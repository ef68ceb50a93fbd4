//! Routing table with longest prefix match

use crate::{Error, Result};
use serde::Deserialize;
use std::net::Ipv4Addr;

/// Route entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Destination network
    pub destination: Ipv4Addr,
    /// Network mask (contiguous)
    pub mask: Ipv4Addr,
    /// Next hop; `0.0.0.0` for directly connected networks
    pub gateway: Ipv4Addr,
    /// Outgoing interface name
    pub interface: String,
}

impl Route {
    pub fn new(
        destination: Ipv4Addr,
        mask: Ipv4Addr,
        gateway: Ipv4Addr,
        interface: impl Into<String>,
    ) -> Self {
        Self {
            destination,
            mask,
            gateway,
            interface: interface.into(),
        }
    }

    pub fn prefix_len(&self) -> u32 {
        u32::from(self.mask).count_ones()
    }

    pub fn matches(&self, addr: Ipv4Addr) -> bool {
        let mask = u32::from(self.mask);
        u32::from(addr) & mask == u32::from(self.destination) & mask
    }

    /// Address to resolve on the link: the gateway, or `dst` itself when
    /// the network is directly connected.
    pub fn next_hop(&self, dst: Ipv4Addr) -> Ipv4Addr {
        if self.gateway.is_unspecified() {
            dst
        } else {
            self.gateway
        }
    }
}

/// Mask for a prefix length (0..=32)
pub fn mask_from_prefix(prefix_len: u8) -> Ipv4Addr {
    match prefix_len {
        0 => Ipv4Addr::UNSPECIFIED,
        n => Ipv4Addr::from(!0u32 << (32 - n.min(32) as u32)),
    }
}

/// Which of several equally long matches wins
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieBreak {
    /// Earliest entry in table order
    #[default]
    First,
    /// Latest entry in table order
    Last,
}

/// Routing table kept in insertion order
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: Vec<Route>,
    tie_break: TieBreak,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tie_break(tie_break: TieBreak) -> Self {
        Self {
            routes: Vec::new(),
            tie_break,
        }
    }

    pub fn set_tie_break(&mut self, tie_break: TieBreak) {
        self.tie_break = tie_break;
    }

    /// Append a route; duplicates are kept and ordered by insertion
    pub fn add(&mut self, route: Route) {
        self.routes.push(route);
    }

    /// Longest prefix match over all entries
    pub fn lookup(&self, addr: Ipv4Addr) -> Option<&Route> {
        let mut best: Option<&Route> = None;

        for route in self.routes.iter().filter(|r| r.matches(addr)) {
            let better = match best {
                None => true,
                Some(current) => match self.tie_break {
                    TieBreak::First => route.prefix_len() > current.prefix_len(),
                    TieBreak::Last => route.prefix_len() >= current.prefix_len(),
                },
            };
            if better {
                best = Some(route);
            }
        }

        best
    }

    /// Parse the plain-text route file format:
    /// `destination gateway mask interface` per line, `#` starts a comment.
    pub fn parse_rtable(text: &str) -> Result<Vec<Route>> {
        let mut routes = Vec::new();

        for (lineno, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split_whitespace().collect();
            let [dest, gateway, mask, iface] = fields[..] else {
                return Err(Error::Config(format!(
                    "rtable line {}: expected 4 fields, got {}",
                    lineno + 1,
                    fields.len()
                )));
            };

            let parse = |field: &str| -> Result<Ipv4Addr> {
                field.parse().map_err(|_| {
                    Error::Config(format!("rtable line {}: bad address '{}'", lineno + 1, field))
                })
            };

            routes.push(Route::new(parse(dest)?, parse(mask)?, parse(gateway)?, iface));
        }

        Ok(routes)
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
