//! Configuration validation

use super::{Config, parse_cidr};
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_interfaces(config, &mut result);
    validate_routes(config, &mut result);
    validate_nat(config, &mut result);
    validate_arp(config, &mut result);

    result
}

fn validate_interfaces(config: &Config, result: &mut ValidationResult) {
    if config.interfaces.is_empty() {
        result.error("no interfaces defined");
    }

    for (name, iface) in &config.interfaces {
        if let Err(e) = parse_cidr(&iface.address) {
            result.error(format!("interfaces.{}: {}", name, e));
        } else if !iface.address.contains('/') {
            result.warn(format!(
                "interfaces.{}: address '{}' missing prefix length",
                name, iface.address
            ));
        }

        match &iface.mac {
            Some(mac) => {
                if mac.parse::<crate::protocol::MacAddr>().is_err() {
                    result.error(format!("interfaces.{}: invalid mac '{}'", name, mac));
                }
            }
            None => result.warn(format!(
                "interfaces.{}: mac not specified, reading it from the system",
                name
            )),
        }
    }
}

fn validate_routes(config: &Config, result: &mut ValidationResult) {
    if config.routes.is_empty() && config.rtable.is_none() {
        result.warn("no routes defined");
    }

    for (i, route) in config.routes.iter().enumerate() {
        if !config.interfaces.contains_key(&route.interface) {
            result.error(format!(
                "routes[{}]: interface '{}' not defined",
                i, route.interface
            ));
        }

        if let Err(e) = parse_cidr(&route.destination) {
            result.error(format!("routes[{}]: {}", i, e));
        } else if !route.destination.contains('/') {
            result.warn(format!(
                "routes[{}]: destination '{}' missing prefix length",
                i, route.destination
            ));
        }

        if route.gateway.parse::<Ipv4Addr>().is_err() {
            result.error(format!(
                "routes[{}]: invalid gateway '{}'",
                i, route.gateway
            ));
        }
    }

    if let Some(path) = &config.rtable
        && !path.exists()
    {
        result.error(format!("rtable: '{}' does not exist", path.display()));
    }
}

fn validate_nat(config: &Config, result: &mut ValidationResult) {
    let Some(nat) = &config.nat else {
        return;
    };
    if !nat.enabled {
        return;
    }

    if !config.interfaces.contains_key(&nat.external) {
        result.error(format!(
            "nat.external: interface '{}' not defined",
            nat.external
        ));
    }

    if nat.internal.is_empty() {
        result.warn("nat.internal: no internal interfaces, nothing will be translated");
    }
    for internal in &nat.internal {
        if internal == &nat.external {
            result.error(format!(
                "nat.internal: '{}' is also the external interface",
                internal
            ));
        } else if !config.interfaces.contains_key(internal) {
            result.error(format!("nat.internal: interface '{}' not defined", internal));
        }
    }

    for (field, value) in [
        ("icmp_query_timeout", nat.icmp_query_timeout),
        ("tcp_established_timeout", nat.tcp_established_timeout),
        ("tcp_transitory_timeout", nat.tcp_transitory_timeout),
        ("sweep_interval", nat.sweep_interval),
    ] {
        if value == 0 {
            result.error(format!("nat.{}: must be greater than zero", field));
        }
    }
}

fn validate_arp(config: &Config, result: &mut ValidationResult) {
    if config.arp.request_interval == 0 {
        result.error("arp.request_interval: must be greater than zero");
    }
    if config.arp.max_requests == 0 {
        result.error("arp.max_requests: must be greater than zero");
    }
    if config.arp.cache_timeout == 0 {
        result.warn("arp.cache_timeout: zero disables caching");
    }
}
