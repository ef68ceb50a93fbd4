//! Configuration types

use crate::dataplane::{ArpTimers, NatTimeouts, TieBreak};
use crate::telemetry::LogConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// User-defined configuration (config.toml)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub interfaces: HashMap<String, InterfaceConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    /// Route file in `dest gateway mask iface` format
    #[serde(default)]
    pub rtable: Option<PathBuf>,
    #[serde(default)]
    pub route_tie_break: TieBreak,
    #[serde(default)]
    pub nat: Option<NatConfig>,
    #[serde(default)]
    pub arp: ArpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterfaceConfig {
    /// `a.b.c.d/len`
    pub address: String,
    /// Read from /sys/class/net when absent
    pub mac: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    pub destination: String,
    #[serde(default = "default_gateway")]
    pub gateway: String,
    pub interface: String,
}

fn default_gateway() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NatConfig {
    pub enabled: bool,
    pub external: String,
    #[serde(default)]
    pub internal: Vec<String>,
    #[serde(default = "default_icmp_query_timeout")]
    pub icmp_query_timeout: u64,
    #[serde(default = "default_tcp_established_timeout")]
    pub tcp_established_timeout: u64,
    #[serde(default = "default_tcp_transitory_timeout")]
    pub tcp_transitory_timeout: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,
}

fn default_icmp_query_timeout() -> u64 {
    60
}

fn default_tcp_established_timeout() -> u64 {
    7440
}

fn default_tcp_transitory_timeout() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    1
}

impl NatConfig {
    pub fn timeouts(&self) -> NatTimeouts {
        NatTimeouts {
            query: Duration::from_secs(self.icmp_query_timeout),
            established: Duration::from_secs(self.tcp_established_timeout),
            transitory: Duration::from_secs(self.tcp_transitory_timeout),
            sweep_interval: Duration::from_secs(self.sweep_interval),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArpConfig {
    #[serde(default = "default_cache_timeout")]
    pub cache_timeout: u64,
    #[serde(default = "default_request_interval")]
    pub request_interval: u64,
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
}

fn default_cache_timeout() -> u64 {
    15
}

fn default_request_interval() -> u64 {
    1
}

fn default_max_requests() -> u32 {
    5
}

impl Default for ArpConfig {
    fn default() -> Self {
        Self {
            cache_timeout: default_cache_timeout(),
            request_interval: default_request_interval(),
            max_requests: default_max_requests(),
        }
    }
}

impl ArpConfig {
    pub fn timers(&self) -> ArpTimers {
        ArpTimers {
            cache_timeout: Duration::from_secs(self.cache_timeout),
            request_interval: Duration::from_secs(self.request_interval),
            max_requests: self.max_requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_filled_in() {
        let config: Config = toml::from_str(
            r#"
            [interfaces.eth1]
            address = "10.0.1.1/24"

            [interfaces.eth2]
            address = "172.64.3.1/24"
            mac = "02:00:00:00:00:02"

            [[routes]]
            destination = "0.0.0.0/0"
            gateway = "172.64.3.254"
            interface = "eth2"

            [[routes]]
            destination = "10.0.1.0/24"
            interface = "eth1"

            [nat]
            enabled = true
            external = "eth2"
            internal = ["eth1"]
            "#,
        )
        .unwrap();

        assert_eq!(config.interfaces.len(), 2);
        assert_eq!(config.routes[1].gateway, "0.0.0.0");
        assert_eq!(config.route_tie_break, TieBreak::First);
        assert_eq!(config.log, LogConfig::default());

        let nat = config.nat.unwrap();
        assert_eq!(nat.timeouts(), NatTimeouts::default());
        assert_eq!(config.arp.timers(), ArpTimers::default());
    }

    #[test]
    fn test_tie_break_and_overrides() {
        let config: Config = toml::from_str(
            r#"
            route_tie_break = "last"

            [arp]
            max_requests = 3

            [log]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.route_tie_break, TieBreak::Last);
        assert_eq!(config.arp.max_requests, 3);
        assert_eq!(config.arp.request_interval, 1);
        assert_eq!(config.log.format, "json");
    }
}
