//! Defaults and configuration merging
//!
//! A configuration file only spells out what deviates from the defaults.
//! Merging overlays the parsed file onto [`default_config`], treating zero
//! and empty values as unset. Boolean switches are always taken from the
//! input; their absence deserializes to `false`, which is a deliberate
//! choice, not an unset marker.
//!
//! Merging is idempotent: merging an already-merged configuration changes
//! nothing.

use super::types::{Config, DnsConfig, OwnerConfig, RedirectConfig, TrafficFlowConfig};

/// Default sidecar UID
pub const DEFAULT_OWNER_UID: &str = "5678";

/// Default inbound listener port (IPv4)
pub const DEFAULT_INBOUND_PORT: u16 = 15006;

/// Default inbound listener port for the IPv6 pass
pub const DEFAULT_INBOUND_PORT_IPV6: u16 = 15010;

/// Default outbound listener port
pub const DEFAULT_OUTBOUND_PORT: u16 = 15001;

/// Default sidecar DNS listener port
pub const DEFAULT_DNS_PORT: u16 = 15053;

/// Default resolver file consulted by nameserver discovery
pub const DEFAULT_RESOLV_CONFIG_PATH: &str = "/etc/resolv.conf";

fn default_config() -> Config {
    Config {
        owner: OwnerConfig {
            uid: DEFAULT_OWNER_UID.into(),
        },
        redirect: RedirectConfig {
            name_prefix: String::new(),
            inbound: TrafficFlowConfig {
                enabled: true,
                port: DEFAULT_INBOUND_PORT,
                port_ipv6: DEFAULT_INBOUND_PORT_IPV6,
                include_ports: Vec::new(),
                exclude_ports: Vec::new(),
            },
            outbound: TrafficFlowConfig {
                enabled: true,
                port: DEFAULT_OUTBOUND_PORT,
                port_ipv6: 0,
                include_ports: Vec::new(),
                exclude_ports: Vec::new(),
            },
            dns: DnsConfig {
                enabled: false,
                capture_all: true,
                port: DEFAULT_DNS_PORT,
                conntrack_zone_split: true,
                resolv_config_path: DEFAULT_RESOLV_CONFIG_PATH.into(),
            },
        },
        ipv6: false,
        drop_invalid_packets: false,
    }
}

/// Overlay `cfg` onto the defaults, treating zero/empty values as unset
#[must_use]
pub fn merge_with_defaults(cfg: Config) -> Config {
    let mut result = default_config();

    if !cfg.owner.uid.is_empty() {
        result.owner.uid = cfg.owner.uid;
    }

    if !cfg.redirect.name_prefix.is_empty() {
        result.redirect.name_prefix = cfg.redirect.name_prefix;
    }

    merge_traffic_flow(&mut result.redirect.inbound, cfg.redirect.inbound);
    merge_traffic_flow(&mut result.redirect.outbound, cfg.redirect.outbound);

    result.redirect.dns.enabled = cfg.redirect.dns.enabled;
    result.redirect.dns.capture_all = cfg.redirect.dns.capture_all;
    result.redirect.dns.conntrack_zone_split = cfg.redirect.dns.conntrack_zone_split;
    if cfg.redirect.dns.port != 0 {
        result.redirect.dns.port = cfg.redirect.dns.port;
    }
    if !cfg.redirect.dns.resolv_config_path.is_empty() {
        result.redirect.dns.resolv_config_path = cfg.redirect.dns.resolv_config_path;
    }

    result.ipv6 = cfg.ipv6;
    result.drop_invalid_packets = cfg.drop_invalid_packets;

    result
}

fn merge_traffic_flow(result: &mut TrafficFlowConfig, cfg: TrafficFlowConfig) {
    result.enabled = cfg.enabled;
    if cfg.port != 0 {
        result.port = cfg.port;
    }
    if cfg.port_ipv6 != 0 {
        result.port_ipv6 = cfg.port_ipv6;
    }
    if !cfg.include_ports.is_empty() {
        result.include_ports = cfg.include_ports;
    }
    if !cfg.exclude_ports.is_empty() {
        result.exclude_ports = cfg.exclude_ports;
    }
}
