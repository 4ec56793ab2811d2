//! Policy configuration types
//!
//! These structures mirror the deployed configuration file format
//! (camelCase JSON). Every field tolerates being absent; the merge step in
//! [`crate::config::merge`] treats zero and empty values as unset and fills
//! in the documented defaults, so a partial file and a fully spelled-out
//! one land in the same place.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::iptables::builder::{user_chain_names, CHAIN_NAME_MAX};

/// Root policy configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Identity of the sidecar process whose traffic is exempted
    pub owner: OwnerConfig,

    /// Redirection policy
    pub redirect: RedirectConfig,

    /// Whether an IPv6 pass is compiled in addition to IPv4
    pub ipv6: bool,

    /// Accepted for compatibility; produces no NAT rules
    pub drop_invalid_packets: bool,
}

/// Sidecar process identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OwnerConfig {
    /// UID the sidecar runs as, as a decimal string
    pub uid: String,
}

/// Redirection policy: chain prefix plus the three traffic classes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedirectConfig {
    /// Prefix prepended to every user-defined chain name
    pub name_prefix: String,

    /// Inbound interception
    pub inbound: TrafficFlowConfig,

    /// Outbound interception
    pub outbound: TrafficFlowConfig,

    /// DNS interception
    pub dns: DnsConfig,
}

/// One direction of TCP interception
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrafficFlowConfig {
    /// When false the chain short-circuits with RETURN
    pub enabled: bool,

    /// Sidecar listener port for this direction
    pub port: u16,

    /// Listener port used by the IPv6 pass; 0 falls back to `port`
    #[serde(rename = "portIPv6")]
    pub port_ipv6: u16,

    /// Allow-list of destination ports; non-empty disables exclude handling
    pub include_ports: Vec<u16>,

    /// Destination ports exempted from interception
    pub exclude_ports: Vec<u16>,
}

/// DNS interception policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DnsConfig {
    /// Enable DNS interception
    pub enabled: bool,

    /// Intercept DNS to any destination instead of only the discovered
    /// nameservers
    pub capture_all: bool,

    /// Sidecar DNS listener port
    pub port: u16,

    /// Emit UDP conntrack zone-split rules (needs the conntrack extension)
    pub conntrack_zone_split: bool,

    /// Resolver file the nameserver discovery reads
    pub resolv_config_path: String,
}

impl Config {
    /// Whether DNS traffic is intercepted at all
    #[must_use]
    pub const fn should_redirect_dns(&self) -> bool {
        self.redirect.dns.enabled
    }

    /// Whether DNS to any destination is intercepted, not just the
    /// discovered nameservers
    #[must_use]
    pub const fn should_capture_all_dns(&self) -> bool {
        self.redirect.dns.enabled && self.redirect.dns.capture_all
    }

    /// Whether the conntrack zone-split raw table is wanted
    ///
    /// This only reflects the policy. Whether the kernel actually carries
    /// the conntrack extension is probed by the caller.
    #[must_use]
    pub const fn should_conntrack_zone_split(&self) -> bool {
        self.redirect.dns.enabled && self.redirect.dns.conntrack_zone_split
    }

    /// Validate a merged configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.owner.uid.is_empty() || !self.owner.uid.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ConfigError::Invalid {
                field: "owner.uid".into(),
                reason: format!("expected a decimal UID, got {:?}", self.owner.uid),
            });
        }

        let prefix = &self.redirect.name_prefix;
        if prefix.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid {
                field: "redirect.namePrefix".into(),
                reason: "chain name prefix must not contain whitespace".into(),
            });
        }
        if let Some(name) = user_chain_names(prefix)
            .into_iter()
            .find(|name| name.len() > CHAIN_NAME_MAX)
        {
            return Err(ConfigError::Invalid {
                field: "redirect.namePrefix".into(),
                reason: format!(
                    "chain name {name:?} exceeds the {CHAIN_NAME_MAX} character limit"
                ),
            });
        }

        if self.redirect.inbound.enabled && self.redirect.inbound.port == 0 {
            return Err(ConfigError::Invalid {
                field: "redirect.inbound.port".into(),
                reason: "inbound redirection is enabled but no port is set".into(),
            });
        }
        if self.redirect.outbound.enabled && self.redirect.outbound.port == 0 {
            return Err(ConfigError::Invalid {
                field: "redirect.outbound.port".into(),
                reason: "outbound redirection is enabled but no port is set".into(),
            });
        }
        if self.redirect.dns.enabled && self.redirect.dns.port == 0 {
            return Err(ConfigError::Invalid {
                field: "redirect.dns.port".into(),
                reason: "DNS redirection is enabled but no port is set".into(),
            });
        }

        Ok(())
    }
}
