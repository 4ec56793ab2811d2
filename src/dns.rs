//! Nameserver discovery from resolver configuration
//!
//! Reads `nameserver` entries from a resolv.conf-style file. The compiler
//! receives the result as plain addresses; splitting by address family
//! happens inside the compile pass.

use std::net::IpAddr;
use std::path::Path;

use tracing::debug;

use crate::error::DiscoveryError;

/// Collect nameserver addresses from `path`
///
/// Comment lines (`#`, `;`) and entries that do not parse as IP addresses
/// are skipped. Order follows the file.
///
/// # Errors
///
/// Returns [`DiscoveryError::Read`] when the file cannot be read.
pub fn discover_dns_servers(path: impl AsRef<Path>) -> Result<Vec<IpAddr>, DiscoveryError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| DiscoveryError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let mut servers = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        let mut tokens = line.split_whitespace();
        if tokens.next() != Some("nameserver") {
            continue;
        }
        let Some(address) = tokens.next() else {
            continue;
        };

        match address.parse::<IpAddr>() {
            Ok(ip) => servers.push(ip),
            Err(_) => debug!("Skipping unparseable nameserver entry: {address}"),
        }
    }

    debug!("Discovered {} nameservers in {:?}", servers.len(), path);
    Ok(servers)
}
