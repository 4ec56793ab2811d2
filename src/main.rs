//! mesh-tproxy: install transparent-proxy redirect rules
//!
//! This is the bootstrap entry point. It loads the redirect policy,
//! discovers nameservers when DNS interception is on, compiles one NAT
//! document per address family, and pipes each to the restore program.
//!
//! # Usage
//!
//! ```bash
//! # Install rules from the default policy file
//! sudo mesh-tproxy
//!
//! # Install rules from a custom policy file
//! sudo mesh-tproxy -c /path/to/policy.json
//!
//! # Print the documents instead of applying them
//! mesh-tproxy -c policy.json --dry-run
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mesh_tproxy::config::{load_config, Config};
use mesh_tproxy::dns::discover_dns_servers;
use mesh_tproxy::error::RestoreError;
use mesh_tproxy::iptables::{build_nat_table, build_raw_table, AddressFamily};
use mesh_tproxy::restore;

/// Command-line arguments
struct Args {
    /// Policy file path
    config_path: PathBuf,
    /// Print the documents instead of applying them
    dry_run: bool,
    /// Check the policy file only
    check_config: bool,
    /// Loopback interface name
    loopback: String,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/mesh-tproxy/policy.json");
        let mut dry_run = false;
        let mut check_config = false;
        let mut loopback = String::from("lo");

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "--dry-run" => {
                    dry_run = true;
                }
                "--check" => {
                    check_config = true;
                }
                "--loopback" => {
                    if let Some(name) = args.next() {
                        loopback = name;
                    }
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-V" | "--version" => {
                    println!("mesh-tproxy v{}", mesh_tproxy::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            dry_run,
            check_config,
            loopback,
        }
    }
}

fn print_help() {
    println!(
        r#"mesh-tproxy v{}

Installs transparent-proxy redirect rules for a service-mesh sidecar.

USAGE:
    mesh-tproxy [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Policy file [default: /etc/mesh-tproxy/policy.json]
        --dry-run           Print the compiled documents instead of applying them
        --check             Validate the policy file and exit
        --loopback <NAME>   Loopback interface name [default: lo]
    -h, --help              Print help
    -V, --version           Print version

ENVIRONMENT:
    RUST_LOG                Log filter (default: info)"#,
        mesh_tproxy::VERSION
    );
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = load_config(&args.config_path)
        .with_context(|| format!("failed to load policy from {:?}", args.config_path))?;

    if args.check_config {
        println!("Policy file {:?} is valid", args.config_path);
        return Ok(());
    }

    let dns_servers = if config.should_redirect_dns() {
        discover_dns_servers(&config.redirect.dns.resolv_config_path)
            .context("nameserver discovery failed")?
    } else {
        Vec::new()
    };

    let families = if config.ipv6 {
        vec![AddressFamily::Ipv4, AddressFamily::Ipv6]
    } else {
        vec![AddressFamily::Ipv4]
    };

    for family in families {
        install_family(&config, &dns_servers, &args, family)?;
    }

    Ok(())
}

fn install_family(
    config: &Config,
    dns_servers: &[std::net::IpAddr],
    args: &Args,
    family: AddressFamily,
) -> Result<()> {
    let nat = build_nat_table(config, dns_servers, &args.loopback, family);
    let document = nat
        .render()
        .with_context(|| format!("NAT table assembly failed for {family}"))?;

    if args.dry_run {
        println!("{document}");
    } else {
        restore::apply(&document, family)
            .with_context(|| format!("failed to apply NAT rules for {family}"))?;
        info!("Installed NAT redirect rules for {family}");
    }

    if !config.should_conntrack_zone_split() {
        return Ok(());
    }

    if !args.dry_run && !restore::conntrack_available(family) {
        let err = RestoreError::CapabilityUnavailable {
            feature: "conntrack".into(),
        };
        warn!("{err}; skipping DNS zone-split rules for {family}");
        return Ok(());
    }

    let raw = build_raw_table(config, dns_servers, family);
    if raw.is_empty() {
        return Ok(());
    }
    let document = raw
        .render()
        .with_context(|| format!("raw table assembly failed for {family}"))?;

    if args.dry_run {
        println!("{document}");
    } else {
        restore::apply(&document, family)
            .with_context(|| format!("failed to apply raw rules for {family}"))?;
        info!("Installed DNS zone-split rules for {family}");
    }

    Ok(())
}
