//! Policy compiler: from merged configuration to NAT and raw tables
//!
//! Everything here is a pure function of the configuration, the discovered
//! nameservers, the loopback interface name, and the address family. No
//! I/O, no syscalls, no environment reads. Dual-stack hosts run the
//! compiler twice and get two independent documents.
//!
//! Rule order within each chain is the contract: exemptions must precede
//! the catch-all dispatch, and the loopback-scoped rules must precede the
//! owner catch-all, or application traffic silently breaks.

use std::net::IpAddr;

use crate::config::types::{Config, TrafficFlowConfig};
use crate::iptables::chain::Chain;
use crate::iptables::parameters::{AddressFamily, PortQualifier, Predicate, Target, DNS_PORT};
use crate::iptables::rule::Rule;
use crate::iptables::table::{NatTable, RawTable};

/// Inbound interception chain
pub const INBOUND_CHAIN: &str = "MESH_INBOUND";

/// Outbound interception chain
pub const OUTBOUND_CHAIN: &str = "MESH_OUTBOUND";

/// Inbound redirect chain
pub const INBOUND_REDIRECT_CHAIN: &str = "MESH_INBOUND_REDIRECT";

/// Outbound redirect chain
pub const OUTBOUND_REDIRECT_CHAIN: &str = "MESH_OUTBOUND_REDIRECT";

/// Kernel limit on chain name length
pub const CHAIN_NAME_MAX: usize = 28;

fn full_name(prefix: &str, base: &str) -> String {
    format!("{prefix}{base}")
}

/// The four user-defined chain names under `prefix`, in registration order
#[must_use]
pub fn user_chain_names(prefix: &str) -> [String; 4] {
    [
        full_name(prefix, INBOUND_CHAIN),
        full_name(prefix, OUTBOUND_CHAIN),
        full_name(prefix, INBOUND_REDIRECT_CHAIN),
        full_name(prefix, OUTBOUND_REDIRECT_CHAIN),
    ]
}

/// Compile the complete `*nat` table for one address family
///
/// Nameservers of the other family are ignored, so the caller can pass the
/// full discovery result to both passes.
#[must_use]
pub fn build_nat_table(
    cfg: &Config,
    dns_servers: &[IpAddr],
    loopback: &str,
    family: AddressFamily,
) -> NatTable {
    let prefix = &cfg.redirect.name_prefix;
    let dns_servers: Vec<IpAddr> = dns_servers
        .iter()
        .copied()
        .filter(|&ip| family.includes(ip))
        .collect();

    let mut nat = NatTable::new();

    nat.prerouting_mut().append(Rule::new(
        [Predicate::tcp()],
        Target::UserChain(full_name(prefix, INBOUND_CHAIN)),
    ));

    add_output_rules(cfg, &dns_servers, &mut nat);

    let mesh_inbound = build_mesh_inbound(&cfg.redirect.inbound, prefix);
    let mesh_outbound = build_mesh_outbound(cfg, &dns_servers, loopback, family);
    let mesh_inbound_redirect = build_mesh_redirect(
        &cfg.redirect.inbound,
        full_name(prefix, INBOUND_REDIRECT_CHAIN),
        family,
    );
    let mesh_outbound_redirect = build_mesh_redirect(
        &cfg.redirect.outbound,
        full_name(prefix, OUTBOUND_REDIRECT_CHAIN),
        family,
    );

    nat.with_chain(mesh_inbound)
        .with_chain(mesh_outbound)
        .with_chain(mesh_inbound_redirect)
        .with_chain(mesh_outbound_redirect)
}

fn build_mesh_inbound(flow: &TrafficFlowConfig, prefix: &str) -> Chain {
    let mut chain = Chain::new(full_name(prefix, INBOUND_CHAIN));
    let redirect = full_name(prefix, INBOUND_REDIRECT_CHAIN);

    if !flow.enabled {
        chain.append(Rule::new([Predicate::tcp()], Target::Return));
        return chain;
    }

    for &port in &flow.include_ports {
        chain.append(Rule::new(
            [Predicate::tcp_dst_port(port)],
            Target::UserChain(redirect.clone()),
        ));
    }

    // An allow-list supersedes the exclude handling: ports outside it are
    // simply never intercepted.
    if flow.include_ports.is_empty() {
        for &port in &flow.exclude_ports {
            chain.append(Rule::new([Predicate::tcp_dst_port(port)], Target::Return));
        }
        chain.append(Rule::new([Predicate::tcp()], Target::UserChain(redirect)));
    }

    chain
}

fn build_mesh_outbound(
    cfg: &Config,
    dns_servers: &[IpAddr],
    loopback: &str,
    family: AddressFamily,
) -> Chain {
    let prefix = &cfg.redirect.name_prefix;
    let outbound = &cfg.redirect.outbound;
    let inbound_redirect = full_name(prefix, INBOUND_REDIRECT_CHAIN);
    let outbound_redirect = full_name(prefix, OUTBOUND_REDIRECT_CHAIN);
    let uid = cfg.owner.uid.as_str();
    let redirect_dns = cfg.should_redirect_dns();
    let dns_redirect_port = cfg.redirect.dns.port;
    let localhost = family.localhost();
    let passthrough = family.inbound_passthrough_source();

    let mut chain = Chain::new(full_name(prefix, OUTBOUND_CHAIN));

    if !outbound.enabled {
        chain.append(Rule::new([Predicate::tcp()], Target::Return));
        return chain;
    }

    let has_include_ports = !outbound.include_ports.is_empty();

    if !has_include_ports {
        for &port in &outbound.exclude_ports {
            chain.append(Rule::new([Predicate::tcp_dst_port(port)], Target::Return));
        }
    }

    // Inbound passthrough hairpin. A connection intercepted on PREROUTING
    // is handed to the sidecar's inbound listener, which then dials the
    // local application over loopback using the reserved marker source
    // address. That second leg must not be captured again:
    //
    //   tcp packet to 192.168.0.10:7777
    //     PREROUTING -> MESH_INBOUND -> MESH_INBOUND_REDIRECT
    //   sidecar inbound listener
    //     dials 192.168.0.10:7777 via lo, source 127.0.0.6 (::6 on v6)
    //   this rule returns before the redirect chains see it
    chain
        .append(Rule::new(
            [
                Predicate::source(passthrough),
                Predicate::out_interface(loopback),
            ],
            Target::Return,
        ))
        // Sidecar-originated loopback traffic that targets the pod IP
        // rather than localhost is steered into the inbound path, so
        // intra-pod calls still traverse the inbound listener. Port 53 is
        // carved out when DNS interception owns it.
        .append(Rule::new(
            [
                Predicate::tcp_with(PortQualifier::not_destination_port_if(
                    redirect_dns,
                    DNS_PORT,
                )),
                Predicate::out_interface(loopback),
                Predicate::not_destination(localhost),
                Predicate::owner_uid(uid),
            ],
            Target::UserChain(inbound_redirect),
        ))
        .append(Rule::new(
            [
                Predicate::tcp_with(PortQualifier::not_destination_port_if(
                    redirect_dns,
                    DNS_PORT,
                )),
                Predicate::out_interface(loopback),
                Predicate::owner_not_uid(uid),
            ],
            Target::Return,
        ))
        // The sidecar's own outbound traffic is never re-captured.
        .append(Rule::new([Predicate::owner_uid(uid)], Target::Return));

    if redirect_dns {
        if cfg.should_capture_all_dns() {
            chain.append(Rule::new(
                [Predicate::tcp_dst_port(DNS_PORT)],
                Target::RedirectTo(dns_redirect_port),
            ));
        } else {
            for &ip in dns_servers {
                chain.append(Rule::new(
                    [Predicate::destination(ip), Predicate::tcp_dst_port(DNS_PORT)],
                    Target::RedirectTo(dns_redirect_port),
                ));
            }
        }
    }

    chain.append(Rule::new(
        [Predicate::destination(localhost)],
        Target::Return,
    ));

    if has_include_ports {
        for &port in &outbound.include_ports {
            chain.append(Rule::new(
                [Predicate::tcp_dst_port(port)],
                Target::UserChain(outbound_redirect.clone()),
            ));
        }
    } else {
        chain.append(Rule::jump(Target::UserChain(outbound_redirect)));
    }

    chain
}

fn build_mesh_redirect(flow: &TrafficFlowConfig, name: String, family: AddressFamily) -> Chain {
    let redirect_port = if family.is_ipv6() && flow.port_ipv6 != 0 {
        flow.port_ipv6
    } else {
        flow.port
    };

    let mut chain = Chain::new(name);
    chain.append(Rule::new(
        [Predicate::tcp()],
        Target::RedirectTo(redirect_port),
    ));
    chain
}

fn add_output_rules(cfg: &Config, dns_servers: &[IpAddr], nat: &mut NatTable) {
    let uid = cfg.owner.uid.as_str();
    let dns_redirect_port = cfg.redirect.dns.port;

    // Sidecar-originated DNS must bypass interception or every upstream
    // lookup would loop back into the sidecar's own resolver.
    nat.output_mut().append_if(
        cfg.should_redirect_dns(),
        Rule::new(
            [Predicate::udp_dst_port(DNS_PORT), Predicate::owner_uid(uid)],
            Target::Return,
        ),
    );

    if cfg.should_redirect_dns() {
        if cfg.should_capture_all_dns() {
            nat.output_mut().append(Rule::new(
                [Predicate::udp_dst_port(DNS_PORT)],
                Target::RedirectTo(dns_redirect_port),
            ));
        } else {
            for &ip in dns_servers {
                nat.output_mut().append(Rule::new(
                    [Predicate::destination(ip), Predicate::udp_dst_port(DNS_PORT)],
                    Target::RedirectTo(dns_redirect_port),
                ));
            }
        }
    }

    nat.output_mut().append(Rule::new(
        [Predicate::tcp()],
        Target::UserChain(full_name(&cfg.redirect.name_prefix, OUTBOUND_CHAIN)),
    ));
}

/// Compile the `*raw` table carrying the DNS conntrack zone-split rules
///
/// Empty unless DNS redirection and zone splitting are both enabled.
/// Whether the conntrack extension is actually loadable is the caller's
/// concern; this function only encodes the policy.
#[must_use]
pub fn build_raw_table(cfg: &Config, dns_servers: &[IpAddr], family: AddressFamily) -> RawTable {
    let mut raw = RawTable::new();

    if !cfg.should_conntrack_zone_split() {
        return raw;
    }

    let uid = cfg.owner.uid.as_str();
    let dns_redirect_port = cfg.redirect.dns.port;

    // Requests from the sidecar resolver and replies back to it live in
    // separate conntrack zones, so a UDP reply racing a new request cannot
    // be NATed against the wrong flow.
    raw.output_mut()
        .append(Rule::new(
            [Predicate::udp_dst_port(DNS_PORT), Predicate::owner_uid(uid)],
            Target::ConntrackZone(1),
        ))
        .append(Rule::new(
            [
                Predicate::udp_src_port(dns_redirect_port),
                Predicate::owner_uid(uid),
            ],
            Target::ConntrackZone(2),
        ));

    if cfg.should_capture_all_dns() {
        raw.output_mut().append(Rule::new(
            [Predicate::udp_dst_port(DNS_PORT)],
            Target::ConntrackZone(2),
        ));
        raw.prerouting_mut().append(Rule::new(
            [Predicate::udp_src_port(DNS_PORT)],
            Target::ConntrackZone(1),
        ));
    } else {
        for ip in dns_servers.iter().copied().filter(|&ip| family.includes(ip)) {
            raw.output_mut().append(Rule::new(
                [Predicate::destination(ip), Predicate::udp_dst_port(DNS_PORT)],
                Target::ConntrackZone(2),
            ));
            raw.prerouting_mut().append(Rule::new(
                [Predicate::source(ip), Predicate::udp_src_port(DNS_PORT)],
                Target::ConntrackZone(1),
            ));
        }
    }

    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::merge_with_defaults;

    fn enabled_config() -> Config {
        let mut cfg = Config::default();
        cfg.redirect.inbound.enabled = true;
        cfg.redirect.outbound.enabled = true;
        merge_with_defaults(cfg)
    }

    #[test]
    fn test_disabled_inbound_short_circuits() {
        let mut cfg = enabled_config();
        cfg.redirect.inbound.enabled = false;

        let chain = build_mesh_inbound(&cfg.redirect.inbound, "");
        assert_eq!(chain.render_rules(), vec!["-A MESH_INBOUND -p tcp -j RETURN"]);
    }

    #[test]
    fn test_inbound_exclude_ports_precede_catch_all() {
        let mut cfg = enabled_config();
        cfg.redirect.inbound.exclude_ports = vec![22, 443];

        let chain = build_mesh_inbound(&cfg.redirect.inbound, "");
        assert_eq!(
            chain.render_rules(),
            vec![
                "-A MESH_INBOUND -p tcp --dport 22 -j RETURN",
                "-A MESH_INBOUND -p tcp --dport 443 -j RETURN",
                "-A MESH_INBOUND -p tcp -j MESH_INBOUND_REDIRECT",
            ]
        );
    }

    #[test]
    fn test_redirect_chain_ipv6_port_override() {
        let cfg = enabled_config();

        let v4 = build_mesh_redirect(
            &cfg.redirect.inbound,
            "MESH_INBOUND_REDIRECT".into(),
            AddressFamily::Ipv4,
        );
        assert_eq!(
            v4.render_rules(),
            vec!["-A MESH_INBOUND_REDIRECT -p tcp -j REDIRECT --to-ports 15006"]
        );

        let v6 = build_mesh_redirect(
            &cfg.redirect.inbound,
            "MESH_INBOUND_REDIRECT".into(),
            AddressFamily::Ipv6,
        );
        assert_eq!(
            v6.render_rules(),
            vec!["-A MESH_INBOUND_REDIRECT -p tcp -j REDIRECT --to-ports 15010"]
        );
    }

    #[test]
    fn test_redirect_chain_ipv6_falls_back_without_override() {
        let cfg = enabled_config();

        // The outbound defaults carry no IPv6 port, so both passes share one.
        let v6 = build_mesh_redirect(
            &cfg.redirect.outbound,
            "MESH_OUTBOUND_REDIRECT".into(),
            AddressFamily::Ipv6,
        );
        assert_eq!(
            v6.render_rules(),
            vec!["-A MESH_OUTBOUND_REDIRECT -p tcp -j REDIRECT --to-ports 15001"]
        );
    }

    #[test]
    fn test_nat_table_filters_nameservers_by_family() {
        let mut cfg = enabled_config();
        cfg.redirect.dns.enabled = true;
        cfg.redirect.dns.capture_all = false;

        let servers: Vec<IpAddr> = vec![
            "8.8.8.8".parse().unwrap(),
            "2001:4860:4860::8888".parse().unwrap(),
        ];

        let nat = build_nat_table(&cfg, &servers, "lo", AddressFamily::Ipv4);
        let doc = nat.render().unwrap();
        assert!(doc.contains("-d 8.8.8.8"));
        assert!(!doc.contains("2001:4860:4860::8888"));

        let nat = build_nat_table(&cfg, &servers, "lo", AddressFamily::Ipv6);
        let doc = nat.render().unwrap();
        assert!(doc.contains("-d 2001:4860:4860::8888"));
        assert!(!doc.contains("8.8.8.8"));
    }

    #[test]
    fn test_raw_table_empty_without_zone_split() {
        let mut cfg = enabled_config();
        cfg.redirect.dns.enabled = true;
        cfg.redirect.dns.conntrack_zone_split = false;

        let raw = build_raw_table(&cfg, &[], AddressFamily::Ipv4);
        assert!(raw.is_empty());
    }

    #[test]
    fn test_raw_table_capture_all_zones() {
        let mut cfg = enabled_config();
        cfg.redirect.dns.enabled = true;
        cfg.redirect.dns.capture_all = true;
        cfg.redirect.dns.conntrack_zone_split = true;

        let raw = build_raw_table(&cfg, &[], AddressFamily::Ipv4);
        assert_eq!(
            raw.output().render_rules(),
            vec![
                "-A OUTPUT -p udp --dport 53 -m owner --uid-owner 5678 -j CT --zone 1",
                "-A OUTPUT -p udp --sport 15053 -m owner --uid-owner 5678 -j CT --zone 2",
                "-A OUTPUT -p udp --dport 53 -j CT --zone 2",
            ]
        );
        assert_eq!(
            raw.prerouting().render_rules(),
            vec!["-A PREROUTING -p udp --sport 53 -j CT --zone 1"]
        );
    }
}
