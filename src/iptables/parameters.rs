//! Match predicates and jump targets for NAT rules
//!
//! Rules are assembled from a list of [`Predicate`] values and exactly one
//! [`Target`]. Predicates render in the order they were attached, which keeps
//! the serialized form stable across runs.
//!
//! Address-family dependent constants (localhost, the inbound passthrough
//! source address, the restore program names) are looked up through
//! [`AddressFamily`] instead of branching on a boolean at every use site.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{IpNet, Ipv4Net, Ipv6Net};

/// Well-known DNS port matched by the interception rules.
pub const DNS_PORT: u16 = 53;

const LOCALHOST_V4: Ipv4Net = Ipv4Net::new_assert(Ipv4Addr::new(127, 0, 0, 1), 32);
const LOCALHOST_V6: Ipv6Net = Ipv6Net::new_assert(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 1), 128);
const PASSTHROUGH_V4: Ipv4Net = Ipv4Net::new_assert(Ipv4Addr::new(127, 0, 0, 6), 32);
const PASSTHROUGH_V6: Ipv6Net = Ipv6Net::new_assert(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 6), 128);

/// Address family a compile pass targets
///
/// Dual-stack hosts get two independent documents, one per family; the
/// family value selects the loopback constants and the restore program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Localhost CIDR for this family (`127.0.0.1/32` or `::1/128`)
    #[must_use]
    pub const fn localhost(self) -> IpNet {
        match self {
            Self::Ipv4 => IpNet::V4(LOCALHOST_V4),
            Self::Ipv6 => IpNet::V6(LOCALHOST_V6),
        }
    }

    /// Source address the sidecar stamps on inbound passthrough connections
    /// (`127.0.0.6/32` or `::6/128`)
    #[must_use]
    pub const fn inbound_passthrough_source(self) -> IpNet {
        match self {
            Self::Ipv4 => IpNet::V4(PASSTHROUGH_V4),
            Self::Ipv6 => IpNet::V6(PASSTHROUGH_V6),
        }
    }

    /// Whether `ip` belongs to this family
    #[must_use]
    pub const fn includes(self, ip: IpAddr) -> bool {
        matches!(
            (self, ip),
            (Self::Ipv4, IpAddr::V4(_)) | (Self::Ipv6, IpAddr::V6(_))
        )
    }

    /// Program that applies a serialized document for this family
    #[must_use]
    pub const fn restore_program(self) -> &'static str {
        match self {
            Self::Ipv4 => "iptables-restore",
            Self::Ipv6 => "ip6tables-restore",
        }
    }

    /// Front-end program for this family, used by capability probes
    #[must_use]
    pub const fn iptables_program(self) -> &'static str {
        match self {
            Self::Ipv4 => "iptables",
            Self::Ipv6 => "ip6tables",
        }
    }

    #[must_use]
    pub const fn is_ipv6(self) -> bool {
        matches!(self, Self::Ipv6)
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4 => write!(f, "ipv4"),
            Self::Ipv6 => write!(f, "ipv6"),
        }
    }
}

/// Address operand of a source/destination match
///
/// Either a CIDR, rendered canonically (`127.0.0.1/32`), or a bare IP as it
/// came out of resolver discovery (`8.8.8.8`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address {
    Net(IpNet),
    Ip(IpAddr),
}

impl From<IpNet> for Address {
    fn from(net: IpNet) -> Self {
        Self::Net(net)
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        Self::Ip(ip)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Net(net) => write!(f, "{net}"),
            Self::Ip(ip) => write!(f, "{ip}"),
        }
    }
}

/// Destination-port qualifier on a TCP match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortQualifier {
    /// `--dport port`
    DestinationPort(u16),
    /// `! --dport port`
    NotDestinationPort(u16),
}

impl PortQualifier {
    /// `! --dport port` when `cond` holds, absent otherwise
    ///
    /// Collapsing the condition into the data keeps the rule construction
    /// sites free of control flow.
    #[must_use]
    pub fn not_destination_port_if(cond: bool, port: u16) -> Option<Self> {
        cond.then_some(Self::NotDestinationPort(port))
    }
}

/// L4 protocol match with optional port qualifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp { dst_port: Option<PortQualifier> },
    Udp { dst_port: Option<u16>, src_port: Option<u16> },
}

/// Socket-owner match (`-m owner`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    Uid(String),
    NotUid(String),
}

/// A single match predicate of a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Protocol(Protocol),
    Source(Address),
    Destination(Address),
    NotDestination(Address),
    OutInterface(String),
    Owner(Owner),
}

impl Predicate {
    /// `-p tcp`
    #[must_use]
    pub const fn tcp() -> Self {
        Self::Protocol(Protocol::Tcp { dst_port: None })
    }

    /// `-p tcp --dport port`
    #[must_use]
    pub const fn tcp_dst_port(port: u16) -> Self {
        Self::Protocol(Protocol::Tcp {
            dst_port: Some(PortQualifier::DestinationPort(port)),
        })
    }

    /// `-p tcp` with an optional port qualifier attached
    #[must_use]
    pub const fn tcp_with(dst_port: Option<PortQualifier>) -> Self {
        Self::Protocol(Protocol::Tcp { dst_port })
    }

    /// `-p udp --dport port`
    #[must_use]
    pub const fn udp_dst_port(port: u16) -> Self {
        Self::Protocol(Protocol::Udp {
            dst_port: Some(port),
            src_port: None,
        })
    }

    /// `-p udp --sport port`
    #[must_use]
    pub const fn udp_src_port(port: u16) -> Self {
        Self::Protocol(Protocol::Udp {
            dst_port: None,
            src_port: Some(port),
        })
    }

    /// `-s addr`
    pub fn source(addr: impl Into<Address>) -> Self {
        Self::Source(addr.into())
    }

    /// `-d addr`
    pub fn destination(addr: impl Into<Address>) -> Self {
        Self::Destination(addr.into())
    }

    /// `! -d addr`
    pub fn not_destination(addr: impl Into<Address>) -> Self {
        Self::NotDestination(addr.into())
    }

    /// `-o name`
    pub fn out_interface(name: impl Into<String>) -> Self {
        Self::OutInterface(name.into())
    }

    /// `-m owner --uid-owner uid`
    pub fn owner_uid(uid: impl Into<String>) -> Self {
        Self::Owner(Owner::Uid(uid.into()))
    }

    /// `-m owner ! --uid-owner uid`
    pub fn owner_not_uid(uid: impl Into<String>) -> Self {
        Self::Owner(Owner::NotUid(uid.into()))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(Protocol::Tcp { dst_port }) => {
                write!(f, "-p tcp")?;
                match dst_port {
                    Some(PortQualifier::DestinationPort(port)) => write!(f, " --dport {port}"),
                    Some(PortQualifier::NotDestinationPort(port)) => {
                        write!(f, " ! --dport {port}")
                    }
                    None => Ok(()),
                }
            }
            Self::Protocol(Protocol::Udp { dst_port, src_port }) => {
                write!(f, "-p udp")?;
                if let Some(port) = dst_port {
                    write!(f, " --dport {port}")?;
                }
                if let Some(port) = src_port {
                    write!(f, " --sport {port}")?;
                }
                Ok(())
            }
            Self::Source(addr) => write!(f, "-s {addr}"),
            Self::Destination(addr) => write!(f, "-d {addr}"),
            Self::NotDestination(addr) => write!(f, "! -d {addr}"),
            Self::OutInterface(name) => write!(f, "-o {name}"),
            Self::Owner(Owner::Uid(uid)) => write!(f, "-m owner --uid-owner {uid}"),
            Self::Owner(Owner::NotUid(uid)) => write!(f, "-m owner ! --uid-owner {uid}"),
        }
    }
}

/// Jump target of a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// `-j RETURN`
    Return,
    /// `-j REDIRECT --to-ports port`
    RedirectTo(u16),
    /// `-j name`, where `name` is an already-prefixed user chain
    UserChain(String),
    /// `-j CT --zone zone`, conntrack zone assignment in the raw table
    ConntrackZone(u16),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Return => write!(f, "RETURN"),
            Self::RedirectTo(port) => write!(f, "REDIRECT --to-ports {port}"),
            Self::UserChain(name) => write!(f, "{name}"),
            Self::ConntrackZone(zone) => write!(f, "CT --zone {zone}"),
        }
    }
}
