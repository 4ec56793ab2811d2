//! iptables rule model and policy compiler
//!
//! Layered leaves-first:
//!
//! - [`parameters`]: match predicates, jump targets, address-family constants
//! - [`rule`] and [`chain`]: one rule line, and named append-ordered chains
//! - [`table`]: NAT/raw containers and `iptables-restore` serialization
//! - [`builder`]: the policy compiler assembling the tables
//!
//! The whole module is pure data transformation; applying the serialized
//! documents to the kernel lives in [`crate::restore`].

pub mod builder;
pub mod chain;
pub mod parameters;
pub mod rule;
pub mod table;

pub use builder::{build_nat_table, build_raw_table};
pub use chain::Chain;
pub use parameters::{Address, AddressFamily, Owner, PortQualifier, Predicate, Protocol, Target};
pub use rule::Rule;
pub use table::{NatTable, RawTable};
