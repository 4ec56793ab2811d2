//! NAT and raw table containers with `iptables-restore` serialization
//!
//! A table owns its built-in chains plus, for NAT, the user-defined chains
//! in registration order. Serialization emits the table header, one
//! declaration per chain, the rule lines in construction order, and a
//! trailing `COMMIT`.
//!
//! Rendering validates that every jump into a user-defined chain resolves
//! to a chain registered on the table. A dangling reference is a
//! programmer error and fails loudly instead of producing a document the
//! kernel would reject.

use std::collections::HashSet;
use std::fmt::Write as _;

use super::chain::Chain;
use super::parameters::Target;
use crate::error::TableError;

pub const PREROUTING: &str = "PREROUTING";
pub const OUTPUT: &str = "OUTPUT";

/// The `*nat` table: PREROUTING, OUTPUT, and the user-defined chains
#[derive(Debug, Clone)]
pub struct NatTable {
    prerouting: Chain,
    output: Chain,
    user_chains: Vec<Chain>,
}

impl NatTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            prerouting: Chain::new(PREROUTING),
            output: Chain::new(OUTPUT),
            user_chains: Vec::new(),
        }
    }

    pub fn prerouting_mut(&mut self) -> &mut Chain {
        &mut self.prerouting
    }

    pub fn output_mut(&mut self) -> &mut Chain {
        &mut self.output
    }

    #[must_use]
    pub const fn prerouting(&self) -> &Chain {
        &self.prerouting
    }

    #[must_use]
    pub const fn output(&self) -> &Chain {
        &self.output
    }

    /// Register a user-defined chain; registration order is emission order
    #[must_use]
    pub fn with_chain(mut self, chain: Chain) -> Self {
        self.user_chains.push(chain);
        self
    }

    #[must_use]
    pub fn user_chains(&self) -> &[Chain] {
        &self.user_chains
    }

    /// Look up a registered user chain by its full (prefixed) name
    #[must_use]
    pub fn user_chain(&self, name: &str) -> Option<&Chain> {
        self.user_chains.iter().find(|c| c.name() == name)
    }

    /// Serialize to `iptables-restore` text
    ///
    /// # Errors
    ///
    /// Returns [`TableError::ChainReferenceUnresolved`] when a rule jumps to
    /// a user chain that was never registered.
    pub fn render(&self) -> Result<String, TableError> {
        let builtins = [&self.prerouting, &self.output];
        render_table("*nat", &builtins, &self.user_chains)
    }
}

impl Default for NatTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The `*raw` table: PREROUTING and OUTPUT only
///
/// Carries the DNS conntrack zone-split rules. Empty unless zone splitting
/// is enabled.
#[derive(Debug, Clone)]
pub struct RawTable {
    prerouting: Chain,
    output: Chain,
}

impl RawTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            prerouting: Chain::new(PREROUTING),
            output: Chain::new(OUTPUT),
        }
    }

    pub fn prerouting_mut(&mut self) -> &mut Chain {
        &mut self.prerouting
    }

    pub fn output_mut(&mut self) -> &mut Chain {
        &mut self.output
    }

    #[must_use]
    pub const fn prerouting(&self) -> &Chain {
        &self.prerouting
    }

    #[must_use]
    pub const fn output(&self) -> &Chain {
        &self.output
    }

    /// Whether any rule was emitted at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prerouting.is_empty() && self.output.is_empty()
    }

    /// Serialize to `iptables-restore` text
    ///
    /// # Errors
    ///
    /// Returns [`TableError::ChainReferenceUnresolved`] when a rule jumps to
    /// an unregistered user chain. The raw table registers none, so any
    /// user-chain jump fails here.
    pub fn render(&self) -> Result<String, TableError> {
        let builtins = [&self.prerouting, &self.output];
        render_table("*raw", &builtins, &[])
    }
}

impl Default for RawTable {
    fn default() -> Self {
        Self::new()
    }
}

fn render_table(
    header: &str,
    builtins: &[&Chain],
    user_chains: &[Chain],
) -> Result<String, TableError> {
    let declared: HashSet<&str> = builtins
        .iter()
        .map(|c| c.name())
        .chain(user_chains.iter().map(Chain::name))
        .collect();

    for chain in builtins.iter().copied().chain(user_chains.iter()) {
        for rule in chain.rules() {
            if let Target::UserChain(name) = rule.target() {
                if !declared.contains(name.as_str()) {
                    return Err(TableError::ChainReferenceUnresolved(name.clone()));
                }
            }
        }
    }

    let mut out = String::new();
    let _ = writeln!(out, "{header}");
    for chain in builtins {
        let _ = writeln!(out, ":{} ACCEPT [0:0]", chain.name());
    }
    for chain in user_chains {
        let _ = writeln!(out, ":{} - [0:0]", chain.name());
    }
    for chain in builtins.iter().copied().chain(user_chains.iter()) {
        for line in chain.render_rules() {
            let _ = writeln!(out, "{line}");
        }
    }
    let _ = writeln!(out, "COMMIT");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iptables::parameters::{Predicate, Target};
    use crate::iptables::rule::Rule;

    #[test]
    fn test_render_declares_all_chains() {
        let mut redirect = Chain::new("MESH_INBOUND_REDIRECT");
        redirect.append(Rule::new([Predicate::tcp()], Target::RedirectTo(15006)));

        let mut nat = NatTable::new();
        nat.prerouting_mut().append(Rule::new(
            [Predicate::tcp()],
            Target::UserChain("MESH_INBOUND_REDIRECT".into()),
        ));
        let nat = nat.with_chain(redirect);

        let doc = nat.render().unwrap();
        let lines: Vec<&str> = doc.lines().collect();

        assert_eq!(lines[0], "*nat");
        assert_eq!(lines[1], ":PREROUTING ACCEPT [0:0]");
        assert_eq!(lines[2], ":OUTPUT ACCEPT [0:0]");
        assert_eq!(lines[3], ":MESH_INBOUND_REDIRECT - [0:0]");
        assert_eq!(lines[4], "-A PREROUTING -p tcp -j MESH_INBOUND_REDIRECT");
        assert_eq!(lines[5], "-A MESH_INBOUND_REDIRECT -p tcp -j REDIRECT --to-ports 15006");
        assert_eq!(lines.last(), Some(&"COMMIT"));
    }

    #[test]
    fn test_render_rejects_unresolved_chain_reference() {
        let mut nat = NatTable::new();
        nat.output_mut()
            .append(Rule::jump(Target::UserChain("MISSING".into())));

        let err = nat.render().unwrap_err();
        assert!(matches!(
            err,
            TableError::ChainReferenceUnresolved(name) if name == "MISSING"
        ));
    }

    #[test]
    fn test_empty_raw_table() {
        let raw = RawTable::new();
        assert!(raw.is_empty());

        let doc = raw.render().unwrap();
        assert_eq!(
            doc.lines().collect::<Vec<_>>(),
            vec!["*raw", ":PREROUTING ACCEPT [0:0]", ":OUTPUT ACCEPT [0:0]", "COMMIT"]
        );
    }
}
