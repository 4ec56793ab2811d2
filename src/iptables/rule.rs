//! A single NAT rule: match predicates plus one jump target

use std::fmt::Write as _;

use super::parameters::{Predicate, Target};

/// One rule line of a chain
///
/// Predicates render in attachment order. No compatibility validation is
/// attempted here; the kernel is the source of truth for what combinations
/// are meaningful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    predicates: Vec<Predicate>,
    target: Target,
}

impl Rule {
    pub fn new(predicates: impl IntoIterator<Item = Predicate>, target: Target) -> Self {
        Self {
            predicates: predicates.into_iter().collect(),
            target,
        }
    }

    /// A rule with no match predicates, matching everything
    #[must_use]
    pub const fn jump(target: Target) -> Self {
        Self {
            predicates: Vec::new(),
            target,
        }
    }

    #[must_use]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// Render as an `iptables-restore` append line for `chain`
    #[must_use]
    pub fn render(&self, chain: &str) -> String {
        let mut line = format!("-A {chain}");
        for predicate in &self.predicates {
            let _ = write!(line, " {predicate}");
        }
        let _ = write!(line, " -j {}", self.target);
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_jump_only() {
        let rule = Rule::jump(Target::UserChain("MESH_OUTBOUND_REDIRECT".into()));
        assert_eq!(rule.render("MESH_OUTBOUND"), "-A MESH_OUTBOUND -j MESH_OUTBOUND_REDIRECT");
    }

    #[test]
    fn test_render_predicate_order() {
        let rule = Rule::new(
            [
                Predicate::tcp_dst_port(53),
                Predicate::out_interface("lo"),
                Predicate::owner_uid("1337"),
            ],
            Target::Return,
        );
        assert_eq!(
            rule.render("OUTPUT"),
            "-A OUTPUT -p tcp --dport 53 -o lo -m owner --uid-owner 1337 -j RETURN"
        );
    }
}
