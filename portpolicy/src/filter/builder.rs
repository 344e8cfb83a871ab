//! Filter construction from one rule, one direction and one port

use super::{L4Filter, PerSelectorPolicy};
use crate::error::{PolicyError, Result};
use crate::port::{Direction, PortProtocol};
use crate::rule::PortRule;
use crate::secret::SecretResolver;
use crate::selector::{PeerSelector, SelectorCache};
use std::collections::HashMap;
use tracing::debug;

/// Collaborators the builder reads from
#[derive(Clone, Copy)]
pub struct PolicyContext<'a> {
    pub selectors: &'a SelectorCache,
    pub secrets: &'a dyn SecretResolver,
}

impl<'a> PolicyContext<'a> {
    pub fn new(selectors: &'a SelectorCache, secrets: &'a dyn SecretResolver) -> Self {
        Self { selectors, secrets }
    }
}

/// Everything one filter is built from
#[derive(Debug, Clone, Copy)]
pub struct FilterInput<'a> {
    pub direction: Direction,
    pub peers: &'a [PeerSelector],
    pub port_rule: &'a PortRule,
    pub tuple: PortProtocol,
    pub origin: &'a [String],
    pub deny: bool,
}

impl<'a> FilterInput<'a> {
    pub fn new(
        direction: Direction,
        peers: &'a [PeerSelector],
        port_rule: &'a PortRule,
        tuple: PortProtocol,
    ) -> Self {
        Self {
            direction,
            peers,
            port_rule,
            tuple,
            origin: &[],
            deny: false,
        }
    }

    pub fn ingress(peers: &'a [PeerSelector], port_rule: &'a PortRule, tuple: PortProtocol) -> Self {
        Self::new(Direction::Ingress, peers, port_rule, tuple)
    }

    pub fn egress(peers: &'a [PeerSelector], port_rule: &'a PortRule, tuple: PortProtocol) -> Self {
        Self::new(Direction::Egress, peers, port_rule, tuple)
    }

    pub fn with_origin(mut self, origin: &'a [String]) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_deny(mut self, deny: bool) -> Self {
        self.deny = deny;
        self
    }
}

/// Build the filter for one port tuple of a port rule
///
/// All-or-nothing: TLS references are checked before any selector is
/// interned, and an error leaves no trace.
pub fn build_filter(ctx: &PolicyContext<'_>, input: FilterInput<'_>) -> Result<L4Filter> {
    if input.peers.is_empty() {
        return Err(PolicyError::InvalidSelectorSet {
            key: input.tuple,
            direction: input.direction,
        });
    }

    let port_rule = input.port_rule;
    if input.deny && (!port_rule.rules.is_none() || port_rule.has_tls()) {
        return Err(PolicyError::MalformedContentRules(format!(
            "deny rule on {} carries L7 rules or TLS",
            input.tuple
        )));
    }

    let terminating_tls = port_rule.terminating_context();
    let originating_tls = port_rule.originating_context();
    for tls in terminating_tls.iter().chain(originating_tls.iter()) {
        ctx.secrets
            .resolve(&tls.secret)
            .map_err(|source| PolicyError::UnresolvedSecret {
                secret: tls.secret.clone(),
                source,
            })?;
    }

    let template = if input.deny {
        PerSelectorPolicy::deny()
    } else {
        PerSelectorPolicy {
            l7_rules: port_rule.rules.clone(),
            terminating_tls,
            originating_tls,
            is_deny: false,
        }
    };
    let l7_parser = template.parser();

    let mut rules_per_selector = HashMap::with_capacity(input.peers.len());
    for peer in input.peers {
        let selector = ctx.selectors.add_selector(peer);
        rules_per_selector.insert(selector, template.clone());
    }

    debug!(
        key = %input.tuple,
        direction = %input.direction,
        parser = %l7_parser,
        selectors = rules_per_selector.len(),
        deny = input.deny,
        "Built filter"
    );

    Ok(L4Filter::new(
        input.tuple,
        input.direction,
        l7_parser,
        rules_per_selector,
        input.origin.to_vec(),
    ))
}
