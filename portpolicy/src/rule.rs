//! Source policy rules, as handed to the resolver

use crate::l7::{L7Rules, TlsContext};
use crate::port::{Direction, PortProtocol};
use crate::secret::SecretRef;
use crate::selector::{EndpointSelector, LabelSet, PeerSelector};

/// Ports plus the content rules and TLS material that apply on them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortRule {
    pub ports: Vec<PortProtocol>,
    pub rules: L7Rules,
    pub terminating_tls: Option<SecretRef>,
    pub originating_tls: Option<SecretRef>,
}

impl PortRule {
    pub fn new(ports: Vec<PortProtocol>) -> Self {
        Self {
            ports,
            ..Default::default()
        }
    }

    pub fn with_rules(mut self, rules: L7Rules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_terminating_tls(mut self, secret: SecretRef) -> Self {
        self.terminating_tls = Some(secret);
        self
    }

    pub fn with_originating_tls(mut self, secret: SecretRef) -> Self {
        self.originating_tls = Some(secret);
        self
    }

    pub fn terminating_context(&self) -> Option<TlsContext> {
        self.terminating_tls.clone().map(TlsContext::terminating)
    }

    pub fn originating_context(&self) -> Option<TlsContext> {
        self.originating_tls.clone().map(TlsContext::originating)
    }

    pub fn has_tls(&self) -> bool {
        self.terminating_tls.is_some() || self.originating_tls.is_some()
    }

    /// Ports this rule covers; an empty list covers everything
    pub fn effective_ports(&self) -> Vec<PortProtocol> {
        if self.ports.is_empty() {
            vec![PortProtocol::WILDCARD]
        } else {
            self.ports.clone()
        }
    }
}

/// One ingress or egress section of a rule
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerRule {
    pub peers: Vec<PeerSelector>,
    pub deny: bool,
    pub to_ports: Vec<PortRule>,
}

impl PeerRule {
    pub fn allow(peers: Vec<PeerSelector>, to_ports: Vec<PortRule>) -> Self {
        Self {
            peers,
            deny: false,
            to_ports,
        }
    }

    pub fn deny(peers: Vec<PeerSelector>, to_ports: Vec<PortRule>) -> Self {
        Self {
            peers,
            deny: true,
            to_ports,
        }
    }

    /// Port rules to build filters from; none listed means an L4 allow on every port
    pub fn effective_port_rules(&self) -> Vec<PortRule> {
        if self.to_ports.is_empty() {
            vec![PortRule::default()]
        } else {
            self.to_ports.clone()
        }
    }
}

/// A source policy rule
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rule {
    /// Identities this rule applies to
    pub endpoint_selector: EndpointSelector,
    pub ingress: Vec<PeerRule>,
    pub egress: Vec<PeerRule>,
    /// Provenance labels, reported as `derived-from-rules`
    pub labels: Vec<String>,
    pub description: String,
}

impl Rule {
    pub fn selects(&self, identity: &LabelSet) -> bool {
        self.endpoint_selector.matches(identity)
    }

    pub fn peer_rules(&self, direction: Direction) -> &[PeerRule] {
        match direction {
            Direction::Ingress => &self.ingress,
            Direction::Egress => &self.egress,
        }
    }

    /// Sorted provenance labels
    pub fn origin(&self) -> Vec<String> {
        let mut origin = self.labels.clone();
        origin.sort();
        origin.dedup();
        origin
    }
}
