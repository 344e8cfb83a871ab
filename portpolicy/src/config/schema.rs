//! Configuration schema types
//!
//! A policy document is TOML: common settings, the TLS secrets rules may
//! reference, and the source rules themselves.

use crate::error::{Result, ValidationError};
use crate::l7::{HttpRule, L7Rules, NamedRule};
use crate::port::{parse_port, PortProtocol};
use crate::rule::{PeerRule, PortRule, Rule};
use crate::secret::{SecretMaterial, SecretRef, SecretStore};
use crate::selector::{EndpointSelector, Operator, PeerSelector, Requirement};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete policy document
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub common: CommonConfig,
    #[serde(default)]
    pub secrets: Vec<SecretConfig>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// Settings not tied to a rule
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommonConfig {
    #[serde(default = "default_config_version")]
    pub config_version: String,
    /// Debug logging, as if `-v` were given
    #[serde(default)]
    pub verbose: bool,
    /// Deadline for each proxy backend call
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
}

/// The only document version this crate reads
pub const CONFIG_VERSION: &str = "1.0";

fn default_config_version() -> String {
    CONFIG_VERSION.to_string()
}

fn default_publish_timeout_ms() -> u64 {
    5000
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            verbose: false,
            publish_timeout_ms: default_publish_timeout_ms(),
        }
    }
}

/// TLS secret material, inline
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SecretConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

impl SecretConfig {
    pub fn secret_ref(&self) -> Result<SecretRef> {
        if self.name.is_empty() || self.name.contains('/') {
            return Err(ValidationError::InvalidSecret {
                secret: self.name.clone(),
            }
            .into());
        }
        Ok(match &self.namespace {
            Some(ns) if !ns.is_empty() => SecretRef::namespaced(ns, &self.name),
            _ => SecretRef::new(&self.name),
        })
    }

    pub fn material(&self) -> SecretMaterial {
        SecretMaterial {
            certificate: self.certificate.clone(),
            private_key: self.private_key.clone(),
        }
    }
}

/// One source rule
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuleConfig {
    #[serde(default)]
    pub description: String,
    /// Provenance labels
    #[serde(default)]
    pub labels: Vec<String>,
    /// Identities the rule applies to; absent selects everything
    #[serde(default)]
    pub endpoint: SelectorConfig,
    #[serde(default)]
    pub ingress: Vec<PeerRuleConfig>,
    #[serde(default)]
    pub egress: Vec<PeerRuleConfig>,
}

/// Label selector
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SelectorConfig {
    #[serde(default)]
    pub match_labels: IndexMap<String, String>,
    #[serde(default)]
    pub match_expressions: Vec<RequirementConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequirementConfig {
    pub key: String,
    pub operator: Operator,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Ingress or egress section
///
/// `from_*` and `to_*` spellings are both accepted so the same table shape
/// reads naturally in either direction.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PeerRuleConfig {
    #[serde(default, alias = "from_endpoints", alias = "to_endpoints")]
    pub endpoints: Vec<SelectorConfig>,
    #[serde(default, alias = "from_cidrs", alias = "to_cidrs")]
    pub cidrs: Vec<String>,
    #[serde(default)]
    pub deny: bool,
    #[serde(default)]
    pub to_ports: Vec<PortRuleConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PortRuleConfig {
    #[serde(default)]
    pub ports: Vec<PortConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<L7RulesConfig>,
    /// `name` or `namespace/name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminating_tls: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originating_tls: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortConfig {
    /// Numeric port; empty or "0" means every port
    #[serde(default)]
    pub port: String,
    #[serde(default)]
    pub protocol: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct L7RulesConfig {
    #[serde(default)]
    pub http: Vec<HttpRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l7proto: Option<String>,
    #[serde(default)]
    pub l7: Vec<NamedRule>,
}

impl Config {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.common.publish_timeout_ms)
    }

    /// Secret store holding every declared secret
    pub fn secret_store(&self) -> Result<SecretStore> {
        let mut store = SecretStore::new();
        for secret in &self.secrets {
            store.insert(secret.secret_ref()?, secret.material());
        }
        Ok(store)
    }

    /// Convert every rule, in declaration order
    pub fn to_rules(&self) -> Result<Vec<Rule>> {
        self.rules.iter().map(RuleConfig::to_rule).collect()
    }
}

impl RuleConfig {
    /// Name used in validation errors
    pub fn display_name(&self, index: usize) -> String {
        if !self.description.is_empty() {
            self.description.clone()
        } else if !self.labels.is_empty() {
            self.labels.join(",")
        } else {
            format!("#{}", index)
        }
    }

    pub fn to_rule(&self) -> Result<Rule> {
        Ok(Rule {
            endpoint_selector: self.endpoint.to_selector()?,
            ingress: self
                .ingress
                .iter()
                .map(PeerRuleConfig::to_peer_rule)
                .collect::<Result<_>>()?,
            egress: self
                .egress
                .iter()
                .map(PeerRuleConfig::to_peer_rule)
                .collect::<Result<_>>()?,
            labels: self.labels.clone(),
            description: self.description.clone(),
        })
    }
}

impl SelectorConfig {
    pub fn to_selector(&self) -> Result<EndpointSelector> {
        let mut selector = EndpointSelector::wildcard();
        for (key, value) in &self.match_labels {
            selector = selector.with_match_label(key, value)?;
        }
        for expr in &self.match_expressions {
            let values: Vec<&str> = expr.values.iter().map(String::as_str).collect();
            selector = selector.with_requirement(Requirement::new(&expr.key, expr.operator, &values)?);
        }
        Ok(selector)
    }
}

impl PeerRuleConfig {
    /// Peers named by the section; an empty endpoint table is the wildcard
    pub fn peers(&self) -> Result<Vec<PeerSelector>> {
        let mut peers = Vec::with_capacity(self.endpoints.len() + self.cidrs.len());
        for endpoint in &self.endpoints {
            peers.push(endpoint.to_selector()?.into());
        }
        for cidr in &self.cidrs {
            peers.push(PeerSelector::cidr(cidr)?);
        }
        Ok(peers)
    }

    pub fn to_peer_rule(&self) -> Result<PeerRule> {
        Ok(PeerRule {
            peers: self.peers()?,
            deny: self.deny,
            to_ports: self
                .to_ports
                .iter()
                .map(PortRuleConfig::to_port_rule)
                .collect::<Result<_>>()?,
        })
    }
}

impl PortRuleConfig {
    pub fn to_port_rule(&self) -> Result<PortRule> {
        let ports = self
            .ports
            .iter()
            .map(PortConfig::to_key)
            .collect::<Result<Vec<_>>>()?;

        let rules = match &self.rules {
            Some(rules) => L7Rules::from_parts(rules.http.clone(), rules.l7proto.clone(), rules.l7.clone())?,
            None => L7Rules::None,
        };

        Ok(PortRule {
            ports,
            rules,
            terminating_tls: parse_secret(self.terminating_tls.as_deref())?,
            originating_tls: parse_secret(self.originating_tls.as_deref())?,
        })
    }

    /// Secrets this port rule references
    pub fn secret_refs(&self) -> Result<Vec<SecretRef>> {
        Ok([
            parse_secret(self.terminating_tls.as_deref())?,
            parse_secret(self.originating_tls.as_deref())?,
        ]
        .into_iter()
        .flatten()
        .collect())
    }
}

impl PortConfig {
    pub fn to_key(&self) -> Result<PortProtocol> {
        Ok(PortProtocol::new(parse_port(&self.port)?, self.protocol.parse()?))
    }
}

fn parse_secret(secret: Option<&str>) -> Result<Option<SecretRef>> {
    Ok(secret.map(str::parse::<SecretRef>).transpose()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::Protocol;
    use crate::selector::LabelSet;

    const DOC: &str = r#"
[common]
publish_timeout_ms = 250

[[secrets]]
name = "web-tls"
namespace = "prod"
certificate = "cert"
private_key = "key"

[[rules]]
description = "web ingress"
labels = ["k8s:policy=web"]

[rules.endpoint.match_labels]
"k8s:app" = "web"

[[rules.ingress]]
from_endpoints = [{ match_labels = { "k8s:app" = "frontend" } }]

[[rules.ingress.to_ports]]
ports = [{ port = "443", protocol = "TCP" }]
terminating_tls = "prod/web-tls"

[rules.ingress.to_ports.rules]
http = [{ path = "/api", method = "GET" }]

[[rules.egress]]
to_cidrs = ["10.0.0.0/8"]
to_ports = [{ ports = [{ port = "53", protocol = "udp" }] }]
"#;

    #[test]
    fn test_parse_and_convert() {
        let config: Config = toml::from_str(DOC).unwrap();
        assert_eq!(config.publish_timeout(), Duration::from_millis(250));
        assert_eq!(config.common.config_version, "1.0");

        let rules = config.to_rules().unwrap();
        assert_eq!(rules.len(), 1);
        let rule = &rules[0];
        assert!(rule.selects(&LabelSet::parse(["k8s:app=web"]).unwrap()));
        assert!(!rule.selects(&LabelSet::parse(["k8s:app=db"]).unwrap()));

        let port_rule = &rule.ingress[0].to_ports[0];
        assert_eq!(port_rule.ports, vec![PortProtocol::tcp(443)]);
        assert_eq!(port_rule.terminating_tls, Some(SecretRef::namespaced("prod", "web-tls")));
        assert_eq!(port_rule.rules, L7Rules::http(vec![HttpRule::new("/api", "GET")]));

        let egress = &rule.egress[0];
        assert_eq!(egress.peers, vec![PeerSelector::cidr("10.0.0.0/8").unwrap()]);
        assert_eq!(egress.to_ports[0].ports, vec![PortProtocol::new(53, Protocol::Udp)]);

        assert_eq!(config.secret_store().unwrap().len(), 1);
    }

    #[test]
    fn test_peer_spellings() {
        let section: PeerRuleConfig = toml::from_str("from_endpoints = [{}]").unwrap();
        assert_eq!(section.peers().unwrap(), vec![PeerSelector::wildcard()]);

        let section: PeerRuleConfig = toml::from_str(r#"cidrs = ["192.168.0.0/16"]"#).unwrap();
        assert_eq!(section.peers().unwrap(), vec![PeerSelector::cidr("192.168.0.0/16").unwrap()]);

        assert!(PeerRuleConfig::default().peers().unwrap().is_empty());
    }

    #[test]
    fn test_mixed_content_rules_rejected() {
        let port_rule = PortRuleConfig {
            rules: Some(L7RulesConfig {
                http: vec![HttpRule::new("/", "GET")],
                l7proto: Some("tester".to_string()),
                l7: vec![],
            }),
            ..Default::default()
        };
        assert!(matches!(
            port_rule.to_port_rule(),
            Err(crate::error::PolicyError::MalformedContentRules(_))
        ));
    }

    #[test]
    fn test_bad_port() {
        let port = PortConfig {
            port: "http".to_string(),
            protocol: "TCP".to_string(),
        };
        assert!(port.to_key().is_err());

        let port = PortConfig {
            port: String::new(),
            protocol: String::new(),
        };
        assert_eq!(port.to_key().unwrap(), PortProtocol::WILDCARD);
    }
}
