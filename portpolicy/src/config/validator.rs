//! Policy document validation
//!
//! Everything that can be checked without computing a policy is checked
//! here, so a bad document is rejected up front instead of degrading an
//! endpoint to deny-all later.

use super::schema::{Config, PortRuleConfig, RuleConfig, CONFIG_VERSION};
use crate::error::{Result, ValidationError};
use crate::secret::SecretRef;
use indexmap::IndexSet;

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate an entire policy document
    pub fn validate(config: &Config) -> Result<()> {
        if config.common.config_version != CONFIG_VERSION {
            return Err(ValidationError::UnsupportedVersion {
                version: config.common.config_version.clone(),
                expected: CONFIG_VERSION.to_string(),
            }
            .into());
        }

        let secrets = Self::check_secrets(config)?;
        for (index, rule) in config.rules.iter().enumerate() {
            Self::validate_rule(index, rule, &secrets)?;
        }
        Ok(())
    }

    /// Secret names must parse and be unique
    fn check_secrets(config: &Config) -> Result<IndexSet<SecretRef>> {
        let mut seen = IndexSet::new();
        for secret in &config.secrets {
            let secret_ref = secret.secret_ref()?;
            if !seen.insert(secret_ref.clone()) {
                return Err(ValidationError::DuplicateSecret {
                    secret: secret_ref.to_string(),
                }
                .into());
            }
        }
        Ok(seen)
    }

    fn validate_rule(index: usize, rule: &RuleConfig, secrets: &IndexSet<SecretRef>) -> Result<()> {
        let name = rule.display_name(index);

        for label in &rule.labels {
            label
                .parse::<crate::selector::Label>()
                .map_err(|_| ValidationError::InvalidRule {
                    rule: name.clone(),
                    reason: format!("bad origin label {:?}", label),
                })?;
        }

        // Conversion checks ports, protocols, selectors, CIDRs and content rules
        let converted = rule.to_rule()?;

        for (section, peer_rule) in rule
            .ingress
            .iter()
            .map(|s| ("ingress", s))
            .chain(rule.egress.iter().map(|s| ("egress", s)))
        {
            if peer_rule.endpoints.is_empty() && peer_rule.cidrs.is_empty() {
                return Err(ValidationError::InvalidRule {
                    rule: name,
                    reason: format!("{} section names no peers", section),
                }
                .into());
            }
            for port_rule in &peer_rule.to_ports {
                Self::validate_port_rule(&name, peer_rule.deny, port_rule, secrets)?;
            }
        }

        tracing::debug!(
            rule = %name,
            ingress = converted.ingress.len(),
            egress = converted.egress.len(),
            "Validated rule"
        );
        Ok(())
    }

    fn validate_port_rule(
        name: &str,
        deny: bool,
        port_rule: &PortRuleConfig,
        secrets: &IndexSet<SecretRef>,
    ) -> Result<()> {
        let secret_refs = port_rule.secret_refs()?;
        if deny && (port_rule.rules.is_some() || !secret_refs.is_empty()) {
            return Err(ValidationError::InvalidRule {
                rule: name.to_string(),
                reason: "deny sections cannot carry content rules or TLS".to_string(),
            }
            .into());
        }

        for secret in secret_refs {
            if !secrets.contains(&secret) {
                return Err(ValidationError::UnknownSecret {
                    secret: secret.to_string(),
                    rule: name.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}
