//! Peer selectors and the interning cache filters reference them through
//!
//! The policy engine only uses two capabilities of a selector: whether it
//! matches an identity's labels, and its canonical string.

pub mod cache;
pub mod labels;

pub use cache::{CachedSelector, SelectorCache};
pub use labels::{Label, LabelSet};

use crate::error::ValidationError;
use ipnet::IpNet;
use labels::{split_selector_key, validate_value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Set-based requirement operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// One `matchExpressions` entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Requirement {
    key: String,
    operator: Operator,
    values: Vec<String>,
}

impl Requirement {
    pub fn new(key: &str, operator: Operator, values: &[&str]) -> Result<Self, ValidationError> {
        let (source, key) = split_selector_key(key)?;
        let needs_values = matches!(operator, Operator::In | Operator::NotIn);
        if needs_values == values.is_empty() {
            return Err(ValidationError::InvalidRequirement {
                reason: format!(
                    "{:?} on {}.{} {} values",
                    operator,
                    source,
                    key,
                    if needs_values { "requires" } else { "takes no" }
                ),
            });
        }

        for value in values {
            validate_value(value)?;
        }
        let mut values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        values.sort();
        values.dedup();

        Ok(Self {
            key: format!("{}.{}", source, key),
            operator,
            values,
        })
    }

    fn matches(&self, labels: &LabelSet) -> bool {
        let (source, key) = split_normalized(&self.key);
        let mut found = labels.lookup(source, key).peekable();
        match self.operator {
            Operator::Exists => found.peek().is_some(),
            Operator::DoesNotExist => found.peek().is_none(),
            Operator::In => found.any(|l| self.values.contains(&l.value)),
            Operator::NotIn => !found.any(|l| self.values.contains(&l.value)),
        }
    }
}

fn split_normalized(key: &str) -> (&str, &str) {
    key.split_once('.').unwrap_or((labels::SOURCE_ANY, key))
}

/// Label selector over identity labels
///
/// An empty selector is the wildcard and selects every identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EndpointSelector {
    match_labels: BTreeMap<String, String>,
    match_expressions: Vec<Requirement>,
}

impl EndpointSelector {
    /// Selector matching every identity
    pub fn wildcard() -> Self {
        Self::default()
    }

    /// Build a selector requiring each of the given labels
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Result<Self, ValidationError> {
        let mut selector = Self::default();
        for label in labels {
            let label: Label = label.as_ref().parse()?;
            selector.match_labels.insert(label.selector_key(), label.value);
        }
        Ok(selector)
    }

    pub fn with_match_label(mut self, key: &str, value: &str) -> Result<Self, ValidationError> {
        let (source, key) = split_selector_key(key)?;
        validate_value(value)?;
        self.match_labels
            .insert(format!("{}.{}", source, key), value.to_string());
        Ok(self)
    }

    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.match_expressions.push(requirement);
        self.match_expressions.sort();
        self.match_expressions.dedup();
        self
    }

    pub fn is_wildcard(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    pub fn matches(&self, labels: &LabelSet) -> bool {
        let labels_match = self.match_labels.iter().all(|(k, v)| {
            let (source, key) = split_normalized(k);
            labels.lookup(source, key).any(|l| &l.value == v)
        });

        labels_match && self.match_expressions.iter().all(|r| r.matches(labels))
    }

    /// Stable string form used for ordering and projection output
    pub fn canonical(&self) -> String {
        let labels: Vec<String> = self
            .match_labels
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect();
        let expressions: Vec<String> = self
            .match_expressions
            .iter()
            .map(|r| {
                format!(
                    "{{key:{},operator:{:?},values:[{}]}}",
                    r.key,
                    r.operator,
                    r.values.join(",")
                )
            })
            .collect();

        format!(
            "LabelSelector{{matchLabels:{{{}}},matchExpressions:[{}]}}",
            labels.join(","),
            expressions.join(",")
        )
    }
}

/// A peer selector: label based, or an address range
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PeerSelector {
    Endpoint(EndpointSelector),
    Cidr(IpNet),
}

impl PeerSelector {
    pub fn wildcard() -> Self {
        PeerSelector::Endpoint(EndpointSelector::wildcard())
    }

    pub fn cidr(cidr: &str) -> Result<Self, ValidationError> {
        let net = cidr.parse::<IpNet>().map_err(|_| ValidationError::InvalidCidr {
            cidr: cidr.to_string(),
        })?;
        Ok(PeerSelector::Cidr(net.trunc()))
    }

    pub fn is_wildcard(&self) -> bool {
        match self {
            PeerSelector::Endpoint(selector) => selector.is_wildcard(),
            PeerSelector::Cidr(_) => false,
        }
    }

    /// Does an identity with these labels match this selector
    ///
    /// CIDR identities carry one `cidr:<prefix>` label per prefix they
    /// belong to; a CIDR selector matches if any of them falls inside it.
    pub fn matches(&self, labels: &LabelSet) -> bool {
        match self {
            PeerSelector::Endpoint(selector) => selector.matches(labels),
            PeerSelector::Cidr(net) => labels
                .with_source("cidr")
                .filter_map(|l| l.key.parse::<IpNet>().ok())
                .any(|prefix| net.contains(&prefix)),
        }
    }

    pub fn canonical(&self) -> String {
        match self {
            PeerSelector::Endpoint(selector) => selector.canonical(),
            PeerSelector::Cidr(net) => format!("CIDRSelector{{{}}}", net),
        }
    }
}

impl From<EndpointSelector> for PeerSelector {
    fn from(selector: EndpointSelector) -> Self {
        PeerSelector::Endpoint(selector)
    }
}

impl fmt::Display for PeerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}
