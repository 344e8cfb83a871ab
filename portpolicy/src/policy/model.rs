//! Deterministic, serializable projection of a policy
//!
//! Every filter is rendered to one compact JSON string with a fixed field
//! order, and each direction's strings are sorted before they are returned.

use super::map::L4PolicyMap;
use crate::error::Result;
use crate::filter::L4Filter;
use crate::l7::{HttpRule, L7Rules, NamedRule};
use crate::port::Protocol;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One rendered filter
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyRule {
    pub rule: String,
    #[serde(rename = "derived-from-rules", default, skip_serializing_if = "Vec::is_empty")]
    pub derived_from_rules: Vec<Vec<String>>,
}

/// API view of a whole policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct L4PolicyModel {
    pub ingress: Vec<PolicyRule>,
    pub egress: Vec<PolicyRule>,
}

#[derive(Serialize)]
struct RenderedFilter<'a> {
    port: u16,
    protocol: Protocol,
    #[serde(rename = "l7-rules", skip_serializing_if = "Vec::is_empty")]
    l7_rules: Vec<BTreeMap<&'a str, RenderedL7<'a>>>,
}

#[derive(Serialize)]
struct RenderedL7<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    http: Option<&'a [HttpRule]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    l7proto: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    l7: Option<&'a [NamedRule]>,
}

impl<'a> RenderedL7<'a> {
    fn from_rules(rules: &'a L7Rules) -> Option<Self> {
        match rules {
            L7Rules::None => None,
            L7Rules::Http(http) => Some(Self {
                http: Some(http.as_slice()),
                l7proto: None,
                l7: None,
            }),
            L7Rules::Named { parser, rules } => Some(Self {
                http: None,
                l7proto: Some(parser.as_str()),
                l7: (!rules.is_empty()).then_some(rules.as_slice()),
            }),
        }
    }
}

/// Canonical string for one filter
pub fn render_filter(filter: &L4Filter) -> Result<String> {
    let l7_rules = filter
        .sorted_selectors()
        .into_iter()
        .filter(|(_, policy)| policy.has_content())
        .filter_map(|(selector, policy)| {
            RenderedL7::from_rules(&policy.l7_rules).map(|rendered| {
                let mut entry = BTreeMap::new();
                entry.insert(selector.canonical(), rendered);
                entry
            })
        })
        .collect();

    let rendered = RenderedFilter {
        port: filter.port(),
        protocol: filter.protocol(),
        l7_rules,
    };
    Ok(serde_json::to_string(&rendered)?)
}

/// Rendered, sorted rules of one direction
pub fn render_map(map: &L4PolicyMap) -> Result<Vec<PolicyRule>> {
    let mut rules = map
        .filters()
        .map(|filter| {
            Ok(PolicyRule {
                rule: render_filter(filter)?,
                derived_from_rules: filter
                    .derived_from()
                    .iter()
                    .filter(|origin| !origin.is_empty())
                    .cloned()
                    .collect(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    rules.sort();
    Ok(rules)
}
