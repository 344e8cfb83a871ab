//! Layer-7 content rules, parser identity and TLS contexts

use crate::error::{L7Conflict, PolicyError, Result};
use crate::secret::SecretRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved parser name for HTTP rules
pub const HTTP_PARSER: &str = "http";

/// One HTTP rule; empty fields match anything
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HttpRule {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,
}

impl HttpRule {
    pub fn new(path: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            ..Default::default()
        }
    }

    /// True if this rule admits every request
    pub fn is_wildcard(&self) -> bool {
        self.path.is_empty() && self.method.is_empty() && self.host.is_empty() && self.headers.is_empty()
    }
}

/// Opaque key/value rule for a named parser
pub type NamedRule = BTreeMap<String, String>;

/// Content rule set attached to a selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum L7Rules {
    /// L4 allow, no content constraint
    #[default]
    None,
    Http(Vec<HttpRule>),
    Named {
        parser: String,
        rules: Vec<NamedRule>,
    },
}

impl L7Rules {
    /// Build a rule set from its configuration form
    ///
    /// Exactly one of HTTP or named-parser rules may be present.
    pub fn from_parts(http: Vec<HttpRule>, l7proto: Option<String>, l7: Vec<NamedRule>) -> Result<Self> {
        let parser = l7proto.filter(|p| !p.is_empty());
        match (http.is_empty(), parser) {
            (true, None) if l7.is_empty() => Ok(L7Rules::None),
            (true, None) => Err(PolicyError::MalformedContentRules(
                "l7 rules given without an l7proto parser name".to_string(),
            )),
            (false, None) if l7.is_empty() => Ok(L7Rules::Http(dedup(http))),
            (false, _) => Err(PolicyError::MalformedContentRules(
                "both HTTP and named-parser rules in one rule set".to_string(),
            )),
            (true, Some(parser)) if parser.eq_ignore_ascii_case(HTTP_PARSER) => {
                Err(PolicyError::MalformedContentRules(format!(
                    "parser name {:?} is reserved for HTTP rules",
                    parser
                )))
            }
            (true, Some(parser)) => Ok(L7Rules::Named {
                parser,
                rules: dedup(l7),
            }),
        }
    }

    pub fn http(rules: Vec<HttpRule>) -> Self {
        L7Rules::Http(dedup(rules))
    }

    pub fn named(parser: impl Into<String>, rules: Vec<NamedRule>) -> Self {
        L7Rules::Named {
            parser: parser.into(),
            rules: dedup(rules),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, L7Rules::None)
    }

    pub fn parser(&self) -> L7Parser {
        match self {
            L7Rules::None => L7Parser::None,
            L7Rules::Http(_) => L7Parser::Http,
            L7Rules::Named { parser, .. } => L7Parser::Named(parser.clone()),
        }
    }

    /// Union of two rule sets for the same selector
    ///
    /// An L4 allow on either side keeps its meaning by adding a rule that
    /// matches everything, so the union never narrows.
    pub(crate) fn union(&self, other: &L7Rules) -> std::result::Result<L7Rules, L7Conflict> {
        match (self, other) {
            (L7Rules::None, L7Rules::None) => Ok(L7Rules::None),
            (L7Rules::None, rules) | (rules, L7Rules::None) => Ok(rules.with_wildcard()),
            (L7Rules::Http(a), L7Rules::Http(b)) => Ok(L7Rules::Http(concat(a, b))),
            (
                L7Rules::Named { parser: p, rules: a },
                L7Rules::Named { parser: q, rules: b },
            ) if p == q => Ok(L7Rules::Named {
                parser: p.clone(),
                rules: concat(a, b),
            }),
            _ => Err(L7Conflict::Parser {
                existing: self.parser(),
                incoming: other.parser(),
            }),
        }
    }

    fn with_wildcard(&self) -> L7Rules {
        match self {
            L7Rules::None => L7Rules::None,
            L7Rules::Http(rules) => L7Rules::Http(concat(rules, &[HttpRule::default()])),
            L7Rules::Named { parser, rules } => L7Rules::Named {
                parser: parser.clone(),
                rules: concat(rules, &[NamedRule::new()]),
            },
        }
    }
}

fn dedup<T: PartialEq>(rules: Vec<T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(rules.len());
    for rule in rules {
        if !out.contains(&rule) {
            out.push(rule);
        }
    }
    out
}

fn concat<T: PartialEq + Clone>(first: &[T], second: &[T]) -> Vec<T> {
    let mut out = first.to_vec();
    for rule in second {
        if !out.contains(rule) {
            out.push(rule.clone());
        }
    }
    out
}

/// Parser a filter's traffic must go through
///
/// Ordered by how much of the proxy a filter needs; `Named` parsers are
/// only compatible with themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum L7Parser {
    #[default]
    None,
    Tls,
    Http,
    Named(String),
}

impl L7Parser {
    pub fn enforcement(&self) -> EnforcementKind {
        match self {
            L7Parser::None => EnforcementKind::None,
            L7Parser::Tls | L7Parser::Http => EnforcementKind::GenericRedirect,
            L7Parser::Named(_) => EnforcementKind::NamedParserRedirect,
        }
    }

    /// Combined requirement of two parsers, or `None` if they conflict
    pub fn merge(&self, other: &L7Parser) -> Option<L7Parser> {
        match (self, other) {
            (L7Parser::None, p) | (p, L7Parser::None) => Some(p.clone()),
            (L7Parser::Tls, p) | (p, L7Parser::Tls) => Some(p.clone()),
            (L7Parser::Http, L7Parser::Http) => Some(L7Parser::Http),
            (L7Parser::Named(a), L7Parser::Named(b)) if a == b => Some(self.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for L7Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            L7Parser::None => write!(f, "none"),
            L7Parser::Tls => write!(f, "tls"),
            L7Parser::Http => write!(f, "{}", HTTP_PARSER),
            L7Parser::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Enforcement backend a filter requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnforcementKind {
    None,
    GenericRedirect,
    NamedParserRedirect,
}

impl fmt::Display for EnforcementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnforcementKind::None => write!(f, "none"),
            EnforcementKind::GenericRedirect => write!(f, "generic-redirect"),
            EnforcementKind::NamedParserRedirect => write!(f, "named-parser-redirect"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsSide {
    Terminating,
    Originating,
}

impl fmt::Display for TlsSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsSide::Terminating => write!(f, "terminating"),
            TlsSide::Originating => write!(f, "originating"),
        }
    }
}

/// TLS material the proxy needs on one side of a connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TlsContext {
    pub secret: SecretRef,
    pub side: TlsSide,
}

impl TlsContext {
    pub fn terminating(secret: SecretRef) -> Self {
        Self {
            secret,
            side: TlsSide::Terminating,
        }
    }

    pub fn originating(secret: SecretRef) -> Self {
        Self {
            secret,
            side: TlsSide::Originating,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(pairs: &[(&str, &str)]) -> NamedRule {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_parts() {
        assert_eq!(L7Rules::from_parts(vec![], None, vec![]).unwrap(), L7Rules::None);

        let http = L7Rules::from_parts(vec![HttpRule::new("/", "GET")], None, vec![]).unwrap();
        assert_eq!(http.parser(), L7Parser::Http);

        let named = L7Rules::from_parts(vec![], Some("kafka".to_string()), vec![kv(&[("topic", "a")])]).unwrap();
        assert_eq!(named.parser(), L7Parser::Named("kafka".to_string()));
    }

    #[test]
    fn test_malformed_rule_sets() {
        let both = L7Rules::from_parts(
            vec![HttpRule::new("/", "GET")],
            Some("kafka".to_string()),
            vec![kv(&[("topic", "a")])],
        );
        assert!(matches!(both, Err(PolicyError::MalformedContentRules(_))));

        let orphan = L7Rules::from_parts(vec![], None, vec![kv(&[("topic", "a")])]);
        assert!(matches!(orphan, Err(PolicyError::MalformedContentRules(_))));

        let reserved = L7Rules::from_parts(vec![], Some("HTTP".to_string()), vec![]);
        assert!(matches!(reserved, Err(PolicyError::MalformedContentRules(_))));
    }

    #[test]
    fn test_http_union_dedups() {
        let a = L7Rules::http(vec![HttpRule::new("/", "GET")]);
        let b = L7Rules::http(vec![HttpRule::new("/bar", "GET"), HttpRule::new("/", "GET")]);
        assert_eq!(
            a.union(&b).unwrap(),
            L7Rules::Http(vec![HttpRule::new("/", "GET"), HttpRule::new("/bar", "GET")])
        );
        assert_eq!(a.union(&a).unwrap(), a);
    }

    #[test]
    fn test_named_union_keeps_first_seen_order() {
        let a = L7Rules::named("tester", vec![kv(&[("method", "PUT")])]);
        let b = L7Rules::named("tester", vec![kv(&[("method", "GET")]), kv(&[("method", "PUT")])]);
        let merged = a.union(&b).unwrap();
        assert_eq!(
            merged,
            L7Rules::named("tester", vec![kv(&[("method", "PUT")]), kv(&[("method", "GET")])])
        );
    }

    #[test]
    fn test_union_with_l4_allow_adds_wildcard() {
        let http = L7Rules::http(vec![HttpRule::new("/", "GET")]);
        let merged = L7Rules::None.union(&http).unwrap();
        match &merged {
            L7Rules::Http(rules) => {
                assert_eq!(rules.len(), 2);
                assert!(rules[1].is_wildcard());
            }
            other => panic!("unexpected rules {:?}", other),
        }
        // Merging the allow again changes nothing
        assert_eq!(merged.union(&L7Rules::None).unwrap(), merged);
    }

    #[test]
    fn test_union_conflicts() {
        let http = L7Rules::http(vec![HttpRule::new("/", "GET")]);
        let kafka = L7Rules::named("kafka", vec![]);
        let tester = L7Rules::named("tester", vec![]);
        assert!(http.union(&kafka).is_err());
        assert!(kafka.union(&tester).is_err());
    }

    #[test]
    fn test_parser_merge_is_monotonic() {
        assert_eq!(L7Parser::None.merge(&L7Parser::Tls), Some(L7Parser::Tls));
        assert_eq!(L7Parser::Tls.merge(&L7Parser::Http), Some(L7Parser::Http));
        assert_eq!(
            L7Parser::Tls.merge(&L7Parser::Named("kafka".into())),
            Some(L7Parser::Named("kafka".into()))
        );
        assert_eq!(L7Parser::Http.merge(&L7Parser::Named("kafka".into())), None);
        assert_eq!(L7Parser::Named("a".into()).merge(&L7Parser::Named("b".into())), None);
        assert_eq!(L7Parser::Http.enforcement(), EnforcementKind::GenericRedirect);
        assert_eq!(L7Parser::Tls.enforcement(), EnforcementKind::GenericRedirect);
        assert_eq!(L7Parser::None.enforcement(), EnforcementKind::None);
    }
}
