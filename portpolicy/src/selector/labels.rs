//! Identity labels

use crate::error::ValidationError;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Source that matches labels from every source
pub const SOURCE_ANY: &str = "any";

/// Label sources recognised in dotted selector keys (`k8s.app`)
pub const KNOWN_SOURCES: &[&str] = &[SOURCE_ANY, "k8s", "reserved", "cidr", "container", "unspec"];

/// A single `source:key=value` label
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    pub source: String,
    pub key: String,
    pub value: String,
}

impl Label {
    pub fn new(source: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    /// Key as written in a selector: `source.key`
    pub fn selector_key(&self) -> String {
        format!("{}.{}", self.source, self.key)
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_empty() {
            write!(f, "{}:{}", self.source, self.key)
        } else {
            write!(f, "{}:{}={}", self.source, self.key, self.value)
        }
    }
}

impl FromStr for Label {
    type Err = ValidationError;

    /// Parses `source:key=value`, `key=value` or `source:key`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (lhs, value) = s.split_once('=').unwrap_or((s, ""));
        let (source, key) = match lhs.split_once(':') {
            Some((source, key)) if !source.is_empty() => (source, key),
            Some((_, key)) => (SOURCE_ANY, key),
            None => (SOURCE_ANY, lhs),
        };

        if !valid_source(source) || !valid_key(source, key) || !valid_value(value) {
            return Err(ValidationError::InvalidLabel {
                label: s.to_string(),
            });
        }

        Ok(Label::new(source, key, value))
    }
}

/// Split a selector key into `(source, key)`
///
/// Accepts `source:key`, `source.key` for a known source, or a bare key
/// which matches any source.
pub fn split_selector_key(key: &str) -> Result<(String, String), ValidationError> {
    let invalid = || ValidationError::InvalidLabel {
        label: key.to_string(),
    };

    let (source, rest) = match key.split_once(':') {
        Some((source, rest)) => (source, rest),
        None => match key.split_once('.') {
            Some((source, rest)) if KNOWN_SOURCES.contains(&source) => (source, rest),
            _ => (SOURCE_ANY, key),
        },
    };

    if !valid_source(source) || !valid_key(source, rest) {
        return Err(invalid());
    }
    Ok((source.to_string(), rest.to_string()))
}

/// Check a label value against the Kubernetes label value syntax
pub fn validate_value(value: &str) -> Result<(), ValidationError> {
    if valid_value(value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidLabel {
            label: value.to_string(),
        })
    }
}

// Selector canonical strings use `.`, `:` and `,` as separators, so what
// may appear in each part is restricted to keep them unambiguous.

fn valid_source(source: &str) -> bool {
    !source.is_empty()
        && source
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Optional DNS prefix and `/`, then a name; `cidr` keys are address
/// prefixes and may also contain `:`
fn valid_key(source: &str, key: &str) -> bool {
    if source == "cidr" {
        return !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_hexdigit() || matches!(c, '.' | ':' | '/'));
    }

    let (prefix, name) = match key.rsplit_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    let prefix_ok = prefix.map_or(true, |p| p.len() <= 253 && valid_segment(p, &['-', '.']));
    prefix_ok && name.len() <= 63 && valid_segment(name, &['-', '_', '.'])
}

/// Empty, or at most 63 characters of alphanumerics, `-`, `_` and `.`
/// starting and ending with an alphanumeric
fn valid_value(value: &str) -> bool {
    value.is_empty() || (value.len() <= 63 && valid_segment(value, &['-', '_', '.']))
}

fn valid_segment(segment: &str, inner: &[char]) -> bool {
    let starts_ok = segment.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    let ends_ok = segment.chars().last().is_some_and(|c| c.is_ascii_alphanumeric());
    starts_ok
        && ends_ok
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || inner.contains(&c))
}

/// The labels of one identity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    labels: BTreeSet<Label>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a list of label strings
    pub fn parse<I, S>(labels: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        labels
            .into_iter()
            .map(|l| l.as_ref().parse::<Label>())
            .collect()
    }

    pub fn insert(&mut self, label: Label) {
        self.labels.insert(label);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.labels.iter()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels with the given key; source `any` matches every source
    pub fn lookup<'a>(&'a self, source: &'a str, key: &'a str) -> impl Iterator<Item = &'a Label> + 'a {
        self.labels
            .iter()
            .filter(move |l| l.key == key && (source == SOURCE_ANY || l.source == source))
    }

    pub fn with_source<'a>(&'a self, source: &'a str) -> impl Iterator<Item = &'a Label> + 'a {
        self.labels.iter().filter(move |l| l.source == source)
    }
}

impl FromIterator<Label> for LabelSet {
    fn from_iter<T: IntoIterator<Item = Label>>(iter: T) -> Self {
        Self {
            labels: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<String> = self.labels.iter().map(|l| l.to_string()).collect();
        write!(f, "[{}]", labels.join(" "))
    }
}
