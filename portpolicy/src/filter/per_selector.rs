//! Content rules and TLS material for one peer selector

use crate::error::L7Conflict;
use crate::l7::{L7Parser, L7Rules, TlsContext, TlsSide};
use crate::selector::CachedSelector;

/// What one selector is allowed to do on a port
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerSelectorPolicy {
    pub l7_rules: L7Rules,
    pub terminating_tls: Option<TlsContext>,
    pub originating_tls: Option<TlsContext>,
    /// Traffic from this selector is dropped; takes precedence over allows
    pub is_deny: bool,
}

impl PerSelectorPolicy {
    pub fn allow(l7_rules: L7Rules) -> Self {
        Self {
            l7_rules,
            ..Default::default()
        }
    }

    pub fn deny() -> Self {
        Self {
            is_deny: true,
            ..Default::default()
        }
    }

    pub fn has_tls(&self) -> bool {
        self.terminating_tls.is_some() || self.originating_tls.is_some()
    }

    /// Whether the proxy has to see this selector's traffic
    pub fn is_redirect(&self) -> bool {
        !self.is_deny && (!self.l7_rules.is_none() || self.has_tls())
    }

    /// True if there are content rules to report
    pub fn has_content(&self) -> bool {
        !self.is_deny && !self.l7_rules.is_none()
    }

    pub fn parser(&self) -> L7Parser {
        if self.is_deny {
            return L7Parser::None;
        }
        match self.l7_rules.parser() {
            L7Parser::None if self.has_tls() => L7Parser::Tls,
            parser => parser,
        }
    }

    /// Union with another rule set for the same selector
    ///
    /// Deny wins outright. TLS material must agree per side.
    pub fn merged(
        &self,
        other: &PerSelectorPolicy,
        selector: &CachedSelector,
    ) -> Result<PerSelectorPolicy, L7Conflict> {
        if self.is_deny || other.is_deny {
            return Ok(PerSelectorPolicy::deny());
        }

        Ok(PerSelectorPolicy {
            l7_rules: self.l7_rules.union(&other.l7_rules)?,
            terminating_tls: merge_tls(
                &self.terminating_tls,
                &other.terminating_tls,
                TlsSide::Terminating,
                selector,
            )?,
            originating_tls: merge_tls(
                &self.originating_tls,
                &other.originating_tls,
                TlsSide::Originating,
                selector,
            )?,
            is_deny: false,
        })
    }
}

fn merge_tls(
    existing: &Option<TlsContext>,
    incoming: &Option<TlsContext>,
    side: TlsSide,
    selector: &CachedSelector,
) -> Result<Option<TlsContext>, L7Conflict> {
    match (existing, incoming) {
        (Some(a), Some(b)) if a.secret != b.secret => Err(L7Conflict::TlsSecret {
            selector: selector.canonical().to_string(),
            side,
            existing: a.secret.clone(),
            incoming: b.secret.clone(),
        }),
        (Some(a), _) => Ok(Some(a.clone())),
        (None, b) => Ok(b.clone()),
    }
}
