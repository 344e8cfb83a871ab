//! Per-port/protocol filters and their construction

pub mod builder;
pub mod per_selector;

pub use builder::{build_filter, FilterInput, PolicyContext};
pub use per_selector::PerSelectorPolicy;

use crate::error::{L7Conflict, PolicyError, Result};
use crate::l7::{EnforcementKind, L7Parser};
use crate::port::{Direction, PortProtocol, Protocol};
use crate::selector::CachedSelector;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Provenance of a filter: the sorted labels of one source rule
pub type RuleOrigin = Vec<String>;

/// The enforcement decision for one port/protocol in one direction
#[derive(Debug, Clone)]
pub struct L4Filter {
    key: PortProtocol,
    direction: Direction,
    l7_parser: L7Parser,
    rules_per_selector: HashMap<CachedSelector, PerSelectorPolicy>,
    derived_from: BTreeSet<RuleOrigin>,
}

impl L4Filter {
    pub(crate) fn new(
        key: PortProtocol,
        direction: Direction,
        l7_parser: L7Parser,
        rules_per_selector: HashMap<CachedSelector, PerSelectorPolicy>,
        origin: RuleOrigin,
    ) -> Self {
        let mut derived_from = BTreeSet::new();
        derived_from.insert(origin);
        Self {
            key,
            direction,
            l7_parser,
            rules_per_selector,
            derived_from,
        }
    }

    pub fn key(&self) -> PortProtocol {
        self.key
    }

    pub fn port(&self) -> u16 {
        self.key.port
    }

    pub fn protocol(&self) -> Protocol {
        self.key.protocol
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_ingress(&self) -> bool {
        self.direction == Direction::Ingress
    }

    pub fn l7_parser(&self) -> &L7Parser {
        &self.l7_parser
    }

    pub fn enforcement_kind(&self) -> EnforcementKind {
        self.l7_parser.enforcement()
    }

    pub fn is_redirect(&self) -> bool {
        self.enforcement_kind() != EnforcementKind::None
    }

    pub fn is_generic_redirect(&self) -> bool {
        self.enforcement_kind() == EnforcementKind::GenericRedirect
    }

    pub fn is_named_parser_redirect(&self) -> bool {
        self.enforcement_kind() == EnforcementKind::NamedParserRedirect
    }

    pub fn rules_per_selector(&self) -> &HashMap<CachedSelector, PerSelectorPolicy> {
        &self.rules_per_selector
    }

    pub fn selector_policy(&self, selector: &CachedSelector) -> Option<&PerSelectorPolicy> {
        self.rules_per_selector.get(selector)
    }

    /// Selectors sorted by canonical string, with their policies
    pub fn sorted_selectors(&self) -> Vec<(&CachedSelector, &PerSelectorPolicy)> {
        let mut selectors: Vec<_> = self.rules_per_selector.iter().collect();
        selectors.sort_by(|a, b| a.0.cmp(b.0));
        selectors
    }

    pub fn derived_from(&self) -> &BTreeSet<RuleOrigin> {
        &self.derived_from
    }

    /// Merge another filter for the same key and direction into a new filter
    ///
    /// Neither input is modified, so a failed merge leaves the caller's
    /// state as it was.
    pub fn merged(&self, other: &L4Filter) -> Result<L4Filter> {
        debug_assert_eq!(self.key, other.key);
        debug_assert_eq!(self.direction, other.direction);

        let l7_parser = self.l7_parser.merge(&other.l7_parser).ok_or_else(|| {
            PolicyError::ConflictingL7Parser {
                key: self.key,
                conflict: L7Conflict::Parser {
                    existing: self.l7_parser.clone(),
                    incoming: other.l7_parser.clone(),
                },
            }
        })?;

        let mut rules_per_selector = self.rules_per_selector.clone();
        for (selector, policy) in &other.rules_per_selector {
            let merged = match rules_per_selector.get(selector) {
                Some(existing) => existing.merged(policy, selector).map_err(|conflict| {
                    PolicyError::ConflictingL7Parser {
                        key: self.key,
                        conflict,
                    }
                })?,
                None => policy.clone(),
            };
            rules_per_selector.insert(selector.clone(), merged);
        }

        let mut derived_from = self.derived_from.clone();
        derived_from.extend(other.derived_from.iter().cloned());

        debug!(
            key = %self.key,
            direction = %self.direction,
            parser = %l7_parser,
            selectors = rules_per_selector.len(),
            "Merged filters"
        );

        Ok(L4Filter {
            key: self.key,
            direction: self.direction,
            l7_parser,
            rules_per_selector,
            derived_from,
        })
    }
}
