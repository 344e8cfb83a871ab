//! Aggregate L4/L7 policy for one identity
//!
//! A policy is computed in one pass from the full rule set, then published
//! read-only. Recomputation produces a new `L4Policy`; existing ones are
//! never modified.

pub mod map;
pub mod model;
pub mod resolve;

pub use map::L4PolicyMap;
pub use model::{L4PolicyModel, PolicyRule};
pub use resolve::resolve_policy;

use crate::error::Result;
use crate::l7::EnforcementKind;
use crate::port::Direction;

/// Ingress and egress filters for one identity
#[derive(Debug, Clone)]
pub struct L4Policy {
    ingress: L4PolicyMap,
    egress: L4PolicyMap,
    revision: u64,
}

impl L4Policy {
    pub fn new(ingress: L4PolicyMap, egress: L4PolicyMap, revision: u64) -> Self {
        debug_assert_eq!(ingress.direction(), Direction::Ingress);
        debug_assert_eq!(egress.direction(), Direction::Egress);
        Self {
            ingress,
            egress,
            revision,
        }
    }

    /// Policy with no filters, which allows nothing
    pub fn deny_all(revision: u64) -> Self {
        Self::new(
            L4PolicyMap::new(Direction::Ingress),
            L4PolicyMap::new(Direction::Egress),
            revision,
        )
    }

    pub fn ingress(&self) -> &L4PolicyMap {
        &self.ingress
    }

    pub fn egress(&self) -> &L4PolicyMap {
        &self.egress
    }

    pub fn map(&self, direction: Direction) -> &L4PolicyMap {
        match direction {
            Direction::Ingress => &self.ingress,
            Direction::Egress => &self.egress,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_empty(&self) -> bool {
        self.ingress.is_empty() && self.egress.is_empty()
    }

    pub fn has_generic_redirect(&self) -> bool {
        self.has_enforcement(EnforcementKind::GenericRedirect)
    }

    pub fn has_named_parser_redirect(&self) -> bool {
        self.has_enforcement(EnforcementKind::NamedParserRedirect)
    }

    fn has_enforcement(&self, kind: EnforcementKind) -> bool {
        self.ingress.has_enforcement(kind) || self.egress.has_enforcement(kind)
    }

    /// Sorted, rendered view of both directions
    pub fn model(&self) -> Result<L4PolicyModel> {
        Ok(L4PolicyModel {
            ingress: model::render_map(&self.ingress)?,
            egress: model::render_map(&self.egress)?,
        })
    }
}
