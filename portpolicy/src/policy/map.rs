//! Per-direction collection of filters keyed by port/protocol

use crate::error::{PolicyError, Result};
use crate::filter::L4Filter;
use crate::l7::EnforcementKind;
use crate::port::{Direction, PortProtocol};
use std::collections::HashMap;
use tracing::warn;

/// Filters for one direction
#[derive(Debug, Clone)]
pub struct L4PolicyMap {
    direction: Direction,
    filters: HashMap<PortProtocol, L4Filter>,
}

impl L4PolicyMap {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            filters: HashMap::new(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Add a filter, merging with any filter already on its key
    ///
    /// On error the map is left exactly as it was.
    pub fn insert(&mut self, filter: L4Filter) -> Result<()> {
        debug_assert_eq!(filter.direction(), self.direction);

        let key = filter.key();
        let candidate = match self.filters.get(&key) {
            Some(existing) => existing.merged(&filter),
            None => Ok(filter),
        };
        let candidate = candidate.and_then(|c| {
            self.check_wildcard_port(&c)?;
            Ok(c)
        });

        match candidate {
            Ok(candidate) => {
                self.filters.insert(key, candidate);
                Ok(())
            }
            Err(e) => {
                warn!(key = %key, direction = %self.direction, error = %e, "Rejected filter");
                Err(e)
            }
        }
    }

    /// Port 0 and a specific port of the same protocol only coexist when
    /// both are plain L4 allows
    fn check_wildcard_port(&self, candidate: &L4Filter) -> Result<()> {
        let key = candidate.key();
        for other in self.filters.values() {
            let other_key = other.key();
            if other_key.protocol != key.protocol
                || other_key.port == key.port
                || !(other_key.is_wildcard_port() || key.is_wildcard_port())
            {
                continue;
            }
            if candidate.is_redirect() || other.is_redirect() {
                let port = if key.is_wildcard_port() {
                    other_key.port
                } else {
                    key.port
                };
                return Err(PolicyError::WildcardPortConflict {
                    protocol: key.protocol,
                    port,
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &PortProtocol) -> Option<&L4Filter> {
        self.filters.get(key)
    }

    /// Look up by `"<port>/<PROTOCOL>"`
    pub fn get_by_str(&self, key: &str) -> Option<&L4Filter> {
        key.parse::<PortProtocol>().ok().and_then(|k| self.filters.get(&k))
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Filters in unspecified order
    pub fn filters(&self) -> impl Iterator<Item = &L4Filter> {
        self.filters.values()
    }

    /// Filters ordered by key
    pub fn sorted_filters(&self) -> Vec<&L4Filter> {
        let mut filters: Vec<&L4Filter> = self.filters.values().collect();
        filters.sort_by_key(|f| f.key());
        filters
    }

    pub fn has_enforcement(&self, kind: EnforcementKind) -> bool {
        self.filters.values().any(|f| f.enforcement_kind() == kind)
    }
}
