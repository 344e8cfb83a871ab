//! Selector interning
//!
//! Filters hold `CachedSelector` handles; the cache itself only keeps weak
//! references, so a selector lives exactly as long as some policy uses it.

use super::{LabelSet, PeerSelector};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError, Weak};

#[derive(Debug)]
struct SelectorEntry {
    canonical: String,
    selector: PeerSelector,
}

/// Shared handle to an interned selector
///
/// Equality, hashing and ordering use the canonical string.
#[derive(Clone)]
pub struct CachedSelector(Arc<SelectorEntry>);

impl CachedSelector {
    pub fn canonical(&self) -> &str {
        &self.0.canonical
    }

    pub fn selector(&self) -> &PeerSelector {
        &self.0.selector
    }

    pub fn is_wildcard(&self) -> bool {
        self.0.selector.is_wildcard()
    }

    pub fn matches(&self, labels: &LabelSet) -> bool {
        self.0.selector.matches(labels)
    }
}

impl PartialEq for CachedSelector {
    fn eq(&self, other: &Self) -> bool {
        self.0.canonical == other.0.canonical
    }
}

impl Eq for CachedSelector {}

impl Hash for CachedSelector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.canonical.hash(state);
    }
}

impl PartialOrd for CachedSelector {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CachedSelector {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.canonical.cmp(&other.0.canonical)
    }
}

impl fmt::Debug for CachedSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CachedSelector({})", self.0.canonical)
    }
}

impl fmt::Display for CachedSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.canonical)
    }
}

/// Dead entries are swept on insert once the table reaches this size
const MIN_PRUNE_AT: usize = 64;

#[derive(Debug)]
struct Entries {
    map: HashMap<String, Weak<SelectorEntry>>,
    prune_at: usize,
}

impl Default for Entries {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
            prune_at: MIN_PRUNE_AT,
        }
    }
}

impl Entries {
    fn prune(&mut self) -> usize {
        let before = self.map.len();
        self.map.retain(|_, e| e.strong_count() > 0);
        self.prune_at = (self.map.len() * 2).max(MIN_PRUNE_AT);
        before - self.map.len()
    }
}

/// Interning table shared by every policy computation
#[derive(Debug, Default)]
pub struct SelectorCache {
    entries: Mutex<Entries>,
}

impl SelectorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the handle for a selector, interning it if needed
    pub fn add_selector(&self, selector: &PeerSelector) -> CachedSelector {
        let canonical = selector.canonical();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(entry) = entries.map.get(&canonical).and_then(Weak::upgrade) {
            return CachedSelector(entry);
        }

        if entries.map.len() >= entries.prune_at {
            let pruned = entries.prune();
            tracing::debug!(pruned, live = entries.map.len(), "Pruned selector cache");
        }

        let entry = Arc::new(SelectorEntry {
            canonical: canonical.clone(),
            selector: selector.clone(),
        });
        entries.map.insert(canonical, Arc::downgrade(&entry));
        CachedSelector(entry)
    }

    /// Look up a live selector by canonical string
    pub fn lookup(&self, canonical: &str) -> Option<CachedSelector> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .map
            .get(canonical)
            .and_then(Weak::upgrade)
            .map(CachedSelector)
    }

    /// All live selectors matching an identity
    pub fn matching(&self, labels: &LabelSet) -> Vec<CachedSelector> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut selected: Vec<CachedSelector> = entries
            .map
            .values()
            .filter_map(Weak::upgrade)
            .map(CachedSelector)
            .filter(|s| s.matches(labels))
            .collect();
        selected.sort();
        selected
    }

    /// Number of selectors still referenced by some policy
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.map.values().filter(|e| e.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries no policy references any more; returns how many went
    ///
    /// `add_selector` also does this whenever the table has doubled since
    /// the last sweep.
    pub fn prune(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).prune()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::EndpointSelector;

    #[test]
    fn test_interning_returns_equal_handles() {
        let cache = SelectorCache::new();
        let a = cache.add_selector(&PeerSelector::wildcard());
        let b = cache.add_selector(&PeerSelector::wildcard());
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a.0, &b.0));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_weak_entries_expire() {
        let cache = SelectorCache::new();
        let foo: PeerSelector = EndpointSelector::from_labels(&["foo"]).unwrap().into();
        let handle = cache.add_selector(&foo);
        assert!(cache.lookup(handle.canonical()).is_some());

        let canonical = handle.canonical().to_string();
        drop(handle);
        assert!(cache.lookup(&canonical).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.prune(), 1);
    }

    #[test]
    fn test_dead_entries_swept_on_insert() {
        let cache = SelectorCache::new();
        let keep = cache.add_selector(&PeerSelector::wildcard());

        for i in 0..1000 {
            let label = format!("k8s:app=web-{}", i);
            let selector: PeerSelector = EndpointSelector::from_labels(&[label.as_str()]).unwrap().into();
            drop(cache.add_selector(&selector));
        }

        let slots = cache.entries.lock().unwrap().map.len();
        assert!(slots <= MIN_PRUNE_AT, "{} slots left", slots);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(keep.canonical()), Some(keep));
    }

    #[test]
    fn test_matching() {
        let cache = SelectorCache::new();
        let web: PeerSelector = EndpointSelector::from_labels(&["k8s:app=web"]).unwrap().into();
        let db: PeerSelector = EndpointSelector::from_labels(&["k8s:app=db"]).unwrap().into();
        let _handles = [
            cache.add_selector(&web),
            cache.add_selector(&db),
            cache.add_selector(&PeerSelector::wildcard()),
        ];

        let identity = LabelSet::parse(["k8s:app=web"]).unwrap();
        let selected = cache.matching(&identity);
        assert_eq!(selected.len(), 2);
        assert!(selected.iter().any(|s| s.is_wildcard()));
    }
}
