//! Published policies per endpoint
//!
//! Readers get an `Arc<L4Policy>` snapshot; a recomputation swaps the whole
//! policy under the write lock and never touches one already handed out.

use crate::error::Result;
use crate::filter::PolicyContext;
use crate::policy::{resolve_policy, L4Policy};
use crate::rule::Rule;
use crate::selector::LabelSet;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct PolicyRepository {
    policies: RwLock<HashMap<String, Arc<L4Policy>>>,
    revision: AtomicU64,
}

impl PolicyRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Revision to stamp on the next computed policy
    pub fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current policy of an endpoint
    pub fn get(&self, endpoint: &str) -> Option<Arc<L4Policy>> {
        let policies = self.policies.read().unwrap_or_else(PoisonError::into_inner);
        policies.get(endpoint).cloned()
    }

    /// Publish a policy, replacing whatever the endpoint had
    ///
    /// A policy older than the one already published is dropped; the
    /// returned handle is whichever policy is current afterwards.
    pub fn replace(&self, endpoint: &str, policy: L4Policy) -> Arc<L4Policy> {
        let mut policies = self.policies.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = policies.get(endpoint) {
            if current.revision() > policy.revision() {
                warn!(
                    endpoint,
                    current = current.revision(),
                    stale = policy.revision(),
                    "Skipping stale policy"
                );
                return Arc::clone(current);
            }
        }

        let policy = Arc::new(policy);
        policies.insert(endpoint.to_string(), Arc::clone(&policy));
        info!(endpoint, revision = policy.revision(), "Published policy");
        policy
    }

    pub fn remove(&self, endpoint: &str) -> Option<Arc<L4Policy>> {
        let mut policies = self.policies.write().unwrap_or_else(PoisonError::into_inner);
        policies.remove(endpoint)
    }

    pub fn len(&self) -> usize {
        self.policies.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recompute an endpoint's policy and publish it
    ///
    /// If the computation fails the endpoint gets a deny-all policy and the
    /// error is returned; a partially computed policy is never published.
    pub fn regenerate(
        &self,
        endpoint: &str,
        ctx: &PolicyContext<'_>,
        rules: &[Rule],
        identity: &LabelSet,
    ) -> Result<Arc<L4Policy>> {
        let revision = self.next_revision();
        match resolve_policy(ctx, rules, identity, revision) {
            Ok(policy) => Ok(self.replace(endpoint, policy)),
            Err(e) => {
                warn!(endpoint, revision, error = %e, "Falling back to deny-all policy");
                self.replace(endpoint, L4Policy::deny_all(revision));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::l7::{HttpRule, L7Rules};
    use crate::port::PortProtocol;
    use crate::rule::{PeerRule, PortRule};
    use crate::secret::{SecretRef, SecretStore};
    use crate::selector::{PeerSelector, SelectorCache};

    fn http_rule() -> Rule {
        Rule {
            ingress: vec![PeerRule::allow(
                vec![PeerSelector::wildcard()],
                vec![PortRule::new(vec![PortProtocol::tcp(80)])
                    .with_rules(L7Rules::http(vec![HttpRule::new("/", "GET")]))],
            )],
            ..Default::default()
        }
    }

    #[test]
    fn test_replace_swaps_whole_policy() {
        let cache = SelectorCache::new();
        let secrets = SecretStore::new();
        let ctx = PolicyContext::new(&cache, &secrets);
        let repo = PolicyRepository::new();
        let identity = LabelSet::new();

        let first = repo.regenerate("ep1", &ctx, &[http_rule()], &identity).unwrap();
        let second = repo.regenerate("ep1", &ctx, &[], &identity).unwrap();

        // Old snapshot is untouched by the swap
        assert_eq!(first.ingress().len(), 1);
        assert!(second.is_empty());
        assert!(second.revision() > first.revision());
        assert!(Arc::ptr_eq(&repo.get("ep1").unwrap(), &second));
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn test_failed_regeneration_denies() {
        let cache = SelectorCache::new();
        let secrets = SecretStore::new();
        let ctx = PolicyContext::new(&cache, &secrets);
        let repo = PolicyRepository::new();
        let identity = LabelSet::new();

        repo.regenerate("ep1", &ctx, &[http_rule()], &identity).unwrap();

        let mut broken = http_rule();
        broken.ingress[0].to_ports[0].terminating_tls = Some(SecretRef::new("missing"));
        assert!(repo.regenerate("ep1", &ctx, &[broken], &identity).is_err());

        let current = repo.get("ep1").unwrap();
        assert!(current.is_empty());
        assert!(repo.remove("ep1").is_some());
        assert!(repo.is_empty());
    }

    #[test]
    fn test_older_revision_never_overwrites() {
        let repo = PolicyRepository::new();
        let newer = repo.replace("ep", L4Policy::deny_all(5));
        let kept = repo.replace("ep", L4Policy::deny_all(3));

        assert!(Arc::ptr_eq(&newer, &kept));
        assert_eq!(repo.get("ep").unwrap().revision(), 5);

        // Equal or newer revisions still go through
        repo.replace("ep", L4Policy::deny_all(5));
        assert_eq!(repo.replace("ep", L4Policy::deny_all(6)).revision(), 6);
        assert_eq!(repo.get("ep").unwrap().revision(), 6);
    }
}
