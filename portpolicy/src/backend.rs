//! Hand-off of redirect decisions to the proxy backend

use crate::error::{PolicyError, Result};
use crate::filter::L4Filter;
use crate::l7::EnforcementKind;
use crate::policy::{model, L4Policy};
use crate::port::{Direction, PortProtocol};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

/// What the backend needs to program one redirect
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redirect {
    pub direction: Direction,
    pub key: PortProtocol,
    pub kind: EnforcementKind,
    pub parser: String,
    /// Canonical rendering of the filter
    pub rule: String,
}

impl Redirect {
    pub fn from_filter(filter: &L4Filter) -> Result<Self> {
        Ok(Self {
            direction: filter.direction(),
            key: filter.key(),
            kind: filter.enforcement_kind(),
            parser: filter.l7_parser().to_string(),
            rule: model::render_filter(filter)?,
        })
    }
}

/// Redirects for every filter of a policy that needs the proxy, ordered
/// by direction then key
pub fn redirects(policy: &L4Policy) -> Result<Vec<Redirect>> {
    let mut out = Vec::new();
    for direction in [Direction::Ingress, Direction::Egress] {
        for filter in policy.map(direction).sorted_filters() {
            if filter.is_redirect() {
                out.push(Redirect::from_filter(filter)?);
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Proxy configuration sink
///
/// Both operations must be idempotent: sending the same redirect twice, or
/// deleting one that is already gone, is a no-op.
pub trait ProxyBackend: Send + Sync {
    fn upsert_redirect(&self, redirect: &Redirect) -> impl Future<Output = Result<UpsertOutcome>> + Send;

    /// Withdraw the redirect on a key; returns whether one was present
    fn delete_redirect(&self, direction: Direction, key: PortProtocol) -> impl Future<Output = Result<bool>> + Send;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

/// Push a policy's redirects, bounding each backend call by `deadline`
///
/// `previous` is the policy published before this one; every redirect it
/// had that `policy` no longer has is withdrawn after the upserts.
pub async fn publish_redirects<B: ProxyBackend>(
    backend: &B,
    previous: Option<&L4Policy>,
    policy: &L4Policy,
    deadline: Duration,
) -> Result<PublishReport> {
    let mut report = PublishReport::default();

    let current = redirects(policy)?;
    for redirect in &current {
        let outcome = bounded(deadline, redirect.direction, redirect.key, backend.upsert_redirect(redirect)).await?;

        debug!(key = %redirect.key, direction = %redirect.direction, ?outcome, "Upserted redirect");
        match outcome {
            UpsertOutcome::Created => report.created += 1,
            UpsertOutcome::Updated => report.updated += 1,
            UpsertOutcome::Unchanged => report.unchanged += 1,
        }
    }

    let keep: HashSet<(Direction, PortProtocol)> = current.iter().map(|r| (r.direction, r.key)).collect();
    for (direction, key) in previous.map(redirect_keys).unwrap_or_default() {
        if keep.contains(&(direction, key)) {
            continue;
        }
        if bounded(deadline, direction, key, backend.delete_redirect(direction, key)).await? {
            debug!(key = %key, direction = %direction, "Withdrew redirect");
            report.deleted += 1;
        }
    }

    info!(
        revision = policy.revision(),
        created = report.created,
        updated = report.updated,
        unchanged = report.unchanged,
        deleted = report.deleted,
        "Published redirects"
    );
    Ok(report)
}

/// Keys a policy redirects, without rendering anything
fn redirect_keys(policy: &L4Policy) -> Vec<(Direction, PortProtocol)> {
    [Direction::Ingress, Direction::Egress]
        .into_iter()
        .flat_map(|direction| {
            policy
                .map(direction)
                .sorted_filters()
                .into_iter()
                .filter(|f| f.is_redirect())
                .map(move |f| (direction, f.key()))
        })
        .collect()
}

async fn bounded<T>(
    deadline: Duration,
    direction: Direction,
    key: PortProtocol,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(deadline, call)
        .await
        .map_err(|_| PolicyError::BackendTimeout {
            key,
            direction,
            deadline,
        })?
}

/// Backend that records redirects in memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    redirects: Mutex<HashMap<(Direction, PortProtocol), Redirect>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, direction: Direction, key: PortProtocol) -> Option<Redirect> {
        let redirects = self.redirects.lock().unwrap_or_else(PoisonError::into_inner);
        redirects.get(&(direction, key)).cloned()
    }

    pub fn len(&self) -> usize {
        self.redirects.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProxyBackend for MemoryBackend {
    fn upsert_redirect(&self, redirect: &Redirect) -> impl Future<Output = Result<UpsertOutcome>> + Send {
        let outcome = {
            let mut redirects = self.redirects.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = (redirect.direction, redirect.key);
            match redirects.get(&slot) {
                Some(existing) if existing == redirect => UpsertOutcome::Unchanged,
                Some(_) => {
                    redirects.insert(slot, redirect.clone());
                    UpsertOutcome::Updated
                }
                None => {
                    redirects.insert(slot, redirect.clone());
                    UpsertOutcome::Created
                }
            }
        };
        std::future::ready(Ok(outcome))
    }

    fn delete_redirect(&self, direction: Direction, key: PortProtocol) -> impl Future<Output = Result<bool>> + Send {
        let mut redirects = self.redirects.lock().unwrap_or_else(PoisonError::into_inner);
        std::future::ready(Ok(redirects.remove(&(direction, key)).is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::PolicyContext;
    use crate::l7::{HttpRule, L7Rules};
    use crate::policy::resolve_policy;
    use crate::rule::{PeerRule, PortRule, Rule};
    use crate::secret::SecretStore;
    use crate::selector::{LabelSet, PeerSelector, SelectorCache};

    /// Port 80 with the given HTTP paths (a plain L4 allow if none), port 22 L4 only
    fn policy(paths: &[&str]) -> L4Policy {
        let cache = SelectorCache::new();
        let secrets = SecretStore::new();
        let ctx = PolicyContext::new(&cache, &secrets);
        let http = if paths.is_empty() {
            L7Rules::None
        } else {
            L7Rules::http(paths.iter().map(|p| HttpRule::new(*p, "GET")).collect())
        };
        let rule = Rule {
            ingress: vec![PeerRule::allow(
                vec![PeerSelector::wildcard()],
                vec![
                    PortRule::new(vec![PortProtocol::tcp(80)]).with_rules(http),
                    PortRule::new(vec![PortProtocol::tcp(22)]),
                ],
            )],
            ..Default::default()
        };
        resolve_policy(&ctx, &[rule], &LabelSet::new(), 1).unwrap()
    }

    /// Backend that never answers
    struct StuckBackend;

    impl ProxyBackend for StuckBackend {
        fn upsert_redirect(&self, _redirect: &Redirect) -> impl Future<Output = Result<UpsertOutcome>> + Send {
            std::future::pending()
        }

        fn delete_redirect(&self, _direction: Direction, _key: PortProtocol) -> impl Future<Output = Result<bool>> + Send {
            std::future::pending()
        }
    }

    /// Backend that refuses everything
    struct RejectingBackend;

    impl ProxyBackend for RejectingBackend {
        fn upsert_redirect(&self, redirect: &Redirect) -> impl Future<Output = Result<UpsertOutcome>> + Send {
            std::future::ready(Err(PolicyError::Backend {
                key: redirect.key,
                direction: redirect.direction,
                reason: "listener not ready".to_string(),
            }))
        }

        fn delete_redirect(&self, direction: Direction, key: PortProtocol) -> impl Future<Output = Result<bool>> + Send {
            std::future::ready(Err(PolicyError::Backend {
                key,
                direction,
                reason: "listener not ready".to_string(),
            }))
        }
    }

    #[test]
    fn test_only_redirecting_filters_are_sent() {
        let redirects = redirects(&policy(&["/"])).unwrap();
        assert_eq!(redirects.len(), 1);
        assert_eq!(redirects[0].key, PortProtocol::tcp(80));
        assert_eq!(redirects[0].kind, EnforcementKind::GenericRedirect);
        assert_eq!(redirects[0].parser, "http");
    }

    #[tokio::test]
    async fn test_publish_is_idempotent() {
        let backend = MemoryBackend::new();
        let deadline = Duration::from_secs(1);

        let first = policy(&["/"]);
        let report = publish_redirects(&backend, None, &first, deadline).await.unwrap();
        assert_eq!(report.created, 1);

        let report = publish_redirects(&backend, Some(&first), &policy(&["/"]), deadline).await.unwrap();
        assert_eq!(
            report,
            PublishReport {
                unchanged: 1,
                ..Default::default()
            }
        );

        let report = publish_redirects(&backend, Some(&first), &policy(&["/", "/bar"]), deadline)
            .await
            .unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(backend.len(), 1);
        assert!(backend.get(Direction::Ingress, PortProtocol::tcp(80)).unwrap().rule.contains("/bar"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_times_out() {
        let err = publish_redirects(&StuckBackend, None, &policy(&["/"]), Duration::from_millis(50))
            .await
            .unwrap_err();
        match err {
            PolicyError::BackendTimeout { key, direction, .. } => {
                assert_eq!(key, PortProtocol::tcp(80));
                assert_eq!(direction, Direction::Ingress);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let err = publish_redirects(&RejectingBackend, None, &policy(&["/"]), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::Backend { .. }));
    }

    #[tokio::test]
    async fn test_dropped_redirects_are_withdrawn() {
        let backend = MemoryBackend::new();
        let deadline = Duration::from_secs(1);

        let http = policy(&["/"]);
        publish_redirects(&backend, None, &http, deadline).await.unwrap();
        assert!(backend.get(Direction::Ingress, PortProtocol::tcp(80)).is_some());

        // Same port, now a plain L4 allow
        let l4 = policy(&[]);
        assert!(!l4.has_generic_redirect());
        let report = publish_redirects(&backend, Some(&http), &l4, deadline).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert!(backend.get(Direction::Ingress, PortProtocol::tcp(80)).is_none());
        assert!(backend.is_empty());

        // Withdrawing again finds nothing to delete
        let report = publish_redirects(&backend, Some(&http), &l4, deadline).await.unwrap();
        assert_eq!(report, PublishReport::default());
    }
}
