//! L4/L7 policy filter engine
//!
//! Turns source policy rules into per-port/protocol filters for one
//! identity, merges them per direction, and projects the result into a
//! deterministic form plus the redirect decisions a proxy backend needs.

pub mod backend;
pub mod config;
pub mod error;
pub mod filter;
pub mod l7;
pub mod policy;
pub mod port;
pub mod repository;
pub mod rule;
pub mod secret;
pub mod selector;

// Re-export commonly used types
pub use backend::{publish_redirects, MemoryBackend, ProxyBackend, PublishReport, Redirect, UpsertOutcome};
pub use config::{Config, ConfigLoader, ConfigValidator};
pub use error::{L7Conflict, PolicyError, Result, SecretError, ValidationError};
pub use filter::{build_filter, FilterInput, L4Filter, PerSelectorPolicy, PolicyContext};
pub use l7::{EnforcementKind, HttpRule, L7Parser, L7Rules, NamedRule, TlsContext, TlsSide};
pub use policy::{resolve_policy, L4Policy, L4PolicyMap, L4PolicyModel, PolicyRule};
pub use port::{Direction, PortProtocol, Protocol};
pub use repository::PolicyRepository;
pub use rule::{PeerRule, PortRule, Rule};
pub use secret::{SecretMaterial, SecretRef, SecretResolver, SecretStore};
pub use selector::{CachedSelector, EndpointSelector, LabelSet, PeerSelector, SelectorCache};
