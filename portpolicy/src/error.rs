//! Error types for policy computation

use crate::l7::{L7Parser, TlsSide};
use crate::port::{Direction, PortProtocol, Protocol};
use crate::secret::SecretRef;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PolicyError>;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Empty peer selector set for {key} ({direction})")]
    InvalidSelectorSet { key: PortProtocol, direction: Direction },

    #[error("TLS secret {secret} does not resolve: {source}")]
    UnresolvedSecret {
        secret: SecretRef,
        source: SecretError,
    },

    #[error("Conflicting L7 configuration on {key}: {conflict}")]
    ConflictingL7Parser { key: PortProtocol, conflict: L7Conflict },

    #[error("Malformed content rules: {0}")]
    MalformedContentRules(String),

    #[error("Port 0/{protocol} cannot coexist with redirecting port {port}/{protocol}")]
    WildcardPortConflict { protocol: Protocol, port: u16 },

    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to load config from {path}: {source}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to render policy model: {0}")]
    Render(#[from] serde_json::Error),

    #[error("Proxy backend rejected {key} ({direction}): {reason}")]
    Backend {
        key: PortProtocol,
        direction: Direction,
        reason: String,
    },

    #[error("Proxy backend did not answer for {key} ({direction}) within {deadline:?}")]
    BackendTimeout {
        key: PortProtocol,
        direction: Direction,
        deadline: Duration,
    },
}

/// Which identity two rule sets disagreed on when merged onto one port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum L7Conflict {
    Parser {
        existing: L7Parser,
        incoming: L7Parser,
    },
    TlsSecret {
        selector: String,
        side: TlsSide,
        existing: SecretRef,
        incoming: SecretRef,
    },
}

impl fmt::Display for L7Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            L7Conflict::Parser { existing, incoming } => {
                write!(f, "parser {} conflicts with {}", existing, incoming)
            }
            L7Conflict::TlsSecret {
                selector,
                side,
                existing,
                incoming,
            } => write!(
                f,
                "{} TLS secret {} conflicts with {} for selector {}",
                side, existing, incoming, selector
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret {0} not found")]
    NotFound(SecretRef),

    #[error("secret {secret} has no usable material: {reason}")]
    Invalid { secret: SecretRef, reason: String },
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port: {port}")]
    InvalidPort { port: String },

    #[error("Invalid protocol: {protocol}")]
    InvalidProtocol { protocol: String },

    #[error("Invalid port/protocol key: {key}")]
    InvalidKey { key: String },

    #[error("Invalid label: {label}")]
    InvalidLabel { label: String },

    #[error("Invalid CIDR notation: {cidr}")]
    InvalidCidr { cidr: String },

    #[error("Invalid selector requirement: {reason}")]
    InvalidRequirement { reason: String },

    #[error("Invalid secret reference: {secret}")]
    InvalidSecret { secret: String },

    #[error("Duplicate secret: {secret}")]
    DuplicateSecret { secret: String },

    #[error("Unknown secret reference {secret} in rule {rule}")]
    UnknownSecret { secret: String, rule: String },

    #[error("Unsupported config version {version} (expected {expected})")]
    UnsupportedVersion { version: String, expected: String },

    #[error("Invalid rule {rule}: {reason}")]
    InvalidRule { rule: String, reason: String },
}
