//! Secret references and the resolver the filter builder checks them against

use crate::error::{SecretError, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Reference to TLS material held by the secret store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SecretRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

impl SecretRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl FromStr for SecretRef {
    type Err = ValidationError;

    /// Parses `name` or `namespace/name`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidSecret {
            secret: s.to_string(),
        };
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::namespaced(ns, name))
            }
            Some(_) => Err(invalid()),
            None if !s.is_empty() => Ok(Self::new(s)),
            None => Err(invalid()),
        }
    }
}

/// Key material behind a secret; the policy engine never reads it
#[derive(Clone, Default)]
pub struct SecretMaterial {
    pub certificate: Option<String>,
    pub private_key: Option<String>,
}

impl fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretMaterial")
            .field("certificate", &self.certificate.is_some())
            .field("private_key", &self.private_key.is_some())
            .finish()
    }
}

/// Lookup service for TLS secrets
///
/// Implementations backed by a remote store must bound their own lookups;
/// the engine calls this synchronously while building filters.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, secret: &SecretRef) -> Result<SecretMaterial, SecretError>;
}

/// In-memory secret store
#[derive(Debug, Clone, Default)]
pub struct SecretStore {
    secrets: HashMap<SecretRef, SecretMaterial>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, secret: SecretRef, material: SecretMaterial) {
        self.secrets.insert(secret, material);
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl SecretResolver for SecretStore {
    fn resolve(&self, secret: &SecretRef) -> Result<SecretMaterial, SecretError> {
        let material = self
            .secrets
            .get(secret)
            .ok_or_else(|| SecretError::NotFound(secret.clone()))?;

        if material.certificate.is_none() && material.private_key.is_none() {
            return Err(SecretError::Invalid {
                secret: secret.clone(),
                reason: "neither certificate nor private key present".to_string(),
            });
        }

        Ok(material.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_secret_ref() {
        assert_eq!("cert".parse::<SecretRef>().unwrap(), SecretRef::new("cert"));
        assert_eq!(
            "default/cert".parse::<SecretRef>().unwrap(),
            SecretRef::namespaced("default", "cert")
        );
        assert!("".parse::<SecretRef>().is_err());
        assert!("/cert".parse::<SecretRef>().is_err());
        assert!("a/b/c".parse::<SecretRef>().is_err());
    }

    #[test]
    fn test_store_resolution() {
        let mut store = SecretStore::new();
        store.insert(
            SecretRef::namespaced("default", "cert"),
            SecretMaterial {
                certificate: Some("PEM".to_string()),
                private_key: None,
            },
        );
        store.insert(SecretRef::new("empty"), SecretMaterial::default());

        assert!(store.resolve(&SecretRef::namespaced("default", "cert")).is_ok());
        assert!(matches!(
            store.resolve(&SecretRef::new("cert")),
            Err(SecretError::NotFound(_))
        ));
        assert!(matches!(
            store.resolve(&SecretRef::new("empty")),
            Err(SecretError::Invalid { .. })
        ));
    }
}
