//! Policy document discovery and loading

use super::schema::Config;
use crate::error::{PolicyError, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const DOCUMENT_NAME: &str = "policy.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Default policy document path, from the process environment
    pub fn default_config_path() -> PathBuf {
        Self::config_path_from(|name| env::var(name).ok())
    }

    /// Resolve the document path from an environment lookup
    ///
    /// `$PORTPOLICY_CONFIG` names the file itself; otherwise the file is
    /// `portpolicy/policy.toml` under `$XDG_CONFIG_HOME`, then under
    /// `$HOME/.config`, then the working directory. Empty variables count
    /// as unset.
    pub fn config_path_from(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty()).map(PathBuf::from);

        if let Some(path) = var("PORTPOLICY_CONFIG") {
            return path;
        }

        let config_dir = var("XDG_CONFIG_HOME").or_else(|| var("HOME").map(|home| home.join(".config")));
        match config_dir {
            Some(dir) => dir.join("portpolicy").join(DOCUMENT_NAME),
            None => PathBuf::from(DOCUMENT_NAME),
        }
    }

    /// Load a policy document from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| PolicyError::ConfigLoad {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Config> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }

    /// Load from the default path, or an empty document if there is none
    pub fn load() -> Result<Config> {
        let path = Self::default_config_path();

        if path.exists() {
            Self::load_from_file(&path)
        } else {
            tracing::debug!("Policy file not found at {:?}, using empty policy", path);
            Ok(Config::default())
        }
    }

    /// Explicit path if given (and it must exist), otherwise the default lookup
    pub fn load_or_default(path: Option<PathBuf>) -> Result<Config> {
        match path {
            Some(p) => Self::load_from_file(p),
            None => Self::load(),
        }
    }
}
