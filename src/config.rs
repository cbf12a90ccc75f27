//! Pass configuration.
//!
//! Defaults are tuned for request-time compilation. Embedders that keep
//! their settings on disk can load the same structure from TOML.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default bound on expression nesting and merge recursion.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Tunables for a single path-merge compilation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MergeConfig {
    /// Maximum nesting depth for the expression walk and merge recursion.
    pub max_depth: usize,
    /// Run the boolean minimizer over intersected disjunctions.
    pub minimize_disjunctions: bool,
    /// Factor edges shared by every implicant out of a minimized disjunction.
    pub factor_common_edges: bool,
    /// Emit the explain tree at `debug!` once the pass completes.
    pub dump_graph: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            minimize_disjunctions: true,
            factor_common_edges: true,
            dump_graph: false,
        }
    }
}

impl MergeConfig {
    /// Tight recursion bound for untrusted or generated queries.
    pub fn strict() -> Self {
        Self {
            max_depth: 64,
            ..Self::default()
        }
    }

    /// Keeps disjunctions in their minimized-but-unfactored shape and dumps
    /// the resulting graph.
    pub fn debugging() -> Self {
        Self {
            factor_common_edges: false,
            dump_graph: true,
            ..Self::default()
        }
    }

    /// Parses a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: MergeConfig =
            toml::from_str(contents).map_err(|source| ConfigError::Parse { path: None, source })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: MergeConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration back to TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid {
                key: "max_depth",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }
}

/// Errors raised while loading a [`MergeConfig`].
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config{}: {source}", .path.as_ref().map(|p| format!(" {}", p.display())).unwrap_or_default())]
    Parse {
        path: Option<PathBuf>,
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {source}")]
    Serialize { source: toml::ser::Error },
    #[error("config key '{key}' {reason}")]
    Invalid {
        key: &'static str,
        reason: &'static str,
    },
}
