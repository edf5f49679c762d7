//! Stage configuration: YAML file, environment overrides and defaults.
//!
//! ```yaml
//! binder:
//!   kind: jsonl          # memory | jsonl
//!   root: ./data
//! bindings:
//!   input:
//!     destination: input
//!   output:
//!     destination: output
//!     content_type: application/json
//! integration:
//!   not_propagated_headers: bar,contentType
//! ```

use crate::StageConfig;
use binder::BinderSettings;
use propagation::{HeaderList, PolicyError, PropagationPolicy};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stream_core::mime::APPLICATION_JSON;
use thiserror::Error;

/// Names the YAML file read when no explicit path is given.
pub const CONFIG_PATH_ENV: &str = "STREAM_CONFIG_PATH";
/// Comma-separated header names; overrides the file setting.
pub const NOT_PROPAGATED_ENV: &str = "STREAM_NOT_PROPAGATED_HEADERS";

pub const DEFAULT_INPUT: &str = "input";
pub const DEFAULT_OUTPUT: &str = "output";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Root configuration. Every field has a default so minimal files work.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    pub binder: BinderSettings,
    pub bindings: BindingsConfig,
    pub integration: IntegrationConfig,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BindingsConfig {
    pub input: BindingConfig,
    pub output: BindingConfig,
}

/// One side of a stage.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BindingConfig {
    pub destination: Option<String>,
    #[serde(alias = "contentType", alias = "content-type")]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IntegrationConfig {
    #[serde(
        alias = "notPropagatedHeaders",
        alias = "messageHandlerNotPropagatedHeaders",
        deserialize_with = "propagation::header_list_or_default"
    )]
    pub not_propagated_headers: HeaderList,
}

impl StreamConfig {
    /// Parse YAML; blank input yields the defaults.
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn load_from_yaml_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_yaml_str(&content)
    }

    /// Load from `explicit`, else from `$STREAM_CONFIG_PATH`, else defaults;
    /// then apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(explicit, |k| std::env::var(k).ok())
    }

    /// [`StreamConfig::load`] with variables read through `lookup`.
    pub fn load_with<F>(explicit: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_env = lookup(CONFIG_PATH_ENV).filter(|s| !s.trim().is_empty());
        let mut cfg = match (explicit, from_env) {
            (Some(p), _) => Self::load_from_yaml_path(p)?,
            (None, Some(p)) => Self::load_from_yaml_path(p)?,
            (None, None) => Self::default(),
        };
        cfg.apply_overrides(lookup);
        Ok(cfg)
    }

    /// Apply overrides looked up by environment variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(NOT_PROPAGATED_ENV) {
            self.integration.not_propagated_headers = HeaderList::Csv(v);
        }
    }

    pub fn propagation_policy(&self) -> Result<PropagationPolicy, PolicyError> {
        PropagationPolicy::from_header_list(&self.integration.not_propagated_headers)
    }

    /// Explicit stage wiring derived from this configuration.
    pub fn stage_config(&self, name: impl Into<String>) -> Result<StageConfig, ConfigError> {
        let policy = self.propagation_policy()?;
        Ok(StageConfig {
            name: name.into(),
            input: self.bindings.input.destination.clone().unwrap_or_else(|| DEFAULT_INPUT.into()),
            output: self
                .bindings
                .output
                .destination
                .clone()
                .unwrap_or_else(|| DEFAULT_OUTPUT.into()),
            input_content_type: self.bindings.input.content_type.clone(),
            output_content_type: self
                .bindings
                .output
                .content_type
                .clone()
                .unwrap_or_else(|| APPLICATION_JSON.into()),
            policy: Arc::new(policy),
        })
    }
}
