//! Raw configuration document (YAML).
//!
//! ```yaml
//! defaults:
//!   viewport:
//!     lon_range: [90, 140]
//!     lat_range: [-10, 25]
//! presets:
//!   file: ${HOME}/forest-presets.json
//! files:
//!   - label: GA7
//!     pattern: "*ga7*.nc"
//!     directory: ${DIRECTORY}/wcssp
//!     file_type: unified_model
//!     locator: database
//!     database_path: ${DATABASE}
//! ```
//!
//! Every field is optional at this layer so that validation in
//! [`crate::registry`] can report all problems together. Unknown keys are
//! collected and logged, never rejected.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

type UnknownKeys = BTreeMap<String, serde_yaml::Value>;

/// Top-level document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub defaults: Option<RawDefaults>,

    #[serde(default)]
    pub presets: Option<RawPresets>,

    /// Dataset sources, in display order
    #[serde(default)]
    pub files: Vec<RawSource>,

    #[serde(default)]
    pub engine: Option<RawEngine>,

    #[serde(flatten)]
    pub unknown: UnknownKeys,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDefaults {
    #[serde(default)]
    pub viewport: Option<RawViewport>,

    #[serde(flatten)]
    pub unknown: UnknownKeys,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawViewport {
    #[serde(default)]
    pub lon_range: Option<Vec<f64>>,

    #[serde(default)]
    pub lat_range: Option<Vec<f64>>,

    #[serde(flatten)]
    pub unknown: UnknownKeys,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPresets {
    /// Forwarded to the preset manager, never read here
    #[serde(default)]
    pub file: Option<String>,

    #[serde(flatten)]
    pub unknown: UnknownKeys,
}

/// One entry of `files`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawSource {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub locator: Option<String>,
    #[serde(default)]
    pub database_path: Option<String>,

    #[serde(flatten)]
    pub unknown: UnknownKeys,
}

/// Optional `engine` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawEngine {
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub refresh_interval_secs: Option<u64>,

    #[serde(flatten)]
    pub unknown: UnknownKeys,
}

impl RawConfig {
    /// Parse a YAML document. An empty document is an empty configuration.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a YAML file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Every unknown key as a dotted path, e.g. `files[2].colour`.
    pub fn unknown_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        collect(&mut keys, "", &self.unknown);
        if let Some(defaults) = &self.defaults {
            collect(&mut keys, "defaults.", &defaults.unknown);
            if let Some(viewport) = &defaults.viewport {
                collect(&mut keys, "defaults.viewport.", &viewport.unknown);
            }
        }
        if let Some(presets) = &self.presets {
            collect(&mut keys, "presets.", &presets.unknown);
        }
        if let Some(engine) = &self.engine {
            collect(&mut keys, "engine.", &engine.unknown);
        }
        for (i, source) in self.files.iter().enumerate() {
            collect(&mut keys, &format!("files[{i}]."), &source.unknown);
        }
        keys
    }

    /// Log unknown keys at `warn`. They are otherwise ignored.
    pub fn log_unknown_keys(&self) {
        for key in self.unknown_keys() {
            warn!(key = %key, "Ignoring unknown configuration key");
        }
    }
}

fn collect(out: &mut Vec<String>, prefix: &str, unknown: &UnknownKeys) {
    out.extend(unknown.keys().map(|k| format!("{prefix}{k}")));
}

/// Resolution engine settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// How long a successful resolution is served from cache
    pub cache_ttl: Duration,
    /// Sources located at the same time
    pub max_concurrent: usize,
    /// Per-source limit on a single locate call
    pub source_timeout: Duration,
    /// Period of the index refresher
    pub refresh_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            max_concurrent: 4,
            source_timeout: Duration::from_secs(30),
            refresh_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
defaults:
  viewport:
    lon_range: [90, 140]
    lat_range: [-10, 25]
presets:
  file: ${HOME}/forest-presets.json
files:
  - label: GA6
    pattern: "*ga6*.nc"
    directory: ${DIRECTORY}/wcssp
    file_type: unified_model
  - label: GA7
    pattern: "*ga7*.nc"
    directory: ${DIRECTORY}/wcssp
    file_type: unified_model
    locator: database
    database_path: ${DATABASE}
    colour: green
theme: dark
"#;

    #[test]
    fn engine_settings_defaults() {
        let settings = EngineSettings::default();
        assert_eq!(settings.cache_ttl, Duration::from_secs(300));
        assert_eq!(settings.max_concurrent, 4);
        assert_eq!(settings.source_timeout, Duration::from_secs(30));
        assert_eq!(settings.refresh_interval, Duration::from_secs(60));
    }

    #[test]
    fn parses_sample_document() {
        let raw = RawConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(raw.files.len(), 2);
        assert_eq!(raw.files[1].locator.as_deref(), Some("database"));
        assert_eq!(raw.files[1].database_path.as_deref(), Some("${DATABASE}"));
        let viewport = raw.defaults.unwrap().viewport.unwrap();
        assert_eq!(viewport.lon_range, Some(vec![90.0, 140.0]));
        assert_eq!(
            raw.presets.unwrap().file.as_deref(),
            Some("${HOME}/forest-presets.json")
        );
    }

    #[test]
    fn unknown_keys_are_collected_not_rejected() {
        let raw = RawConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(raw.unknown_keys(), vec!["theme", "files[1].colour"]);
    }

    #[test]
    fn empty_document_is_empty_config() {
        let raw = RawConfig::from_yaml_str("   \n").unwrap();
        assert!(raw.files.is_empty());
        assert!(raw.unknown_keys().is_empty());
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let err = RawConfig::from_yaml_str("files: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = RawConfig::from_path(Path::new("/nonexistent/forest.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
