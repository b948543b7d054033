//! Source registry: the validated, immutable view of a configuration.

use crate::config::{EngineSettings, RawConfig, RawEngine, RawSource, RawViewport};
use crate::error::{ConfigError, ConfigIssue, TemplateError};
use crate::patterns::FilenameMatcher;
use crate::template::{self, Environment};
use crate::types::{FileType, FileTypes, LocatorKind, SourceDefinition, Viewport};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Validated dataset sources in declaration order.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: Vec<SourceDefinition>,
    matchers: Vec<FilenameMatcher>,
    by_label: HashMap<String, usize>,
    viewport: Viewport,
    presets_file: Option<PathBuf>,
    environment: Environment,
    settings: EngineSettings,
}

impl SourceRegistry {
    /// Validate `raw` against an environment snapshot and the recognized file types.
    ///
    /// All problems are collected; the error lists every one of them.
    pub fn load(
        raw: &RawConfig,
        environment: Environment,
        file_types: &FileTypes,
    ) -> Result<Self, ConfigError> {
        raw.log_unknown_keys();

        let mut issues = Vec::new();
        let mut sources = Vec::with_capacity(raw.files.len());
        let mut matchers = Vec::with_capacity(raw.files.len());
        let mut by_label: HashMap<String, usize> = HashMap::new();
        // label -> index in `files` of its first declaration
        let mut seen: HashMap<String, usize> = HashMap::new();

        for (index, entry) in raw.files.iter().enumerate() {
            let before = issues.len();
            let Some(label) = validate_label(index, entry, &mut issues) else {
                // Still report the rest of the entry, owned by its position
                let owner = format!("files[{index}]");
                validate_source(&owner, index, entry, &environment, file_types, &mut issues);
                continue;
            };

            match seen.get(&label) {
                Some(&first) => issues.push(ConfigIssue::DuplicateLabel {
                    label: label.clone(),
                    first,
                    duplicate: index,
                }),
                None => {
                    seen.insert(label.clone(), index);
                }
            }

            let candidate =
                validate_source(&label, index, entry, &environment, file_types, &mut issues);
            if issues.len() == before {
                if let Some((definition, matcher)) = candidate {
                    by_label.insert(label, sources.len());
                    sources.push(definition);
                    matchers.push(matcher);
                }
            }
        }

        let viewport = validate_viewport(
            raw.defaults.as_ref().and_then(|d| d.viewport.as_ref()),
            &mut issues,
        );

        let presets_file = raw
            .presets
            .as_ref()
            .and_then(|p| p.file.as_deref())
            .and_then(|file| {
                expand_checked("presets", "file", file, &environment, &mut issues).map(PathBuf::from)
            });

        let settings = validate_engine(raw.engine.as_ref(), &mut issues);

        if !issues.is_empty() {
            return Err(ConfigError::Invalid(issues));
        }

        info!(
            sources = sources.len(),
            variables = environment.len(),
            "Source registry loaded"
        );

        Ok(Self {
            sources,
            matchers,
            by_label,
            viewport,
            presets_file,
            environment,
            settings,
        })
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(
        yaml: &str,
        environment: Environment,
        file_types: &FileTypes,
    ) -> Result<Self, ConfigError> {
        Self::load(&RawConfig::from_yaml_str(yaml)?, environment, file_types)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_path(
        path: &Path,
        environment: Environment,
        file_types: &FileTypes,
    ) -> Result<Self, ConfigError> {
        let registry = Self::load(&RawConfig::from_path(path)?, environment, file_types)?;
        debug!(path = %path.display(), "Configuration read");
        Ok(registry)
    }

    /// Sources in declaration order.
    pub fn sources(&self) -> &[SourceDefinition] {
        &self.sources
    }

    pub fn source(&self, label: &str) -> Option<&SourceDefinition> {
        self.by_label.get(label).map(|&i| &self.sources[i])
    }

    /// Compiled pattern for a source.
    pub fn matcher(&self, label: &str) -> Option<&FilenameMatcher> {
        self.by_label.get(label).map(|&i| &self.matchers[i])
    }

    /// Labels in declaration order.
    pub fn labels(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.label.clone()).collect()
    }

    pub fn default_viewport(&self) -> Viewport {
        self.viewport
    }

    /// Expanded `presets.file`, if configured.
    pub fn presets_file(&self) -> Option<&Path> {
        self.presets_file.as_deref()
    }

    /// The snapshot templates are expanded against.
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn engine_settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

fn validate_label(index: usize, entry: &RawSource, issues: &mut Vec<ConfigIssue>) -> Option<String> {
    match entry.label.as_deref() {
        None => {
            issues.push(ConfigIssue::MissingField {
                index,
                field: "label",
            });
            None
        }
        Some(label) if label.trim().is_empty() => {
            issues.push(ConfigIssue::EmptyField {
                label: format!("files[{index}]"),
                field: "label",
            });
            None
        }
        Some(label) => Some(label.to_string()),
    }
}

fn validate_source(
    label: &str,
    index: usize,
    entry: &RawSource,
    environment: &Environment,
    file_types: &FileTypes,
    issues: &mut Vec<ConfigIssue>,
) -> Option<(SourceDefinition, FilenameMatcher)> {
    let pattern = required(label, index, "pattern", entry.pattern.as_deref(), issues);
    let matcher = pattern.and_then(|p| match FilenameMatcher::compile(p) {
        Ok(m) => Some(m),
        Err(error) => {
            issues.push(ConfigIssue::InvalidPattern {
                label: label.to_string(),
                error,
            });
            None
        }
    });

    let directory = required(label, index, "directory", entry.directory.as_deref(), issues);
    if let Some(directory) = directory {
        expand_checked(label, "directory", directory, environment, issues);
    }

    let file_type = match entry.file_type.as_deref() {
        None => {
            issues.push(ConfigIssue::MissingField {
                index,
                field: "file_type",
            });
            None
        }
        Some(tag) if !file_types.contains(tag) => {
            issues.push(ConfigIssue::UnknownFileType {
                label: label.to_string(),
                file_type: tag.to_string(),
            });
            None
        }
        Some(tag) => Some(FileType::new(tag)),
    };

    let locator = match entry.locator.as_deref() {
        None => Some(LocatorKind::Directory),
        Some(value) => {
            let parsed = LocatorKind::parse(value);
            if parsed.is_none() {
                issues.push(ConfigIssue::UnknownLocator {
                    label: label.to_string(),
                    locator: value.to_string(),
                });
            }
            parsed
        }
    };

    let database_path = match (locator, entry.database_path.as_deref()) {
        (Some(LocatorKind::Database), None) => {
            issues.push(ConfigIssue::MissingDatabasePath {
                label: label.to_string(),
            });
            None
        }
        (Some(LocatorKind::Database), Some(path)) if path.trim().is_empty() => {
            issues.push(ConfigIssue::MissingDatabasePath {
                label: label.to_string(),
            });
            None
        }
        (Some(LocatorKind::Database), Some(path)) => {
            expand_checked(label, "database_path", path, environment, issues);
            Some(path.to_string())
        }
        (_, Some(_)) => {
            debug!(label, "database_path ignored for directory locator");
            None
        }
        (_, None) => None,
    };

    Some((
        SourceDefinition {
            label: label.to_string(),
            pattern: pattern?.to_string(),
            directory_template: directory?.to_string(),
            file_type: file_type?,
            locator: locator?,
            database_path_template: database_path,
        },
        matcher?,
    ))
}

fn required<'a>(
    label: &str,
    index: usize,
    field: &'static str,
    value: Option<&'a str>,
    issues: &mut Vec<ConfigIssue>,
) -> Option<&'a str> {
    match value {
        None => {
            issues.push(ConfigIssue::MissingField { index, field });
            None
        }
        Some(v) if v.trim().is_empty() => {
            issues.push(ConfigIssue::EmptyField {
                label: label.to_string(),
                field,
            });
            None
        }
        Some(v) => Some(v),
    }
}

/// Expand a template, reporting every missing variable (not just the first).
fn expand_checked(
    owner: &str,
    field: &'static str,
    template: &str,
    environment: &Environment,
    issues: &mut Vec<ConfigIssue>,
) -> Option<String> {
    match template::missing_variables(template, environment) {
        Err(error) => {
            issues.push(ConfigIssue::Template {
                owner: owner.to_string(),
                field,
                error,
            });
            None
        }
        Ok(missing) if !missing.is_empty() => {
            issues.extend(missing.into_iter().map(|name| ConfigIssue::MissingVariable {
                owner: owner.to_string(),
                field,
                name,
            }));
            None
        }
        Ok(_) => match template::expand(template, environment) {
            Ok(expanded) => Some(expanded),
            Err(error) => {
                issues.push(ConfigIssue::Template {
                    owner: owner.to_string(),
                    field,
                    error,
                });
                None
            }
        },
    }
}

fn validate_viewport(raw: Option<&RawViewport>, issues: &mut Vec<ConfigIssue>) -> Viewport {
    let defaults = Viewport::default();
    let Some(raw) = raw else {
        return defaults;
    };
    Viewport {
        lon_range: validate_range("lon_range", raw.lon_range.as_deref(), None, issues)
            .unwrap_or(defaults.lon_range),
        lat_range: validate_range("lat_range", raw.lat_range.as_deref(), Some(90.0), issues)
            .unwrap_or(defaults.lat_range),
    }
}

fn validate_range(
    axis: &'static str,
    values: Option<&[f64]>,
    bound: Option<f64>,
    issues: &mut Vec<ConfigIssue>,
) -> Option<[f64; 2]> {
    let values = values?;
    let mut fail = |reason: String| {
        issues.push(ConfigIssue::InvalidViewport { axis, reason });
        None
    };

    let &[lo, hi] = values else {
        return fail(format!("expected 2 values, got {}", values.len()));
    };
    if !lo.is_finite() || !hi.is_finite() {
        return fail("values must be finite".to_string());
    }
    if lo > hi {
        return fail(format!("lower bound {lo} exceeds upper bound {hi}"));
    }
    if let Some(bound) = bound {
        if lo < -bound || hi > bound {
            return fail(format!("values must lie within [-{bound}, {bound}]"));
        }
    }
    Some([lo, hi])
}

fn validate_engine(raw: Option<&RawEngine>, issues: &mut Vec<ConfigIssue>) -> EngineSettings {
    let mut settings = EngineSettings::default();
    let Some(raw) = raw else {
        return settings;
    };

    if let Some(secs) = raw.cache_ttl_secs {
        settings.cache_ttl = Duration::from_secs(secs);
    }
    match raw.max_concurrent {
        Some(0) => issues.push(ConfigIssue::InvalidEngineSetting {
            field: "max_concurrent",
            reason: "must be at least 1".to_string(),
        }),
        Some(n) => settings.max_concurrent = n,
        None => {}
    }
    match raw.timeout_secs {
        Some(0) => issues.push(ConfigIssue::InvalidEngineSetting {
            field: "timeout_secs",
            reason: "must be at least 1".to_string(),
        }),
        Some(secs) => settings.source_timeout = Duration::from_secs(secs),
        None => {}
    }
    match raw.refresh_interval_secs {
        Some(0) => issues.push(ConfigIssue::InvalidEngineSetting {
            field: "refresh_interval_secs",
            reason: "must be at least 1".to_string(),
        }),
        Some(secs) => settings.refresh_interval = Duration::from_secs(secs),
        None => {}
    }
    settings
}

/// Expand a source's directory template.
pub fn expand_directory(
    source: &SourceDefinition,
    environment: &Environment,
) -> Result<PathBuf, TemplateError> {
    template::expand(&source.directory_template, environment).map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        Environment::new()
            .with("DIRECTORY", "/data")
            .with("DATABASE", "/idx.db")
    }

    fn load(yaml: &str) -> Result<SourceRegistry, ConfigError> {
        SourceRegistry::from_yaml_str(yaml, env(), &FileTypes::builtin())
    }

    const VALID: &str = r#"
defaults:
  viewport:
    lon_range: [90, 140]
    lat_range: [-10, 25]
presets:
  file: ${DIRECTORY}/forest-presets.json
files:
  - label: RDT
    pattern: "*.json"
    directory: ${DIRECTORY}/rdt
    file_type: rdt
  - label: EIDA50
    pattern: "EIDA50*.nc"
    directory: ${DIRECTORY}/eida50
    file_type: eida50
    locator: file_system
  - label: GA7
    pattern: "*ga7*.nc"
    directory: ${DIRECTORY}/wcssp
    file_type: unified_model
    locator: database
    database_path: ${DATABASE}
"#;

    #[test]
    fn preserves_declaration_order() {
        let registry = load(VALID).unwrap();
        assert_eq!(registry.labels(), vec!["RDT", "EIDA50", "GA7"]);
        assert_eq!(registry.len(), 3);

        let ga7 = registry.source("GA7").unwrap();
        assert_eq!(ga7.locator, LocatorKind::Database);
        assert_eq!(ga7.database_path_template.as_deref(), Some("${DATABASE}"));
        assert_eq!(registry.source("EIDA50").unwrap().locator, LocatorKind::Directory);
        assert_eq!(registry.matcher("GA7").unwrap().pattern(), "*ga7*.nc");
    }

    #[test]
    fn exposes_viewport_and_presets() {
        let registry = load(VALID).unwrap();
        let viewport = registry.default_viewport();
        assert_eq!(viewport.lon_range, [90.0, 140.0]);
        assert_eq!(viewport.lat_range, [-10.0, 25.0]);
        assert_eq!(
            registry.presets_file(),
            Some(Path::new("/data/forest-presets.json"))
        );
    }

    #[test]
    fn duplicate_label_is_rejected() {
        let err = load(
            r#"
files:
  - {label: A, pattern: "*.nc", directory: /a, file_type: rdt}
  - {label: A, pattern: "*.nc", directory: /b, file_type: rdt}
"#,
        )
        .unwrap_err();
        assert_eq!(
            err.issues(),
            &[ConfigIssue::DuplicateLabel {
                label: "A".to_string(),
                first: 0,
                duplicate: 1
            }]
        );
    }

    #[test]
    fn database_locator_requires_database_path() {
        let err = load(
            r#"
files:
  - {label: GA7, pattern: "*ga7*.nc", directory: /a, file_type: unified_model, locator: database}
"#,
        )
        .unwrap_err();
        assert_eq!(
            err.issues(),
            &[ConfigIssue::MissingDatabasePath {
                label: "GA7".to_string()
            }]
        );
    }

    #[test]
    fn reports_all_problems_together() {
        let err = load(
            r#"
files:
  - {label: A, pattern: "", directory: "${NOWHERE}/x", file_type: grib}
  - {pattern: "*.nc", directory: /b, file_type: rdt}
  - {label: C, pattern: "*.nc", directory: /c, file_type: rdt, locator: ftp}
defaults:
  viewport:
    lon_range: [10, 0]
"#,
        )
        .unwrap_err();

        let issues = err.issues();
        assert!(issues.contains(&ConfigIssue::EmptyField {
            label: "A".to_string(),
            field: "pattern"
        }));
        assert!(issues.contains(&ConfigIssue::MissingVariable {
            owner: "A".to_string(),
            field: "directory",
            name: "NOWHERE".to_string()
        }));
        assert!(issues.contains(&ConfigIssue::UnknownFileType {
            label: "A".to_string(),
            file_type: "grib".to_string()
        }));
        assert!(issues.contains(&ConfigIssue::MissingField {
            index: 1,
            field: "label"
        }));
        assert!(issues.contains(&ConfigIssue::UnknownLocator {
            label: "C".to_string(),
            locator: "ftp".to_string()
        }));
        assert!(issues
            .iter()
            .any(|i| matches!(i, ConfigIssue::InvalidViewport { axis: "lon_range", .. })));
        assert_eq!(issues.len(), 6);
    }

    #[test]
    fn unlabelled_entry_is_still_validated() {
        let err = load(
            r#"
files:
  - {pattern: "*.nc", directory: "${NOWHERE}", file_type: grib}
"#,
        )
        .unwrap_err();
        assert_eq!(
            err.issues(),
            &[
                ConfigIssue::MissingField {
                    index: 0,
                    field: "label"
                },
                ConfigIssue::MissingVariable {
                    owner: "files[0]".to_string(),
                    field: "directory",
                    name: "NOWHERE".to_string()
                },
                ConfigIssue::UnknownFileType {
                    label: "files[0]".to_string(),
                    file_type: "grib".to_string()
                },
            ]
        );
    }

    #[test]
    fn missing_database_variable_is_a_config_error() {
        let err = SourceRegistry::from_yaml_str(
            r#"
files:
  - {label: GA7, pattern: "*.nc", directory: /a, file_type: rdt, locator: database, database_path: "${DATABASE}"}
"#,
            Environment::new(),
            &FileTypes::builtin(),
        )
        .unwrap_err();
        assert_eq!(
            err.issues(),
            &[ConfigIssue::MissingVariable {
                owner: "GA7".to_string(),
                field: "database_path",
                name: "DATABASE".to_string()
            }]
        );
    }

    #[test]
    fn latitude_must_be_on_the_globe() {
        let err = load(
            r#"
defaults:
  viewport:
    lat_range: [-100, 0]
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err.issues(),
            [ConfigIssue::InvalidViewport { axis: "lat_range", .. }]
        ));
    }

    #[test]
    fn defaults_when_sections_absent() {
        let registry = load("files: []").unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.default_viewport(), Viewport::default());
        assert_eq!(registry.presets_file(), None);
        assert_eq!(registry.engine_settings(), &EngineSettings::default());
    }

    #[test]
    fn engine_section_overrides_defaults() {
        let registry = load(
            r#"
engine:
  cache_ttl_secs: 10
  max_concurrent: 2
  timeout_secs: 5
"#,
        )
        .unwrap();
        let settings = registry.engine_settings();
        assert_eq!(settings.cache_ttl, Duration::from_secs(10));
        assert_eq!(settings.max_concurrent, 2);
        assert_eq!(settings.source_timeout, Duration::from_secs(5));

        let err = load("engine: {max_concurrent: 0}").unwrap_err();
        assert_eq!(err.issues().len(), 1);
    }

    #[test]
    fn extra_file_types_can_be_registered() {
        let yaml = r#"
files:
  - {label: IMERG, pattern: "3B-HHR*.HDF5", directory: /gpm, file_type: gpm_imerg}
"#;
        assert!(load(yaml).is_err());

        let mut types = FileTypes::builtin();
        types.register("gpm_imerg");
        let registry = SourceRegistry::from_yaml_str(yaml, env(), &types).unwrap();
        assert_eq!(registry.sources()[0].file_type.as_str(), "gpm_imerg");
    }

    #[test]
    fn expands_directory_against_snapshot() {
        let registry = load(VALID).unwrap();
        let ga7 = registry.source("GA7").unwrap();
        assert_eq!(
            expand_directory(ga7, registry.environment()).unwrap(),
            PathBuf::from("/data/wcssp")
        );
    }
}
