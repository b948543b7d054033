//! Error types for the locator system

use std::fmt::Write as _;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors from `${NAME}` template expansion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("missing variable '{name}'")]
    MissingVariable { name: String },

    #[error("unterminated '${{' at byte {position}")]
    Unterminated { position: usize },

    #[error("invalid variable name '{name}' at byte {position}")]
    InvalidName { name: String, position: usize },
}

/// Invalid glob pattern.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid pattern '{pattern}': {message}")]
pub struct PatternError {
    pub pattern: String,
    pub message: String,
}

/// A single problem found while validating a configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigIssue {
    #[error("files[{index}]: missing '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("source '{label}': '{field}' must not be empty")]
    EmptyField { label: String, field: &'static str },

    #[error("duplicate label '{label}' (files[{first}] and files[{duplicate}])")]
    DuplicateLabel {
        label: String,
        first: usize,
        duplicate: usize,
    },

    #[error("source '{label}': locator 'database' requires 'database_path'")]
    MissingDatabasePath { label: String },

    #[error("source '{label}': unrecognized file_type '{file_type}'")]
    UnknownFileType { label: String, file_type: String },

    #[error("source '{label}': unrecognized locator '{locator}'")]
    UnknownLocator { label: String, locator: String },

    #[error("source '{label}': {error}")]
    InvalidPattern { label: String, error: PatternError },

    #[error("{owner}: '{field}' references undefined variable '{name}'")]
    MissingVariable {
        owner: String,
        field: &'static str,
        name: String,
    },

    #[error("{owner}: '{field}': {error}")]
    Template {
        owner: String,
        field: &'static str,
        error: TemplateError,
    },

    #[error("defaults.viewport.{axis}: {reason}")]
    InvalidViewport { axis: &'static str, reason: String },

    #[error("engine.{field}: {reason}")]
    InvalidEngineSetting { field: &'static str, reason: String },
}

/// Configuration errors. Validation problems are aggregated, never reported one at a time.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{}", format_issues(.0))]
    Invalid(Vec<ConfigIssue>),
}

impl ConfigError {
    /// Validation issues, empty for read and parse failures.
    pub fn issues(&self) -> &[ConfigIssue] {
        match self {
            ConfigError::Invalid(issues) => issues,
            _ => &[],
        }
    }
}

fn format_issues(issues: &[ConfigIssue]) -> String {
    let mut out = format!("invalid configuration ({} problem(s))", issues.len());
    for issue in issues {
        let _ = write!(out, "\n  - {}", issue);
    }
    out
}

/// Per-source failures of a locator strategy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    #[error("directory unavailable: {}: {reason}", .path.display())]
    DirectoryUnavailable { path: PathBuf, reason: String },

    #[error("index unavailable: {}: {reason}", .path.display())]
    IndexUnavailable { path: PathBuf, reason: String },

    #[error("index query failed: {0}")]
    QueryError(String),

    #[error("locate cancelled")]
    Cancelled,

    #[error("locate task interrupted: {0}")]
    Interrupted(String),
}

/// Errors from the SQLite file index.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("index not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("directory has never been synced into the index: {}", .0.display())]
    NotSynced(PathBuf),

    #[error("directory walk failed: {0}")]
    Walk(#[from] LocateError),

    #[error("query translation failed: {0}")]
    Translation(String),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),
}

/// Failure to resolve one source. Never affects other sources.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("unknown source '{0}'")]
    UnknownSource(String),

    #[error("source '{label}': {error}")]
    Template { label: String, error: TemplateError },

    #[error("source '{label}': {error}")]
    Locate { label: String, error: LocateError },

    #[error("source '{label}': timed out after {after:?}")]
    Timeout { label: String, after: Duration },

    #[error("source '{label}': worker failed: {message}")]
    Worker { label: String, message: String },
}

impl ResolutionError {
    /// Label of the failing source.
    pub fn label(&self) -> &str {
        match self {
            ResolutionError::UnknownSource(label) => label,
            ResolutionError::Template { label, .. }
            | ResolutionError::Locate { label, .. }
            | ResolutionError::Timeout { label, .. }
            | ResolutionError::Worker { label, .. } => label,
        }
    }

    /// Worth retrying on the next resolution cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            ResolutionError::UnknownSource(_) | ResolutionError::Template { .. } => false,
            ResolutionError::Locate { error, .. } => !matches!(error, LocateError::QueryError(_)),
            ResolutionError::Timeout { .. } | ResolutionError::Worker { .. } => true,
        }
    }
}

/// Errors handing an entry to a format reader.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("no reader registered for file_type '{0}'")]
    NoReader(String),

    #[error("{file_type} reader failed: {source}")]
    Reader {
        file_type: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ResolutionError>;
