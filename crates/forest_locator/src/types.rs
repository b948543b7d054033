//! Core types for dataset sources and resolved files

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

// ============================================================================
// File Types
// ============================================================================

/// Tag naming the reader responsible for a source's files.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileType(String);

impl FileType {
    pub const UNIFIED_MODEL: &'static str = "unified_model";
    pub const EIDA50: &'static str = "eida50";
    pub const RDT: &'static str = "rdt";

    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileType {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for FileType {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

/// The set of file_type tags a configuration may use.
///
/// Seeded at startup and extended by registering readers; the loader rejects
/// any tag outside the set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTypes {
    tags: BTreeSet<FileType>,
}

impl FileTypes {
    pub fn empty() -> Self {
        Self::default()
    }

    /// `unified_model`, `eida50` and `rdt`.
    pub fn builtin() -> Self {
        let mut types = Self::empty();
        for tag in [FileType::UNIFIED_MODEL, FileType::EIDA50, FileType::RDT] {
            types.register(tag);
        }
        types
    }

    /// Add a tag. Returns false if it was already known.
    pub fn register(&mut self, tag: impl Into<FileType>) -> bool {
        self.tags.insert(tag.into())
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.as_str() == tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileType> {
        self.tags.iter()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

// ============================================================================
// Source Types
// ============================================================================

/// How a source's files are found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorKind {
    /// Scan the directory on every resolution
    Directory,
    /// Query a SQLite file index
    Database,
}

impl LocatorKind {
    /// Parse a configuration value. `file_system` is an alias of `directory`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "directory" | "file_system" => Some(LocatorKind::Directory),
            "database" => Some(LocatorKind::Database),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LocatorKind::Directory => "directory",
            LocatorKind::Database => "database",
        }
    }
}

impl fmt::Display for LocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated dataset source. Templates are kept unexpanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDefinition {
    /// Unique display key
    pub label: String,
    /// Case-sensitive glob (e.g. "*ga7*.nc", "EIDA50*.nc")
    pub pattern: String,
    /// Directory, may contain `${VAR}`
    pub directory_template: String,
    pub file_type: FileType,
    pub locator: LocatorKind,
    /// Index path, present whenever `locator` is `Database`
    pub database_path_template: Option<String>,
}

// ============================================================================
// Viewport
// ============================================================================

/// Initial map extent in degrees. Both ranges are closed and ordered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub lon_range: [f64; 2],
    pub lat_range: [f64; 2],
}

impl Viewport {
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        (self.lon_range[0]..=self.lon_range[1]).contains(&lon)
            && (self.lat_range[0]..=self.lat_range[1]).contains(&lat)
    }
}

impl Default for Viewport {
    /// The whole globe.
    fn default() -> Self {
        Self {
            lon_range: [-180.0, 180.0],
            lat_range: [-90.0, 90.0],
        }
    }
}

// ============================================================================
// Resolved Files
// ============================================================================

/// Where a resolved file lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileLocation {
    /// Found by scanning a directory
    Path { path: PathBuf },
    /// Found in a file index
    Record { id: i64, path: PathBuf },
}

impl FileLocation {
    pub fn path(&self) -> &Path {
        match self {
            FileLocation::Path { path } | FileLocation::Record { path, .. } => path,
        }
    }

    pub fn record_id(&self) -> Option<i64> {
        match self {
            FileLocation::Record { id, .. } => Some(*id),
            FileLocation::Path { .. } => None,
        }
    }
}

/// A file matching a source's pattern at the time of resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedFile {
    pub source_label: String,
    pub location: FileLocation,
    pub file_type: FileType,
    pub discovered_at: DateTime<Utc>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl ResolvedFile {
    pub fn path(&self) -> &Path {
        self.location.path()
    }
}
