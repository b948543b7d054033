//! Forest Locator - Dataset Source Registry & Resolution Layer
//!
//! Turns a YAML list of dataset sources into concrete files for the viewer.
//! Each source names a directory template, a case-sensitive glob, a file type
//! and a locator strategy (directory scan or SQLite file index).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌───────────────┐
//! │ forest.yaml │     │   Source    │     │  Resolution │     │   Dispatch    │
//! │  + ${ENV}   │────▶│  Registry   │────▶│   Engine    │────▶│ (file_type →  │
//! │  snapshot   │     │ (validated) │     │ (TTL cache) │     │    reader)    │
//! └─────────────┘     └─────────────┘     └──────┬──────┘     └───────────────┘
//!                                                │
//!                                  ┌─────────────┴─────────────┐
//!                                  ▼                           ▼
//!                           ┌─────────────┐             ┌─────────────┐
//!                           │  Directory  │             │  Database   │
//!                           │   Locator   │             │   Locator   │
//!                           └─────────────┘             └──────┬──────┘
//!                                                              │
//!                                                       ┌──────┴──────┐
//!                                                       │ File Index  │
//!                                                       │  (SQLite)   │◀── Refresher
//!                                                       └─────────────┘
//! ```
//!
//! # Core Concepts
//!
//! - **Source**: label + pattern + directory template + file type + locator
//! - **Environment**: `${NAME}` values captured once at load
//! - **Resolved File**: a matching path or index record, owned by the cache
//! - **Refresher**: re-syncs indexes and re-resolves on an interval

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod index;
pub mod locator;
pub mod patterns;
pub mod refresh;
pub mod registry;
pub mod template;
pub mod types;

// Re-exports for convenience
pub use cache::{Failure, SourceState};
pub use config::{EngineSettings, RawConfig};
pub use dispatch::{DatasetHandle, DatasetReader, ReaderError, ReaderRegistry};
pub use engine::{Entries, ResolutionEngine};
pub use error::{
    ConfigError, ConfigIssue, DispatchError, IndexError, LocateError, PatternError,
    ResolutionError, Result, TemplateError,
};
pub use index::{FileIndex, IndexedFile, SyncStats};
pub use locator::{DatabaseLocator, DirectoryLocator, Locator};
pub use patterns::FilenameMatcher;
pub use refresh::{sync_indexes, RefreshReport, Refresher};
pub use registry::SourceRegistry;
pub use template::Environment;
pub use types::{
    FileLocation, FileType, FileTypes, LocatorKind, ResolvedFile, SourceDefinition, Viewport,
};
