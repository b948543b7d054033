//! Locator strategies.
//!
//! A source is located either by scanning its directory or by querying a file
//! index. Both produce the same entries for the same files; only the
//! [`FileLocation`](crate::types::FileLocation) variant differs.

pub mod database;
pub mod directory;

pub use database::DatabaseLocator;
pub use directory::{DirectoryLocator, DirectoryScan, LocatedFile};

use crate::error::{LocateError, TemplateError};
use crate::patterns::FilenameMatcher;
use crate::registry::expand_directory;
use crate::template::{self, Environment};
use crate::types::{LocatorKind, ResolvedFile, SourceDefinition};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Stop flag shared between a directory walk on the blocking pool and the
/// resolution that started it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Cancel when the returned guard goes out of scope.
    fn cancel_on_drop(&self) -> CancelOnDrop<'_> {
        CancelOnDrop(self)
    }
}

/// Fires its token on drop, including when the owning future is dropped.
struct CancelOnDrop<'a>(&'a CancellationToken);

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// The strategy selected for a source, with its templates expanded.
#[derive(Debug, Clone)]
pub enum Locator {
    Directory(DirectoryLocator),
    Database(DatabaseLocator),
}

impl Locator {
    /// Expand the source's templates and pick its strategy.
    pub fn for_source(
        source: &SourceDefinition,
        environment: &Environment,
    ) -> Result<Self, TemplateError> {
        let directory = expand_directory(source, environment)?;
        match source.locator {
            LocatorKind::Directory => Ok(Locator::Directory(DirectoryLocator::new(directory))),
            LocatorKind::Database => {
                let database_path = match &source.database_path_template {
                    Some(t) => PathBuf::from(template::expand(t, environment)?),
                    // The registry rejects database sources without a path
                    None => {
                        return Err(TemplateError::MissingVariable {
                            name: "database_path".to_string(),
                        })
                    }
                };
                Ok(Locator::Database(DatabaseLocator::new(
                    database_path,
                    directory,
                )))
            }
        }
    }

    pub fn kind(&self) -> LocatorKind {
        match self {
            Locator::Directory(_) => LocatorKind::Directory,
            Locator::Database(_) => LocatorKind::Database,
        }
    }

    /// Locate a source's files. The directory walk runs on the blocking pool
    /// and stops early once `cancel` fires or this future is dropped.
    pub async fn locate(
        &self,
        source: &SourceDefinition,
        matcher: &FilenameMatcher,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResolvedFile>, LocateError> {
        match self {
            Locator::Directory(locator) => {
                let _guard = cancel.cancel_on_drop();
                let locator = locator.clone();
                let source = source.clone();
                let matcher = matcher.clone();
                let cancel = cancel.clone();
                tokio::task::spawn_blocking(move || locator.locate(&source, &matcher, &cancel))
                    .await
                    .map_err(|e| LocateError::Interrupted(e.to_string()))?
            }
            Locator::Database(locator) => locator.locate(source, matcher).await,
        }
    }
}
