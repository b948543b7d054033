//! Directory locator: scans the resolved directory on every resolution.

use super::CancellationToken;
use crate::error::LocateError;
use crate::patterns::FilenameMatcher;
use crate::types::{FileLocation, ResolvedFile, SourceDefinition};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A regular file found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Result of one scan. `cancelled` is set when the token fired mid-walk;
/// `files` is then incomplete.
#[derive(Debug, Default)]
pub struct DirectoryScan {
    pub files: Vec<LocatedFile>,
    pub skipped: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct DirectoryLocator {
    directory: PathBuf,
}

impl DirectoryLocator {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Walk the directory, keeping regular files the matcher accepts.
    ///
    /// Filename patterns visit one level; separator patterns visit as many
    /// levels as they have components, or all levels with `**`. Unreadable
    /// entries below the root are skipped and counted.
    pub fn scan(
        &self,
        matcher: &FilenameMatcher,
        cancel: &CancellationToken,
    ) -> Result<DirectoryScan, LocateError> {
        check_directory(&self.directory)?;

        let mut scan = DirectoryScan::default();
        let walker = WalkDir::new(&self.directory)
            .min_depth(1)
            .max_depth(matcher.max_depth().unwrap_or(usize::MAX))
            .follow_links(true);

        for entry in walker {
            if cancel.is_cancelled() {
                scan.cancelled = true;
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(directory = %self.directory.display(), error = %e, "Skipping unreadable entry");
                    scan.skipped += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&self.directory) else {
                continue;
            };
            if !matcher.matches_path(relative) {
                continue;
            }

            let (size, modified_at) = match entry.metadata() {
                Ok(metadata) => (
                    metadata.len(),
                    metadata.modified().ok().map(DateTime::<Utc>::from),
                ),
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "Failed to stat file");
                    scan.skipped += 1;
                    continue;
                }
            };

            scan.files.push(LocatedFile {
                path: entry.into_path(),
                size,
                modified_at,
            });
        }

        scan.files.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(
            directory = %self.directory.display(),
            pattern = matcher.pattern(),
            matched = scan.files.len(),
            skipped = scan.skipped,
            "Directory scanned"
        );
        Ok(scan)
    }

    /// Resolve a source's files. Nothing is returned for a cancelled scan.
    pub fn locate(
        &self,
        source: &SourceDefinition,
        matcher: &FilenameMatcher,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResolvedFile>, LocateError> {
        let scan = self.scan(matcher, cancel)?;
        if scan.cancelled {
            return Err(LocateError::Cancelled);
        }

        let discovered_at = Utc::now();
        Ok(scan
            .files
            .into_iter()
            .map(|file| ResolvedFile {
                source_label: source.label.clone(),
                location: FileLocation::Path { path: file.path },
                file_type: source.file_type.clone(),
                discovered_at,
                modified_at: file.modified_at,
            })
            .collect())
    }

}

/// Fail with `DirectoryUnavailable` unless `directory` is a readable directory.
pub(crate) fn check_directory(directory: &Path) -> Result<(), LocateError> {
    let unavailable = |reason: String| LocateError::DirectoryUnavailable {
        path: directory.to_path_buf(),
        reason,
    };

    let metadata = fs::metadata(directory).map_err(|e| unavailable(e.to_string()))?;
    if !metadata.is_dir() {
        return Err(unavailable("not a directory".to_string()));
    }
    fs::read_dir(directory).map_err(|e| unavailable(e.to_string()))?;
    Ok(())
}
