//! Database locator: answers from a file index instead of walking the directory.

use super::directory::check_directory;
use crate::error::{IndexError, LocateError};
use crate::index::FileIndex;
use crate::patterns::FilenameMatcher;
use crate::types::{FileLocation, ResolvedFile, SourceDefinition};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DatabaseLocator {
    database_path: PathBuf,
    directory: PathBuf,
}

impl DatabaseLocator {
    pub fn new(database_path: impl Into<PathBuf>, directory: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
            directory: directory.into(),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Query the index for the source's files under its directory.
    ///
    /// The directory must still exist and the index must hold a completed sync
    /// of it.
    pub async fn locate(
        &self,
        source: &SourceDefinition,
        matcher: &FilenameMatcher,
    ) -> Result<Vec<ResolvedFile>, LocateError> {
        check_directory(&self.directory)?;

        let index = FileIndex::open_existing(&self.database_path)
            .await
            .map_err(|e| LocateError::IndexUnavailable {
                path: self.database_path.clone(),
                reason: e.to_string(),
            })?;

        let found = index.find(&self.directory, matcher).await;
        index.close().await;
        let rows = found.map_err(|e| match e {
            IndexError::Translation(message) => LocateError::QueryError(message),
            IndexError::NotSynced(_) => LocateError::IndexUnavailable {
                path: self.database_path.clone(),
                reason: format!("{} has not been indexed", self.directory.display()),
            },
            other => LocateError::QueryError(other.to_string()),
        })?;

        debug!(
            label = %source.label,
            database = %self.database_path.display(),
            matched = rows.len(),
            "Index queried"
        );

        let discovered_at = Utc::now();
        Ok(rows
            .into_iter()
            .map(|row| ResolvedFile {
                source_label: source.label.clone(),
                location: FileLocation::Record {
                    id: row.id,
                    path: row.path,
                },
                file_type: source.file_type.clone(),
                discovered_at,
                modified_at: row.modified_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileType, LocatorKind};
    use std::fs;
    use tempfile::TempDir;

    fn source() -> SourceDefinition {
        SourceDefinition {
            label: "GA7".to_string(),
            pattern: "*ga7*.nc".to_string(),
            directory_template: "${DIRECTORY}".to_string(),
            file_type: FileType::new("unified_model"),
            locator: LocatorKind::Database,
            database_path_template: Some("${DATABASE}".to_string()),
        }
    }

    #[tokio::test]
    async fn returns_index_records() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("run_ga7_1.nc"), b"x").unwrap();
        fs::write(data.join("run_ga6_1.nc"), b"x").unwrap();
        let db_path = tmp.path().join("index.db");

        let matcher = FilenameMatcher::compile("*.nc").unwrap();
        let index = FileIndex::open(&db_path).await.unwrap();
        index.sync_directory(&data, &matcher).await.unwrap();
        index.close().await;

        let locator = DatabaseLocator::new(&db_path, &data);
        let ga7 = FilenameMatcher::compile("*ga7*.nc").unwrap();
        let files = locator.locate(&source(), &ga7).await.unwrap();

        assert_eq!(files.len(), 1);
        assert!(files[0].location.record_id().is_some());
        assert_eq!(files[0].path(), data.join("run_ga7_1.nc"));
        assert_eq!(files[0].file_type.as_str(), "unified_model");
    }

    #[tokio::test]
    async fn missing_index_is_unavailable() {
        let tmp = TempDir::new().unwrap();
        let locator = DatabaseLocator::new(tmp.path().join("missing.db"), tmp.path());
        let matcher = FilenameMatcher::compile("*.nc").unwrap();
        let err = locator.locate(&source(), &matcher).await.unwrap_err();
        assert!(matches!(err, LocateError::IndexUnavailable { .. }));
    }

    #[tokio::test]
    async fn missing_directory_is_unavailable_even_with_index() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("data");
        let db_path = tmp.path().join("index.db");
        let matcher = FilenameMatcher::compile("*ga7*.nc").unwrap();

        let index = FileIndex::open(&db_path).await.unwrap();
        assert!(index.sync_directory(&data, &matcher).await.is_err());
        index.close().await;

        let locator = DatabaseLocator::new(&db_path, &data);
        let err = locator.locate(&source(), &matcher).await.unwrap_err();
        assert!(matches!(err, LocateError::DirectoryUnavailable { .. }));
    }

    #[tokio::test]
    async fn unsynced_directory_is_not_reported_empty() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("index.db");
        FileIndex::open(&db_path).await.unwrap().close().await;

        let locator = DatabaseLocator::new(&db_path, tmp.path());
        let matcher = FilenameMatcher::compile("*ga7*.nc").unwrap();
        let err = locator.locate(&source(), &matcher).await.unwrap_err();
        assert!(matches!(err, LocateError::IndexUnavailable { .. }));
    }

    #[tokio::test]
    async fn untranslatable_pattern_is_a_query_error() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("index.db");
        FileIndex::open(&db_path).await.unwrap().close().await;

        let locator = DatabaseLocator::new(&db_path, tmp.path());
        let matcher = FilenameMatcher::compile("*.{nc,json}").unwrap();
        let err = locator.locate(&source(), &matcher).await.unwrap_err();
        assert!(matches!(err, LocateError::QueryError(_)));
    }
}
