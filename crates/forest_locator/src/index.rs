//! SQLite file index backing the database locator.
//!
//! One row per file, keyed by its full `/`-separated path. `directory` holds
//! the parent directory and `name` the filename so filename patterns can be
//! answered from the `(directory, name)` index without a walk.
//!
//! `synced_directories` records every directory whose walk completed. A
//! directory missing from it has never been confirmed, so queries against it
//! fail instead of reporting zero files.

use crate::locator::CancellationToken;
use crate::error::{IndexError, LocateError};
use crate::locator::directory::{DirectoryLocator, LocatedFile};
use crate::patterns::{escape_sqlite_glob, to_forward_slashes, FilenameMatcher, MatchScope};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

type Result<T> = std::result::Result<T, IndexError>;

/// One row of the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedFile {
    pub id: i64,
    pub path: PathBuf,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Outcome of [`FileIndex::sync_directory`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub added: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub removed: u64,
}

impl SyncStats {
    pub fn changed(&self) -> bool {
        self.added + self.updated + self.removed > 0
    }
}

/// Handle to an index database.
#[derive(Clone)]
pub struct FileIndex {
    pool: SqlitePool,
    path: PathBuf,
}

impl FileIndex {
    /// Open or create an index, creating parent directories and the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let index = Self {
            pool,
            path: path.to_path_buf(),
        };
        index.ensure_schema().await?;
        info!(path = %path.display(), "File index opened");

        Ok(index)
    }

    /// Open an existing index read-only (fails if it does not exist).
    pub async fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(IndexError::NotFound(path.to_path_buf()));
        }

        let options = SqliteConnectOptions::new().filename(path).read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS indexed_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL UNIQUE,
                directory TEXT NOT NULL,
                name TEXT NOT NULL,
                size INTEGER NOT NULL,
                mtime INTEGER,
                indexed_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_indexed_files_dir_name ON indexed_files(directory, name)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS synced_directories (
                directory TEXT PRIMARY KEY,
                synced_at INTEGER NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Total number of indexed files.
    pub async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM indexed_files")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")? as u64)
    }

    /// Bring the rows for `directory` in line with what is on disk.
    ///
    /// Only files the matcher can reach are touched: other sources sharing the
    /// index keep their rows.
    pub async fn sync_directory(
        &self,
        directory: &Path,
        matcher: &FilenameMatcher,
    ) -> Result<SyncStats> {
        let locator = DirectoryLocator::new(directory);
        let walk_matcher = matcher.clone();
        let scan = tokio::task::spawn_blocking(move || {
            locator.scan(&walk_matcher, &CancellationToken::new())
        })
        .await
        .map_err(|e| LocateError::Interrupted(e.to_string()))??;

        let dir = normalize_directory(directory);
        let mut existing: HashMap<String, (i64, u64, Option<i64>)> = self
            .rows_under(&dir)
            .await?
            .into_iter()
            .filter(|row| in_scope(matcher, &dir, &row.path))
            .map(|row| (row.path, (row.id, row.size, row.mtime)))
            .collect();

        let mut stats = SyncStats::default();
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        for file in &scan.files {
            let key = to_forward_slashes(&file.path);
            let mtime = file.modified_at.map(|t| t.timestamp_millis());
            match existing.remove(&key) {
                Some((_, size, old_mtime)) if size == file.size && old_mtime == mtime => {
                    stats.unchanged += 1;
                }
                Some(_) => {
                    upsert(&mut *tx, file, now).await?;
                    stats.updated += 1;
                }
                None => {
                    upsert(&mut *tx, file, now).await?;
                    stats.added += 1;
                }
            }
        }

        for (id, _, _) in existing.into_values() {
            sqlx::query("DELETE FROM indexed_files WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            stats.removed += 1;
        }

        sqlx::query(
            r#"
            INSERT INTO synced_directories (directory, synced_at) VALUES (?, ?)
            ON CONFLICT(directory) DO UPDATE SET synced_at = excluded.synced_at
            "#,
        )
        .bind(&dir)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            directory = %dir,
            pattern = matcher.pattern(),
            added = stats.added,
            updated = stats.updated,
            unchanged = stats.unchanged,
            removed = stats.removed,
            "Index synced"
        );
        Ok(stats)
    }

    /// When `directory` was last synced, if ever.
    pub async fn synced_at(&self, directory: &Path) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT synced_at FROM synced_directories WHERE directory = ?")
            .bind(normalize_directory(directory))
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(DateTime::from_timestamp_millis(row.try_get("synced_at")?)),
            None => Ok(None),
        }
    }

    /// Files under `directory` matching `matcher`, ordered by path.
    ///
    /// Fails with [`IndexError::NotSynced`] for a directory no sync has
    /// completed for.
    pub async fn find(&self, directory: &Path, matcher: &FilenameMatcher) -> Result<Vec<IndexedFile>> {
        let glob = matcher.to_index_glob().map_err(|e| match e {
            LocateError::QueryError(message) => IndexError::Translation(message),
            other => IndexError::Walk(other),
        })?;
        if self.synced_at(directory).await?.is_none() {
            return Err(IndexError::NotSynced(directory.to_path_buf()));
        }
        let dir = normalize_directory(directory);

        let rows = match matcher.scope() {
            MatchScope::FileName => {
                sqlx::query(
                    "SELECT id, path, size, mtime FROM indexed_files WHERE directory = ? AND name GLOB ? ORDER BY path",
                )
                .bind(&dir)
                .bind(&glob)
                .fetch_all(&self.pool)
                .await?
            }
            MatchScope::RelativePath => {
                sqlx::query(
                    "SELECT id, path, size, mtime FROM indexed_files WHERE path GLOB ? ORDER BY path",
                )
                .bind(format!("{}{}", escape_sqlite_glob(&dir_prefix(&dir)), glob))
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut files = Vec::with_capacity(rows.len());
        for row in &rows {
            let row = IndexRow::from_row(row)?;
            // GLOB `*` crosses `/`, the matcher does not
            if !in_scope(matcher, &dir, &row.path) {
                continue;
            }
            files.push(IndexedFile {
                id: row.id,
                path: PathBuf::from(row.path),
                size: row.size,
                modified_at: row.mtime.and_then(DateTime::from_timestamp_millis),
            });
        }
        Ok(files)
    }

    async fn rows_under(&self, dir: &str) -> Result<Vec<IndexRow>> {
        let rows = sqlx::query("SELECT id, path, size, mtime FROM indexed_files WHERE path GLOB ?")
            .bind(format!("{}*", escape_sqlite_glob(&dir_prefix(dir))))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(IndexRow::from_row).collect()
    }
}

struct IndexRow {
    id: i64,
    path: String,
    size: u64,
    mtime: Option<i64>,
}

impl IndexRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            path: row.try_get("path")?,
            size: row.try_get::<i64, _>("size")? as u64,
            mtime: row.try_get("mtime")?,
        })
    }
}

async fn upsert<'e, E>(executor: E, file: &LocatedFile, now: i64) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let path = to_forward_slashes(&file.path);
    let directory = file
        .path
        .parent()
        .map(normalize_directory)
        .unwrap_or_default();
    let name = file
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    sqlx::query(
        r#"
        INSERT INTO indexed_files (path, directory, name, size, mtime, indexed_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(path) DO UPDATE SET
            size = excluded.size,
            mtime = excluded.mtime,
            indexed_at = excluded.indexed_at
        "#,
    )
    .bind(&path)
    .bind(&directory)
    .bind(&name)
    .bind(file.size as i64)
    .bind(file.modified_at.map(|t| t.timestamp_millis()))
    .bind(now)
    .execute(executor)
    .await?;
    Ok(())
}

/// Whether an indexed path lies where the matcher would look and matches it.
fn in_scope(matcher: &FilenameMatcher, dir: &str, path: &str) -> bool {
    let Some(relative) = path.strip_prefix(&dir_prefix(dir)) else {
        return false;
    };
    let depth = relative.split('/').count();
    matcher.max_depth().map_or(true, |max| depth <= max) && matcher.matches(relative)
}

fn normalize_directory(directory: &Path) -> String {
    let dir = to_forward_slashes(directory);
    match dir.trim_end_matches('/') {
        "" if dir.starts_with('/') => "/".to_string(),
        trimmed => trimmed.to_string(),
    }
}

fn dir_prefix(dir: &str) -> String {
    if dir.ends_with('/') {
        dir.to_string()
    } else {
        format!("{dir}/")
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str, content: &[u8]) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn file_names(files: &[IndexedFile]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_open_creates_database() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nested").join("index.db");

        let index = FileIndex::open(&db_path).await.unwrap();
        assert!(db_path.exists());
        assert_eq!(index.count().await.unwrap(), 0);
        index.close().await;
    }

    #[tokio::test]
    async fn test_open_existing_fails_if_not_exists() {
        let tmp = TempDir::new().unwrap();
        let result = FileIndex::open_existing(tmp.path().join("missing.db")).await;
        assert!(matches!(result, Err(IndexError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_sync_tracks_added_updated_removed() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("data");
        touch(&data, "a_ga7.nc", b"1");
        touch(&data, "b_ga7.nc", b"1");
        touch(&data, "other.nc", b"1");

        let index = FileIndex::open(tmp.path().join("index.db")).await.unwrap();
        let matcher = FilenameMatcher::compile("*ga7*.nc").unwrap();

        let stats = index.sync_directory(&data, &matcher).await.unwrap();
        assert_eq!(stats.added, 2);
        assert_eq!(stats.removed, 0);

        let stats = index.sync_directory(&data, &matcher).await.unwrap();
        assert_eq!(stats.unchanged, 2);
        assert!(!stats.changed());

        fs::remove_file(data.join("a_ga7.nc")).unwrap();
        touch(&data, "b_ga7.nc", b"longer");
        touch(&data, "c_ga7.nc", b"1");
        let stats = index.sync_directory(&data, &matcher).await.unwrap();
        assert_eq!(
            stats,
            SyncStats {
                added: 1,
                updated: 1,
                unchanged: 0,
                removed: 1
            }
        );

        let found = index.find(&data, &matcher).await.unwrap();
        assert_eq!(file_names(&found), vec!["b_ga7.nc", "c_ga7.nc"]);
        assert_eq!(found[0].size, 6);
        index.close().await;
    }

    #[tokio::test]
    async fn test_sync_leaves_other_patterns_alone() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("data");
        touch(&data, "x_ga6.nc", b"1");
        touch(&data, "x_ga7.nc", b"1");

        let index = FileIndex::open(tmp.path().join("index.db")).await.unwrap();
        let ga6 = FilenameMatcher::compile("*ga6*.nc").unwrap();
        let ga7 = FilenameMatcher::compile("*ga7*.nc").unwrap();
        index.sync_directory(&data, &ga6).await.unwrap();
        index.sync_directory(&data, &ga7).await.unwrap();

        let stats = index.sync_directory(&data, &ga6).await.unwrap();
        assert_eq!(stats.removed, 0);
        assert_eq!(index.count().await.unwrap(), 2);
        index.close().await;
    }

    #[tokio::test]
    async fn test_find_is_case_sensitive_and_scoped() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("data");
        touch(&data, "EIDA50_20190101.nc", b"1");
        touch(&data, "eida50_20190101.nc", b"1");
        touch(&data, "sub/EIDA50_20190102.nc", b"1");

        let index = FileIndex::open(tmp.path().join("index.db")).await.unwrap();
        let all = FilenameMatcher::compile("**/*.nc").unwrap();
        index.sync_directory(&data, &all).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 3);

        let eida = FilenameMatcher::compile("EIDA50*.nc").unwrap();
        let found = index.find(&data, &eida).await.unwrap();
        assert_eq!(file_names(&found), vec!["EIDA50_20190101.nc"]);

        let nested = FilenameMatcher::compile("sub/EIDA50*.nc").unwrap();
        let found = index.find(&data, &nested).await.unwrap();
        assert_eq!(file_names(&found), vec!["EIDA50_20190102.nc"]);
        index.close().await;
    }

    #[tokio::test]
    async fn test_find_requires_completed_sync() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("data");
        let index = FileIndex::open(tmp.path().join("index.db")).await.unwrap();
        let matcher = FilenameMatcher::compile("*.nc").unwrap();

        let err = index.sync_directory(&data, &matcher).await.unwrap_err();
        assert!(matches!(
            err,
            IndexError::Walk(LocateError::DirectoryUnavailable { .. })
        ));
        assert_eq!(index.synced_at(&data).await.unwrap(), None);
        let err = index.find(&data, &matcher).await.unwrap_err();
        assert!(matches!(err, IndexError::NotSynced(_)));

        fs::create_dir_all(&data).unwrap();
        index.sync_directory(&data, &matcher).await.unwrap();
        assert!(index.synced_at(&data).await.unwrap().is_some());
        assert!(index.find(&data, &matcher).await.unwrap().is_empty());
        index.close().await;
    }

    #[tokio::test]
    async fn test_find_rejects_untranslatable_pattern() {
        let tmp = TempDir::new().unwrap();
        let index = FileIndex::open(tmp.path().join("index.db")).await.unwrap();
        let matcher = FilenameMatcher::compile("*.{nc,json}").unwrap();
        let err = index.find(tmp.path(), &matcher).await.unwrap_err();
        assert!(matches!(err, IndexError::Translation(_)));
        index.close().await;
    }

    #[tokio::test]
    async fn test_reader_sees_writer_rows() {
        let tmp = TempDir::new().unwrap();
        let data = tmp.path().join("data");
        touch(&data, "a.nc", b"1");
        let db_path = tmp.path().join("index.db");
        let matcher = FilenameMatcher::compile("*.nc").unwrap();

        let writer = FileIndex::open(&db_path).await.unwrap();
        writer.sync_directory(&data, &matcher).await.unwrap();
        writer.close().await;

        let reader = FileIndex::open_existing(&db_path).await.unwrap();
        let found = reader.find(&data, &matcher).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].modified_at.is_some());
        reader.close().await;
    }

    #[test]
    fn test_normalize_directory() {
        assert_eq!(normalize_directory(Path::new("/data/wcssp/")), "/data/wcssp");
        assert_eq!(normalize_directory(Path::new("/")), "/");
        assert_eq!(dir_prefix("/"), "/");
        assert_eq!(dir_prefix("/data"), "/data/");
    }
}
