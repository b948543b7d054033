//! Logging setup for the Forest binaries.
//!
//! Events go to `$FOREST_HOME/logs/<app>.log` and to stderr. The log file is
//! rotated by size and the last five are kept. `RUST_LOG` overrides the
//! default filter.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "forest_locator=info,forest_index=info";
const KEPT_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

pub struct LogConfig<'a> {
    /// Log file stem (`<app_name>.log`)
    pub app_name: &'a str,
    /// Show the full filter on stderr rather than warnings only
    pub verbose: bool,
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let dir = log_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;

    let path = dir.join(format!("{}.log", config.app_name));
    let log_file = SizeRotatedFile::open(path.clone(), MAX_LOG_FILE_SIZE, KEPT_LOG_FILES)
        .with_context(|| format!("Failed to open log file: {}", path.display()))?;

    let filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        filter()
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(log_file))
                .with_ansi(false)
                .with_filter(filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(())
}

/// `$FOREST_HOME/logs`, with `FOREST_HOME` defaulting to `~/.forest`.
fn log_dir() -> PathBuf {
    std::env::var_os("FOREST_HOME")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(".forest")))
        .unwrap_or_else(|| PathBuf::from(".forest"))
        .join("logs")
}

/// Append-only file that moves itself aside once a write would take it past
/// `max_size`: `app.log` becomes `app.log.1`, `app.log.1` becomes `app.log.2`,
/// and so on up to `keep - 1`.
struct SizeRotatedFile {
    path: PathBuf,
    file: File,
    written: u64,
    max_size: u64,
    keep: usize,
}

impl SizeRotatedFile {
    fn open(path: PathBuf, max_size: u64, keep: usize) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            written,
            max_size,
            keep: keep.max(1),
        })
    }

    fn backup(&self, n: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;
        for n in (1..self.keep).rev() {
            let from = match n {
                1 => self.path.clone(),
                _ => self.backup(n - 1),
            };
            ignore_missing(fs::remove_file(self.backup(n)))?;
            ignore_missing(fs::rename(from, self.backup(n)))?;
        }
        // With keep == 1 nothing was moved and the file starts over
        self.file = File::create(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl Write for SizeRotatedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            self.roll()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read(tmp: &TempDir, name: &str) -> String {
        fs::read_to_string(tmp.path().join(name)).unwrap()
    }

    #[test]
    fn rolls_before_exceeding_max_size() {
        let tmp = TempDir::new().unwrap();
        let mut file = SizeRotatedFile::open(tmp.path().join("forest.log"), 16, 3).unwrap();

        file.write_all(b"0123456789").unwrap();
        file.write_all(b"abcdefghij").unwrap();
        file.flush().unwrap();

        assert_eq!(read(&tmp, "forest.log"), "abcdefghij");
        assert_eq!(read(&tmp, "forest.log.1"), "0123456789");
    }

    #[test]
    fn keeps_at_most_keep_files() {
        let tmp = TempDir::new().unwrap();
        let mut file = SizeRotatedFile::open(tmp.path().join("forest.log"), 4, 2).unwrap();

        for chunk in [b"aaaa", b"bbbb", b"cccc"] {
            file.write_all(chunk).unwrap();
        }
        file.flush().unwrap();

        assert_eq!(read(&tmp, "forest.log"), "cccc");
        assert_eq!(read(&tmp, "forest.log.1"), "bbbb");
        assert!(!tmp.path().join("forest.log.2").exists());
    }

    #[test]
    fn reopening_counts_existing_contents() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("forest.log");
        fs::write(&path, b"old!").unwrap();

        let mut file = SizeRotatedFile::open(path, 6, 5).unwrap();
        file.write_all(b"new!").unwrap();
        file.flush().unwrap();

        assert_eq!(read(&tmp, "forest.log"), "new!");
        assert_eq!(read(&tmp, "forest.log.1"), "old!");
    }

    #[test]
    fn single_file_starts_over() {
        let tmp = TempDir::new().unwrap();
        let mut file = SizeRotatedFile::open(tmp.path().join("forest.log"), 4, 1).unwrap();

        file.write_all(b"aaaa").unwrap();
        file.write_all(b"bb").unwrap();
        file.flush().unwrap();

        assert_eq!(read(&tmp, "forest.log"), "bb");
        assert!(!tmp.path().join("forest.log.1").exists());
    }
}
