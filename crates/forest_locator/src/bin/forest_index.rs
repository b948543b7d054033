//! Forest index maintenance
//!
//! Usage:
//!     forest_index --config forest.yaml              # sync every database-backed source once
//!     forest_index --config forest.yaml --resolve    # ...then resolve every source
//!     forest_index --config forest.yaml --watch      # keep syncing until ctrl-c

use anyhow::{Context, Result};
use clap::Parser;
use forest_locator::{
    sync_indexes, Environment, Refresher, ReaderRegistry, ResolutionEngine, SourceRegistry,
    SyncStats,
};
use forest_logging::{init_logging, LogConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "forest_index", about = "Sync and inspect Forest dataset indexes")]
struct Args {
    /// Source configuration (YAML)
    #[arg(long, env = "FOREST_CONFIG")]
    config: PathBuf,

    /// Resolve every source after syncing and report file counts
    #[arg(long)]
    resolve: bool,

    /// Keep running, re-syncing on the refresh interval
    #[arg(long, conflicts_with = "resolve")]
    watch: bool,

    /// Override `engine.refresh_interval_secs`
    #[arg(long, requires = "watch")]
    interval_secs: Option<u64>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Log to stderr as well as the log file
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Default, Serialize)]
struct SourceSummary {
    label: String,
    locator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sync: Option<SyncStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sync_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SourceSummary {
    fn failed(&self) -> bool {
        self.sync_error.is_some() || self.error.is_some()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(LogConfig {
        app_name: "forest_index",
        verbose: args.verbose,
    })?;

    let readers = ReaderRegistry::builtin();
    let registry =
        SourceRegistry::from_path(&args.config, Environment::capture(), readers.file_types())
            .with_context(|| format!("Failed to load {}", args.config.display()))?;

    if args.watch {
        return watch(registry, readers, args.interval_secs).await;
    }

    let synced = sync_indexes(&registry).await;
    let mut summaries: Vec<SourceSummary> = registry
        .sources()
        .iter()
        .map(|source| {
            let mut summary = SourceSummary {
                label: source.label.clone(),
                locator: source.locator.to_string(),
                ..Default::default()
            };
            match synced.get(&source.label) {
                Some(Ok(stats)) => summary.sync = Some(*stats),
                Some(Err(e)) => summary.sync_error = Some(e.to_string()),
                None => {}
            }
            summary
        })
        .collect();

    if args.resolve {
        let engine = ResolutionEngine::new(registry, readers);
        let resolved = engine.resolve_all().await;
        for summary in &mut summaries {
            match resolved.get(&summary.label) {
                Some(Ok(entries)) => summary.files = Some(entries.len()),
                Some(Err(e)) => summary.error = Some(e.to_string()),
                None => {}
            }
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        print_table(&summaries);
    }

    let failed = summaries.iter().filter(|s| s.failed()).count();
    if failed > 0 {
        anyhow::bail!("{} of {} source(s) failed", failed, summaries.len());
    }
    Ok(())
}

async fn watch(
    registry: SourceRegistry,
    readers: ReaderRegistry,
    interval_secs: Option<u64>,
) -> Result<()> {
    let engine = ResolutionEngine::new(registry, readers);
    let (refresher, shutdown) = match interval_secs {
        Some(secs) => Refresher::with_interval(engine, Duration::from_secs(secs.max(1))),
        None => Refresher::new(engine),
    };

    let handle = tokio::spawn(refresher.run());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    // The refresher may already have stopped
    let _ = shutdown.send(()).await;
    handle.await.context("Refresher task panicked")?;
    Ok(())
}

fn print_table(summaries: &[SourceSummary]) {
    for s in summaries {
        let sync = match (&s.sync, &s.sync_error) {
            (Some(stats), _) => format!(
                "+{} ~{} -{} ={}",
                stats.added, stats.updated, stats.removed, stats.unchanged
            ),
            (None, Some(e)) => format!("sync failed: {}", e),
            (None, None) => "-".to_string(),
        };
        let files = match (&s.files, &s.error) {
            (Some(n), _) => format!("{} file(s)", n),
            (None, Some(e)) => format!("error: {}", e),
            (None, None) => String::new(),
        };
        println!("{:<16} {:<9} {:<24} {}", s.label, s.locator, sync, files);
    }
}
