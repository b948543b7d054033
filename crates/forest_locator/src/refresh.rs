//! Periodic index refresher.
//!
//! Each tick re-syncs the index of every database-backed source, invalidates
//! the cache and resolves every source again, so the viewer picks up files
//! that arrived since the last pass.

use crate::engine::ResolutionEngine;
use crate::error::IndexError;
use crate::index::{FileIndex, SyncStats};
use crate::locator::Locator;
use crate::registry::SourceRegistry;
use indexmap::IndexMap;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Sync the index of every database-backed source, in declaration order.
///
/// Directory-backed sources are skipped. A failure is reported for its source
/// only.
pub async fn sync_indexes(
    registry: &SourceRegistry,
) -> IndexMap<String, Result<SyncStats, IndexError>> {
    let mut results = IndexMap::new();

    for source in registry.sources() {
        let Some(matcher) = registry.matcher(&source.label) else {
            continue;
        };
        let locator = match Locator::for_source(source, registry.environment()) {
            Ok(Locator::Database(locator)) => locator,
            Ok(Locator::Directory(_)) => continue,
            Err(e) => {
                results.insert(source.label.clone(), Err(IndexError::from(e)));
                continue;
            }
        };

        let outcome: Result<SyncStats, IndexError> = async {
            let index = FileIndex::open(locator.database_path()).await?;
            let stats = index.sync_directory(locator.directory(), matcher).await;
            index.close().await;
            stats
        }
        .await;

        match &outcome {
            Ok(stats) => debug!(
                label = %source.label,
                added = stats.added,
                updated = stats.updated,
                removed = stats.removed,
                "Source index synced"
            ),
            Err(e) => warn!(label = %source.label, error = %e, "Index sync failed"),
        }
        results.insert(source.label.clone(), outcome);
    }

    results
}

/// Summary of one refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub synced: usize,
    pub sync_failures: usize,
    pub resolved: usize,
    pub resolve_failures: usize,
}

pub struct Refresher {
    engine: ResolutionEngine,
    interval: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Refresher {
    /// Create a refresher using the engine's `refresh_interval`.
    ///
    /// Returns the refresher and a sender; sending on it (or dropping it) stops
    /// the loop.
    pub fn new(engine: ResolutionEngine) -> (Self, mpsc::Sender<()>) {
        let interval = engine.settings().refresh_interval;
        Self::with_interval(engine, interval)
    }

    pub fn with_interval(
        engine: ResolutionEngine,
        interval: Duration,
    ) -> (Self, mpsc::Sender<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        (
            Self {
                engine,
                interval,
                shutdown_rx,
            },
            shutdown_tx,
        )
    }

    /// One pass: sync indexes, invalidate, resolve everything.
    pub async fn tick(&self) -> RefreshReport {
        refresh_pass(&self.engine).await
    }

    /// Run passes until shutdown. The first pass starts immediately; a pass in
    /// progress is abandoned when shutdown arrives.
    pub async fn run(self) {
        let Refresher {
            engine,
            interval: period,
            mut shutdown_rx,
        } = self;
        info!(interval_secs = period.as_secs(), "Refresher started");

        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }

                _ = interval.tick() => {}
            }

            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, abandoning refresh pass");
                    break;
                }

                _ = refresh_pass(&engine) => {}
            }
        }

        info!("Refresher stopped");
    }
}

async fn refresh_pass(engine: &ResolutionEngine) -> RefreshReport {
    let registry = engine.registry();
    let synced = sync_indexes(&registry).await;

    engine.invalidate_all();
    let resolved = engine.resolve_all().await;

    let report = RefreshReport {
        synced: synced.values().filter(|r| r.is_ok()).count(),
        sync_failures: synced.values().filter(|r| r.is_err()).count(),
        resolved: resolved.values().filter(|r| r.is_ok()).count(),
        resolve_failures: resolved.values().filter(|r| r.is_err()).count(),
    };
    info!(
        synced = report.synced,
        sync_failures = report.sync_failures,
        resolved = report.resolved,
        resolve_failures = report.resolve_failures,
        "Refresh pass complete"
    );
    report
}
