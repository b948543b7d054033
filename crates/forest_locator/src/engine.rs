//! Resolution engine: the entry point the rest of the viewer calls.
//!
//! Per source: expand templates against the registry's environment snapshot,
//! pick the locator, locate under a timeout and a concurrency permit, then
//! cache the complete result. Sources never affect one another; a failure is
//! recorded next to the last good result instead of replacing it.

use crate::cache::{ResolutionCache, SourceState};
use crate::config::EngineSettings;
use crate::dispatch::{DatasetHandle, ReaderRegistry};
use crate::error::{DispatchError, ResolutionError, Result};
use crate::locator::{CancellationToken, Locator};
use crate::registry::SourceRegistry;
use crate::types::{ResolvedFile, SourceDefinition, Viewport};
use indexmap::IndexMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Files of one source from one resolution.
pub type Entries = Arc<[ResolvedFile]>;

struct EngineInner {
    registry: RwLock<Arc<SourceRegistry>>,
    cache: ResolutionCache,
    readers: ReaderRegistry,
    settings: EngineSettings,
    permits: Semaphore,
}

/// Cheap to clone; clones share the registry, cache and worker permits.
#[derive(Clone)]
pub struct ResolutionEngine {
    inner: Arc<EngineInner>,
}

impl ResolutionEngine {
    /// Build an engine using the registry's `engine` settings.
    pub fn new(registry: SourceRegistry, readers: ReaderRegistry) -> Self {
        let settings = registry.engine_settings().clone();
        Self::with_settings(registry, readers, settings)
    }

    pub fn with_settings(
        registry: SourceRegistry,
        readers: ReaderRegistry,
        settings: EngineSettings,
    ) -> Self {
        warn_unbound(&registry, &readers);
        info!(
            sources = registry.len(),
            cache_ttl_secs = settings.cache_ttl.as_secs(),
            max_concurrent = settings.max_concurrent,
            timeout_secs = settings.source_timeout.as_secs(),
            "Resolution engine ready"
        );

        Self {
            inner: Arc::new(EngineInner {
                registry: RwLock::new(Arc::new(registry)),
                cache: ResolutionCache::new(settings.cache_ttl),
                readers,
                permits: Semaphore::new(settings.max_concurrent.max(1)),
                settings,
            }),
        }
    }

    /// Current registry snapshot.
    pub fn registry(&self) -> Arc<SourceRegistry> {
        Arc::clone(
            &self
                .inner
                .registry
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn readers(&self) -> &ReaderRegistry {
        &self.inner.readers
    }

    /// Source definitions in declaration order.
    pub fn list_sources(&self) -> Vec<SourceDefinition> {
        self.registry().sources().to_vec()
    }

    pub fn default_viewport(&self) -> Viewport {
        self.registry().default_viewport()
    }

    /// Files for `label`, from cache when fresh.
    pub async fn resolve(&self, label: &str) -> Result<Entries> {
        self.resolve_with_timeout(label, self.inner.settings.source_timeout)
            .await
    }

    /// [`resolve`](Self::resolve) with a caller-chosen locate timeout.
    pub async fn resolve_with_timeout(&self, label: &str, timeout: Duration) -> Result<Entries> {
        if let Some(entry) = self.inner.cache.fresh(label) {
            debug!(label, files = entry.entries.len(), "Cache hit");
            return Ok(Arc::clone(&entry.entries));
        }

        let registry = self.registry();
        let (Some(source), Some(matcher)) = (registry.source(label), registry.matcher(label))
        else {
            return Err(ResolutionError::UnknownSource(label.to_string()));
        };

        let locator = match Locator::for_source(source, registry.environment()) {
            Ok(locator) => locator,
            Err(error) => {
                let err = ResolutionError::Template {
                    label: label.to_string(),
                    error,
                };
                return Err(self.fail(&registry, err));
            }
        };

        let _permit = match self.inner.permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                let err = ResolutionError::Worker {
                    label: label.to_string(),
                    message: e.to_string(),
                };
                return Err(self.fail(&registry, err));
            }
        };

        let started = Instant::now();
        let cancel = CancellationToken::new();
        let outcome =
            tokio::time::timeout(timeout, locator.locate(source, matcher, &cancel)).await;

        match outcome {
            Ok(Ok(files)) => {
                let entries: Entries = Arc::from(files);
                self.succeed(&registry, label, Arc::clone(&entries), started);
                debug!(
                    label,
                    locator = %locator.kind(),
                    files = entries.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Source resolved"
                );
                Ok(entries)
            }
            Ok(Err(error)) => {
                let err = ResolutionError::Locate {
                    label: label.to_string(),
                    error,
                };
                Err(self.fail(&registry, err))
            }
            Err(_) => {
                let err = ResolutionError::Timeout {
                    label: label.to_string(),
                    after: timeout,
                };
                Err(self.fail(&registry, err))
            }
        }
    }

    /// Resolve every source concurrently. Results are in declaration order.
    pub async fn resolve_all(&self) -> IndexMap<String, Result<Entries>> {
        self.resolve_all_with_timeout(self.inner.settings.source_timeout)
            .await
    }

    pub async fn resolve_all_with_timeout(
        &self,
        timeout: Duration,
    ) -> IndexMap<String, Result<Entries>> {
        let handles: Vec<_> = self
            .registry()
            .labels()
            .into_iter()
            .map(|label| {
                let engine = self.clone();
                let task_label = label.clone();
                let handle = tokio::spawn(async move {
                    engine.resolve_with_timeout(&task_label, timeout).await
                });
                (label, handle)
            })
            .collect();

        let mut results = IndexMap::with_capacity(handles.len());
        for (label, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(ResolutionError::Worker {
                    label: label.clone(),
                    message: e.to_string(),
                }),
            };
            results.insert(label, result);
        }

        let failed = results.values().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(sources = results.len(), failed, "Resolution pass had failures");
        }
        results
    }

    /// Force `label` to re-resolve on next access. Returns false if nothing was cached.
    pub fn invalidate(&self, label: &str) -> bool {
        self.inner.cache.invalidate(label)
    }

    pub fn invalidate_all(&self) {
        self.inner.cache.invalidate_all();
    }

    /// Replace the registry wholesale and drop every cached result.
    ///
    /// Resolutions still running against the old registry finish but are not cached.
    pub fn reload(&self, registry: SourceRegistry) {
        warn_unbound(&registry, &self.inner.readers);
        let mut current = self
            .inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(registry);
        self.inner.cache.clear();
        info!(sources = current.len(), "Registry reloaded");
    }

    /// What can be shown for `label` right now, without resolving.
    pub fn state(&self, label: &str) -> Result<SourceState> {
        if self.registry().source(label).is_none() {
            return Err(ResolutionError::UnknownSource(label.to_string()));
        }
        Ok(self.inner.cache.state(label))
    }

    /// Hand an entry to the reader bound to its file type.
    pub fn open(&self, entry: &ResolvedFile) -> std::result::Result<DatasetHandle, DispatchError> {
        self.inner.readers.open(entry)
    }

    fn succeed(
        &self,
        registry: &Arc<SourceRegistry>,
        label: &str,
        entries: Entries,
        started: Instant,
    ) {
        let current = self
            .inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if !Arc::ptr_eq(&*current, registry) {
            debug!(label, "Registry reloaded during resolution; result not cached");
            return;
        }
        if !self.inner.cache.store_success(label, entries, started) {
            debug!(label, "Newer result already cached");
        }
    }

    fn fail(&self, registry: &Arc<SourceRegistry>, err: ResolutionError) -> ResolutionError {
        warn!(label = err.label(), error = %err, "Source resolution failed");
        let current = self
            .inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if Arc::ptr_eq(&*current, registry) {
            self.inner.cache.record_failure(err.label(), err.clone());
        }
        err
    }
}

fn warn_unbound(registry: &SourceRegistry, readers: &ReaderRegistry) {
    for source in registry.sources() {
        if readers.reader_for(&source.file_type).is_none() {
            warn!(
                label = %source.label,
                file_type = %source.file_type,
                "No reader bound for file type"
            );
        }
    }
}
