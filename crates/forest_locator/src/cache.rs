//! Per-source resolution cache.
//!
//! Each label owns one slot holding the last successful result and the last
//! failure. A slot value is an immutable `Arc` swapped whole under the lock,
//! so readers never observe a partially written result. Only a successful
//! resolution replaces the result; failures are recorded beside it.

use crate::error::ResolutionError;
use crate::types::ResolvedFile;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// A successful resolution of one source.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub entries: Arc<[ResolvedFile]>,
    pub fetched_at: DateTime<Utc>,
    /// When the resolution that produced this entry started
    started: Instant,
    invalidated: bool,
}

impl CacheEntry {
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        !self.invalidated && self.started.elapsed() < ttl
    }
}

/// A failed resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub error: ResolutionError,
    pub at: DateTime<Utc>,
}

/// What callers can show for a source.
#[derive(Debug, Clone)]
pub enum SourceState {
    /// Never resolved
    Unresolved,
    /// Last successful result. `stale` once expired or invalidated;
    /// `last_error` is set when a later attempt failed.
    Available {
        entries: Arc<[ResolvedFile]>,
        fetched_at: DateTime<Utc>,
        stale: bool,
        last_error: Option<Failure>,
    },
    /// No successful result yet; the last attempt failed
    Unavailable(Failure),
}

impl SourceState {
    pub fn is_available(&self) -> bool {
        matches!(self, SourceState::Available { .. })
    }

    /// Files known for the source; `None` when it has never resolved.
    pub fn entries(&self) -> Option<&[ResolvedFile]> {
        match self {
            SourceState::Available { entries, .. } => Some(entries),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Slot {
    entry: Option<Arc<CacheEntry>>,
    failure: Option<Failure>,
    invalidated_at: Option<Instant>,
}

/// Resolution results keyed by source label.
#[derive(Debug)]
pub struct ResolutionCache {
    ttl: Duration,
    slots: RwLock<HashMap<String, Slot>>,
}

impl ResolutionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached result if it is neither expired nor invalidated.
    pub fn fresh(&self, label: &str) -> Option<Arc<CacheEntry>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(label)
            .and_then(|slot| slot.entry.as_ref())
            .filter(|entry| entry.is_fresh(self.ttl))
            .cloned()
    }

    /// Last successful result, fresh or not.
    pub fn last_good(&self, label: &str) -> Option<Arc<CacheEntry>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(label).and_then(|slot| slot.entry.clone())
    }

    /// Store a complete result for a resolution that began at `started`.
    ///
    /// Returns false, leaving the slot untouched, when a resolution that began
    /// later has already stored its result. A result whose resolution began
    /// before the last `invalidate` is stored already invalidated.
    pub fn store_success(
        &self,
        label: &str,
        entries: Arc<[ResolvedFile]>,
        started: Instant,
    ) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(label.to_string()).or_default();

        if let Some(current) = &slot.entry {
            if current.started > started {
                return false;
            }
        }

        let invalidated = slot.invalidated_at.map_or(false, |at| started < at);
        slot.entry = Some(Arc::new(CacheEntry {
            entries,
            fetched_at: Utc::now(),
            started,
            invalidated,
        }));
        slot.failure = None;
        true
    }

    /// Record a failed attempt. The last good result, if any, is kept.
    pub fn record_failure(&self, label: &str, error: ResolutionError) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(label.to_string()).or_default();
        slot.failure = Some(Failure {
            error,
            at: Utc::now(),
        });
    }

    /// Force the next lookup of `label` to re-resolve. Returns false if nothing was cached.
    pub fn invalidate(&self, label: &str) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        match slots.get_mut(label) {
            Some(slot) => Self::invalidate_slot(slot),
            None => false,
        }
    }

    pub fn invalidate_all(&self) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        for slot in slots.values_mut() {
            Self::invalidate_slot(slot);
        }
    }

    fn invalidate_slot(slot: &mut Slot) -> bool {
        slot.invalidated_at = Some(Instant::now());
        match &slot.entry {
            Some(entry) => {
                slot.entry = Some(Arc::new(CacheEntry {
                    invalidated: true,
                    ..CacheEntry::clone(entry)
                }));
                true
            }
            None => false,
        }
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn state(&self, label: &str) -> SourceState {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = slots.get(label) else {
            return SourceState::Unresolved;
        };
        match (&slot.entry, &slot.failure) {
            (Some(entry), failure) => SourceState::Available {
                entries: Arc::clone(&entry.entries),
                fetched_at: entry.fetched_at,
                stale: !entry.is_fresh(self.ttl),
                last_error: failure.clone(),
            },
            (None, Some(failure)) => SourceState::Unavailable(failure.clone()),
            (None, None) => SourceState::Unresolved,
        }
    }
}
