use memory_embeddings::PendingBatchJob;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

/// Circuit breaker over the remote batch path
///
/// Each unrecovered pipeline failure counts; a success resets the count. Reaching the
/// threshold disables the path until [`BatchHealth::reenable`] is called. Nothing here
/// is persisted, so a restart starts enabled again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BatchHealth {
    pub enabled: bool,
    pub failures: u32,
    pub threshold: u32,
}

impl BatchHealth {
    #[must_use]
    pub const fn new(threshold: u32) -> Self {
        Self {
            enabled: true,
            failures: 0,
            threshold: if threshold == 0 { 1 } else { threshold },
        }
    }

    /// Count one failure. Returns true when this failure disabled the path.
    pub fn record_failure(&mut self) -> bool {
        self.failures = self.failures.saturating_add(1);
        if self.enabled && self.failures >= self.threshold {
            self.enabled = false;
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    pub fn reenable(&mut self) {
        self.enabled = true;
        self.failures = 0;
    }
}

/// Batch jobs submitted without waiting, awaiting reconciliation on a later sync
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingBatch {
    pub jobs: Vec<PendingBatchJob>,
    /// `custom_id -> chunk digest` for every submitted request
    pub digests: HashMap<String, String>,
}

impl PendingBatch {
    #[must_use]
    pub fn covers(&self, custom_id: &str, digest: &str) -> bool {
        self.digests.get(custom_id).is_some_and(|d| d == digest)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// In-memory bookkeeping owned by one manager
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    pub dirty: bool,
    pub syncing: bool,
    pub last_sync_unix_ms: Option<u64>,
    pub last_error: Option<String>,
    pub batch: Option<BatchHealth>,
    pub pending_batch: Option<PendingBatch>,
    pub documents: usize,
    pub chunks: usize,
    pub warmed_sessions: HashSet<String>,
}

impl SyncState {
    #[must_use]
    pub fn new(batch_threshold: Option<u32>) -> Self {
        Self {
            dirty: true,
            batch: batch_threshold.map(BatchHealth::new),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn batch_available(&self) -> bool {
        self.batch.is_some_and(|health| health.enabled)
    }

    pub fn record_success(&mut self, dirty: bool) {
        self.last_sync_unix_ms = Some(unix_now_ms());
        self.last_error = None;
        self.dirty = dirty;
    }

    /// A pass that found nothing to do leaves the last sync time and error alone.
    pub fn record_noop(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    pub fn record_error(&mut self, error: String) {
        self.last_error = Some(error);
        self.dirty = true;
    }
}

pub(crate) fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
