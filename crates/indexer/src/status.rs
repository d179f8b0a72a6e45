use crate::sync_state::BatchHealth;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Read-only snapshot of one manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStatus {
    pub agent_id: String,
    pub provider: String,
    pub model: String,
    pub documents: usize,
    pub chunks: usize,
    pub dirty: bool,
    pub syncing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_batch_jobs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_unix_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Whether vector scoring participates in queries
    pub vector: bool,
    pub store_path: String,
    pub closed: bool,
}

/// Chunk-level progress of one sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SyncProgress {
    pub completed: usize,
    pub total: usize,
}

pub type ProgressFn = Arc<dyn Fn(SyncProgress) + Send + Sync>;

#[derive(Clone)]
pub struct SyncOptions {
    /// Free-form trigger label (`manual`, `watch`, `search`, `session`, `interval`)
    pub reason: String,
    /// Re-read every document regardless of stat and digest
    pub force: bool,
    pub progress: Option<ProgressFn>,
}

impl SyncOptions {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            force: false,
            progress: None,
        }
    }

    #[must_use]
    pub const fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: impl Fn(SyncProgress) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub(crate) fn report(&self, progress: SyncProgress) {
        if let Some(callback) = &self.progress {
            callback(progress);
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::new("manual")
    }
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("reason", &self.reason)
            .field("force", &self.force)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Outcome of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub reason: String,
    /// Nothing was dirty; no provider call was made
    pub noop: bool,
    pub scanned: usize,
    pub indexed_documents: usize,
    pub removed_documents: usize,
    /// Documents left dirty (unreadable, or waiting on a pending batch job)
    pub skipped_documents: usize,
    /// Chunks embedded by a provider during this pass
    pub embedded_chunks: usize,
    /// Chunks satisfied from the embedding cache or previously stored vectors
    pub cached_chunks: usize,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    pub batch_used: bool,
    pub batch_pending: bool,
    pub duration_ms: u64,
}

impl SyncReport {
    pub(crate) fn new(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.completed_chunks == self.total_chunks && self.skipped_documents == 0
    }
}
