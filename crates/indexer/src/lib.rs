//! # Memory Indexer
//!
//! Keeps an agent's workspace memory documents indexed and searchable.
//!
//! ## Sync
//!
//! ```text
//! Workspace
//!     │
//!     ├──> Dirty tracker (stat + digest arena)
//!     │      └─> Changed documents
//!     │
//!     ├──> Chunker
//!     │      └─> Chunks (cache hits reuse stored vectors)
//!     │
//!     ├──> Remote batch pipeline ──(failure)──┐
//!     │                                        │
//!     └──> Direct path <───────────────────────┘
//!            └─> Per-document commit, atomic store save
//! ```
//!
//! Syncs are triggered explicitly, by the filesystem watcher, on an interval, at
//! session start or by a search against a dirty index.
//!
//! ## Example
//!
//! ```no_run
//! use memory_indexer::{get_memory_search_manager, ManagerRegistry, ManagerRequest,
//!     MemorySearchSettings, SyncOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = MemorySearchSettings::load("memory.toml".as_ref())?;
//!     let registry = ManagerRegistry::new();
//!
//!     let lookup = get_memory_search_manager(&registry, ManagerRequest::new(settings, "main")).await;
//!     let Some(manager) = lookup.manager else {
//!         anyhow::bail!("memory search unavailable: {:?}", lookup.reason);
//!     };
//!
//!     manager.sync(SyncOptions::new("manual")).await?;
//!     for hit in manager.query("deploy key", None).await {
//!         println!("{:.2} {}:{} {}", hit.score, hit.path, hit.start_line, hit.snippet);
//!     }
//!     registry.close_all().await;
//!     Ok(())
//! }
//! ```

mod config;
mod dirty;
mod error;
mod manager;
mod registry;
mod status;
mod sync_state;
mod watcher;

pub use config::{
    settings_schema, CacheSettings, ChunkingSettings, ConfigError, EmbeddingSettings,
    HybridSettings, MemorySearchSettings, QuerySettings, RemoteBatchSettings, RemoteSettings,
    ResolvedBatch, ResolvedConfig, ResolvedRemote, ResolvedSync, RetrySettings, StoreSettings,
    SyncSettings, VectorSettings, DEFAULT_STORE_PATH, OPENAI_API_KEY_ENV,
};
pub use dirty::{DirtyPlan, DirtyTracker, DocumentScanner, ScannedDocument};
pub use error::{IndexerError, Result};
pub use manager::MemoryIndexManager;
pub use registry::{get_memory_search_manager, ManagerLookup, ManagerRegistry, ManagerRequest};
pub use status::{MemoryStatus, ProgressFn, SyncOptions, SyncProgress, SyncReport};
pub use sync_state::{BatchHealth, PendingBatch, SyncState};
pub use watcher::{MemoryWatcher, WatcherConfig};
