//! # Memory Store
//!
//! Persisted index for workspace memory: document records, chunk text and metadata,
//! and the embeddings attached to each chunk.
//!
//! ```text
//! {workspace}/.memory/{agent}.json
//!     ├── meta       provider, model, chunking
//!     ├── documents  path -> {digest, mtime_ms, size}
//!     └── chunks     "path:ordinal" -> {lines, text, digest, embedding?}
//! ```
//!
//! The file is rewritten atomically (temp file + rename). Vector search runs in
//! process over `ndarray` views; when it is disabled callers fall back to lexical
//! scoring.

mod cache;
mod error;
mod store;
mod vector;

pub use cache::{EmbeddingCache, DEFAULT_CACHE_ENTRIES};
pub use error::{Result, StoreError};
pub use store::{
    DocumentRecord, MemoryStore, MetaChange, StoreMeta, StoredChunk, STORE_SCHEMA_VERSION,
};
pub use vector::{cosine_similarity, VectorBackend};
