//! # Memory Chunker
//!
//! Splits workspace memory documents into token-budgeted, overlapping chunks.
//!
//! ```text
//! document text
//!     │
//!     ├──> char windows (tokens * 4 chars, newline-preferring breaks)
//!     │
//!     └──> MemoryChunk[] (ordinal, lines, token estimate, digest)
//! ```
//!
//! Chunking is deterministic and performs no I/O, so the same text always yields the
//! same ordinals and correlation ids.

mod chunker;
mod error;
mod types;

pub use chunker::{content_digest, estimate_tokens, Chunker, ChunkerConfig, CHARS_PER_TOKEN};
pub use error::{ChunkerError, Result};
pub use types::MemoryChunk;
