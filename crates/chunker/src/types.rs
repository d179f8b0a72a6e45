use serde::{Deserialize, Serialize};

/// A contiguous span of one memory document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryChunk {
    /// Workspace-relative document path (forward slashes)
    pub path: String,
    /// Position of the chunk inside its document, starting at 0
    pub ordinal: usize,
    /// First line covered by the chunk (1-based)
    pub start_line: usize,
    /// Last line covered by the chunk (1-based, inclusive)
    pub end_line: usize,
    pub text: String,
    /// Estimated token count of `text`
    pub tokens: usize,
    /// SHA-256 hex digest of `text`
    pub digest: String,
}

impl MemoryChunk {
    /// Stable correlation id: document path plus ordinal.
    #[must_use]
    pub fn id(&self) -> String {
        chunk_id(&self.path, self.ordinal)
    }
}

#[must_use]
pub(crate) fn chunk_id(path: &str, ordinal: usize) -> String {
    format!("{path}:{ordinal}")
}
