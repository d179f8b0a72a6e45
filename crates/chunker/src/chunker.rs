use crate::error::{ChunkerError, Result};
use crate::types::MemoryChunk;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Characters assumed per token when estimating token counts
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimated token count of `text`.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// SHA-256 hex digest used for chunk and document change detection.
#[must_use]
pub fn content_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Maximum estimated tokens per chunk
    pub tokens: usize,
    /// Estimated tokens shared by adjacent chunks
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            tokens: 400,
            overlap: 80,
        }
    }
}

impl ChunkerConfig {
    pub const fn validate(&self) -> Result<()> {
        if self.tokens == 0 {
            return Err(ChunkerError::ZeroTokenBudget);
        }
        if self.overlap >= self.tokens {
            return Err(ChunkerError::OverlapTooLarge {
                tokens: self.tokens,
                overlap: self.overlap,
            });
        }
        Ok(())
    }

    const fn window_chars(&self) -> usize {
        self.tokens * CHARS_PER_TOKEN
    }

    const fn overlap_chars(&self) -> usize {
        self.overlap * CHARS_PER_TOKEN
    }
}

/// Window-based chunker for memory documents
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a chunker, rejecting budgets that could not make progress.
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `text` into ordered chunks.
    ///
    /// Every chunk stays within `tokens` estimated tokens, and each chunk starts
    /// exactly `overlap` tokens before the end of its predecessor. Blank input and
    /// blank windows produce nothing.
    #[must_use]
    pub fn chunk(&self, path: &str, text: &str) -> Vec<MemoryChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let newlines: Vec<usize> = text.match_indices('\n').map(|(idx, _)| idx).collect();
        let byte_at = |char_idx: usize| chars.get(char_idx).map_or(text.len(), |(b, _)| *b);
        let line_of = |byte: usize| newlines.partition_point(|&nl| nl < byte) + 1;

        let window = self.config.window_chars();
        let overlap = self.config.overlap_chars();
        let total = chars.len();

        let mut chunks = Vec::new();
        let mut start = 0usize;
        loop {
            let hard_end = (start + window).min(total);
            let end = if hard_end < total {
                self.preferred_break(&chars, start, hard_end)
            } else {
                hard_end
            };

            let start_byte = byte_at(start);
            let end_byte = byte_at(end);
            let span = &text[start_byte..end_byte];
            if !span.trim().is_empty() {
                chunks.push(MemoryChunk {
                    path: path.to_string(),
                    ordinal: chunks.len(),
                    start_line: line_of(start_byte),
                    end_line: line_of(end_byte.saturating_sub(1).max(start_byte)),
                    text: span.to_string(),
                    tokens: estimate_tokens(span),
                    digest: content_digest(span),
                });
            }

            if end >= total {
                break;
            }
            start = end - overlap;
        }

        chunks
    }

    /// Pick a window end at a newline (or whitespace) in the back half of the window.
    /// The break must leave the chunk longer than the overlap so the next window advances.
    fn preferred_break(&self, chars: &[(usize, char)], start: usize, hard_end: usize) -> usize {
        let window = self.config.window_chars();
        let min_end = start + (window / 2).max(self.config.overlap_chars() + 1);
        if min_end >= hard_end {
            return hard_end;
        }

        let candidates = || (min_end..hard_end).rev();
        if let Some(idx) = candidates().find(|&i| chars[i - 1].1 == '\n') {
            return idx;
        }
        if let Some(idx) = candidates().find(|&i| chars[i - 1].1.is_whitespace()) {
            return idx;
        }
        hard_end
    }
}
