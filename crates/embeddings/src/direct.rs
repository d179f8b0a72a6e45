use crate::cancel::CancelSignal;
use crate::error::{EmbeddingError, Result};
use crate::provider::EmbeddingProvider;
use crate::retry::RetryPolicy;
use std::ops::Range;
use std::sync::Arc;

/// Upper bound on the summed UTF-8 size of one `embed_batch` request
pub const DEFAULT_MAX_BATCH_BYTES: usize = 8_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectConfig {
    pub max_batch_bytes: usize,
    pub retry: RetryPolicy,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            retry: RetryPolicy::default(),
        }
    }
}

/// Group consecutive texts so each group's byte total stays within `max_bytes`.
///
/// A text larger than the budget travels alone. Ranges cover `texts` in order.
#[must_use]
pub fn group_by_byte_budget<S: AsRef<str>>(texts: &[S], max_bytes: usize) -> Vec<Range<usize>> {
    let mut groups = Vec::new();
    let mut start = 0usize;
    let mut bytes = 0usize;

    for (idx, text) in texts.iter().enumerate() {
        let len = text.as_ref().len();
        if idx > start && bytes + len > max_bytes {
            groups.push(start..idx);
            start = idx;
            bytes = 0;
        }
        bytes += len;
    }
    if start < texts.len() {
        groups.push(start..texts.len());
    }
    groups
}

/// Synchronous embedding path: sub-batches sent straight to `embed_batch`
pub struct DirectEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    config: DirectConfig,
    cancel: CancelSignal,
}

impl DirectEmbedder {
    #[must_use]
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        config: DirectConfig,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            provider,
            config,
            cancel,
        }
    }

    /// Sub-batch ranges for `texts`; callers embed and commit one range at a time.
    #[must_use]
    pub fn plan<S: AsRef<str>>(&self, texts: &[S]) -> Vec<Range<usize>> {
        group_by_byte_budget(texts, self.config.max_batch_bytes)
    }

    /// Embed one sub-batch, retrying transient failures.
    pub async fn embed_group(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(pos) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::EmptyInput(pos));
        }

        let provider = self.provider.clone();
        let vectors = self
            .config
            .retry
            .run("embed_batch", &self.cancel, |_| {
                let provider = provider.clone();
                async move { provider.embed_batch(texts).await }
            })
            .await?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        log::debug!(
            "Embedded sub-batch of {} texts via {}",
            texts.len(),
            self.provider.id()
        );
        Ok(vectors)
    }

    /// Embed everything, sub-batch by sub-batch, preserving input order.
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for range in self.plan(texts) {
            out.extend(self.embed_group(&texts[range]).await?);
        }
        Ok(out)
    }
}
