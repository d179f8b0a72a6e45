use crate::store::StoredChunk;
use ndarray::ArrayView1;
use std::collections::HashMap;

/// Cosine similarity of two vectors, `None` when dimensions differ or a norm is zero.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let a = ArrayView1::from(a);
    let b = ArrayView1::from(b);
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return None;
    }
    Some(a.dot(&b) / (norm_a * norm_b))
}

/// In-process vector backend over the embeddings held by the store
#[derive(Debug, Clone, Copy, Default)]
pub struct VectorBackend;

impl VectorBackend {
    /// Score every embedded chunk against `query`, clamped into `[0, 1]`.
    ///
    /// Chunks without an embedding, or with a different dimension, get no score.
    #[must_use]
    pub fn scores<'a, I>(&self, chunks: I, query: &[f32]) -> HashMap<&'a str, f32>
    where
        I: IntoIterator<Item = &'a StoredChunk>,
    {
        let mut out = HashMap::new();
        let mut skipped = 0usize;
        for chunk in chunks {
            let Some(embedding) = chunk.embedding.as_deref() else {
                continue;
            };
            match cosine_similarity(embedding, query) {
                Some(score) if score.is_finite() => {
                    out.insert(chunk.id.as_str(), score.clamp(0.0, 1.0));
                }
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            log::debug!("Vector search skipped {skipped} chunks with unusable embeddings");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunk(id: &str, embedding: Option<Vec<f32>>) -> StoredChunk {
        StoredChunk {
            id: id.to_string(),
            path: "a.md".into(),
            ordinal: 0,
            start_line: 1,
            end_line: 1,
            text: String::new(),
            tokens: 0,
            digest: String::new(),
            embedding,
        }
    }

    #[test]
    fn cosine_basics() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]), Some(1.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]), Some(0.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
    }

    #[test]
    fn scores_are_clamped_and_skip_unusable_chunks() {
        let chunks = vec![
            chunk("same", Some(vec![1.0, 0.0])),
            chunk("opposite", Some(vec![-1.0, 0.0])),
            chunk("missing", None),
            chunk("wrong-dim", Some(vec![1.0])),
        ];
        let scores = VectorBackend.scores(&chunks, &[1.0, 0.0]);

        assert_eq!(scores.len(), 2);
        assert_eq!(scores["same"], 1.0);
        assert_eq!(scores["opposite"], 0.0);
    }
}
