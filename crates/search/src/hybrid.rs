use crate::lexical::LexicalScorer;
use memory_store::{MemoryStore, StoredChunk, VectorBackend};
use serde::Serialize;
use std::collections::HashMap;

pub const DEFAULT_MAX_RESULTS: usize = 6;
pub const DEFAULT_MIN_SCORE: f32 = 0.35;
pub const DEFAULT_VECTOR_WEIGHT: f32 = 0.7;
pub const DEFAULT_TEXT_WEIGHT: f32 = 0.3;
pub const SNIPPET_MAX_CHARS: usize = 700;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryOptions {
    pub max_results: usize,
    /// Results scoring below this are dropped
    pub min_score: f32,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            max_results: DEFAULT_MAX_RESULTS,
            min_score: DEFAULT_MIN_SCORE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridWeights {
    pub enabled: bool,
    pub vector: f32,
    pub text: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            enabled: true,
            vector: DEFAULT_VECTOR_WEIGHT,
            text: DEFAULT_TEXT_WEIGHT,
        }
    }
}

impl HybridWeights {
    /// `(vector, text)` rescaled to sum to 1; unusable weights fall back to the defaults.
    #[must_use]
    pub fn normalized(&self) -> (f32, f32) {
        let vector = self.vector.max(0.0);
        let text = self.text.max(0.0);
        let sum = vector + text;
        if !sum.is_finite() || sum <= f32::EPSILON {
            return (DEFAULT_VECTOR_WEIGHT, DEFAULT_TEXT_WEIGHT);
        }
        (vector / sum, text / sum)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Hybrid,
    Lexical,
}

/// One ranked memory chunk
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchResult {
    pub id: String,
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f32>,
    pub text_score: f32,
    pub snippet: String,
}

/// Weighted blend of cosine similarity and BM25 over the memory store
#[derive(Debug, Clone)]
pub struct HybridSearch {
    weights: HybridWeights,
    lexical: LexicalScorer,
    vector: Option<VectorBackend>,
}

impl HybridSearch {
    #[must_use]
    pub fn new(weights: HybridWeights, vector: Option<VectorBackend>) -> Self {
        Self {
            weights,
            lexical: LexicalScorer::default(),
            vector,
        }
    }

    /// Lexical-only ranking, used when no vector backend exists.
    #[must_use]
    pub fn lexical_only() -> Self {
        Self::new(
            HybridWeights {
                enabled: false,
                ..HybridWeights::default()
            },
            None,
        )
    }

    /// Whether a query embedding is worth computing at all.
    #[must_use]
    pub const fn wants_query_vector(&self) -> bool {
        self.weights.enabled && self.vector.is_some()
    }

    #[must_use]
    pub const fn mode(&self, has_query_vector: bool) -> SearchMode {
        if self.wants_query_vector() && has_query_vector {
            SearchMode::Hybrid
        } else {
            SearchMode::Lexical
        }
    }

    /// Rank stored chunks for `query`.
    ///
    /// Without `query_vector` (or without a vector backend) the ranking is lexical only.
    #[must_use]
    pub fn search(
        &self,
        store: &MemoryStore,
        query: &str,
        query_vector: Option<&[f32]>,
        options: &QueryOptions,
    ) -> Vec<MemorySearchResult> {
        if query.trim().is_empty() || options.max_results == 0 {
            return Vec::new();
        }

        let text_scores = self.lexical.score(
            query,
            store
                .chunks()
                .map(|chunk| (chunk.id.as_str(), chunk.text.as_str())),
        );

        let mode = self.mode(query_vector.is_some());
        let vector_scores = match (mode, self.vector, query_vector) {
            (SearchMode::Hybrid, Some(backend), Some(query_vector)) => {
                backend.scores(store.chunks(), query_vector)
            }
            _ => HashMap::new(),
        };
        let (vector_weight, text_weight) = self.weights.normalized();

        let mut candidates: Vec<&str> = text_scores.keys().copied().collect();
        candidates.extend(
            vector_scores
                .keys()
                .copied()
                .filter(|id| !text_scores.contains_key(id)),
        );

        let mut results: Vec<MemorySearchResult> = candidates
            .into_iter()
            .filter_map(|id| {
                let chunk = store.chunk(id)?;
                let text_score = text_scores.get(id).copied().unwrap_or(0.0);
                let (score, vector_score) = match mode {
                    SearchMode::Hybrid => {
                        let vector = vector_scores.get(id).copied().unwrap_or(0.0);
                        (vector_weight * vector + text_weight * text_score, Some(vector))
                    }
                    SearchMode::Lexical => (text_score, None),
                };
                (score.is_finite() && score >= options.min_score)
                    .then(|| to_result(chunk, score, vector_score, text_score))
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(options.max_results);

        log::debug!(
            "Memory search ({mode:?}) for '{query}': {} results above {:.2}",
            results.len(),
            options.min_score
        );
        results
    }
}

fn to_result(
    chunk: &StoredChunk,
    score: f32,
    vector_score: Option<f32>,
    text_score: f32,
) -> MemorySearchResult {
    MemorySearchResult {
        id: chunk.id.clone(),
        path: chunk.path.clone(),
        start_line: chunk.start_line,
        end_line: chunk.end_line,
        score,
        vector_score,
        text_score,
        snippet: snippet(&chunk.text, SNIPPET_MAX_CHARS),
    }
}

/// First `max_chars` characters of `text`, trimmed.
#[must_use]
pub fn snippet(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => trimmed[..cut].trim_end().to_string(),
        None => trimmed.to_string(),
    }
}
