//! # Memory Search
//!
//! Ranks stored memory chunks for a free-text query.
//!
//! - **Lexical**: BM25 over unicode word tokens, normalized per query into `[0, 1]`
//! - **Vector**: cosine similarity of the query embedding, clamped into `[0, 1]`
//! - **Hybrid**: `vector_weight * vector + text_weight * text`, weights summing to 1
//!
//! Results below `min_score` are dropped. Missing vectors degrade to lexical ranking
//! instead of failing.

pub mod hybrid;
mod lexical;

pub use hybrid::{
    snippet, HybridSearch, HybridWeights, MemorySearchResult, QueryOptions, SearchMode,
    DEFAULT_MAX_RESULTS, DEFAULT_MIN_SCORE, DEFAULT_TEXT_WEIGHT, DEFAULT_VECTOR_WEIGHT,
    SNIPPET_MAX_CHARS,
};
pub use lexical::{query_terms, tokenize, LexicalScorer, BM25_B, BM25_K1};
