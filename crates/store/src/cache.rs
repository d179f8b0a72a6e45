use crate::store::MemoryStore;
use lru::LruCache;
use std::num::NonZeroUsize;

pub const DEFAULT_CACHE_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    model: String,
    digest: String,
}

/// LRU of embeddings keyed by chunk content digest and model
///
/// Identical chunk text is never embedded twice for the same model, including text
/// that moved between documents or whose vectors arrived from a detached batch job.
pub struct EmbeddingCache {
    entries: LruCache<CacheKey, Vec<f32>>,
}

impl EmbeddingCache {
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// Seed with every embedding already stored for the store's model.
    pub fn seed_from(&mut self, store: &MemoryStore) -> usize {
        let Some(model) = store.meta().map(|meta| meta.model.clone()) else {
            return 0;
        };
        let mut seeded = 0;
        for chunk in store.chunks() {
            if let Some(embedding) = &chunk.embedding {
                self.insert(&model, &chunk.digest, embedding.clone());
                seeded += 1;
            }
        }
        seeded
    }

    pub fn get(&mut self, model: &str, digest: &str) -> Option<Vec<f32>> {
        let key = CacheKey {
            model: model.to_string(),
            digest: digest.to_string(),
        };
        self.entries.get(&key).cloned()
    }

    pub fn insert(&mut self, model: &str, digest: &str, embedding: Vec<f32>) {
        self.entries.put(
            CacheKey {
                model: model.to_string(),
                digest: digest.to_string(),
            },
            embedding,
        );
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
