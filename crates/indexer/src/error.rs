use crate::config::ConfigError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("embedding error: {0}")]
    Embedding(#[from] memory_embeddings::EmbeddingError),

    #[error("store error: {0}")]
    Store(#[from] memory_store::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("memory index manager is closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Whether the error came from `close()` interrupting in-flight work.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Embedding(err) => err.is_cancelled(),
            _ => false,
        }
    }
}
