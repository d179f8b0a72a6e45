use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("embedding dimension mismatch for {chunk_id}: expected {expected}, got {got}")]
    DimensionMismatch {
        chunk_id: String,
        expected: usize,
        got: usize,
    },

    #[error("chunk {chunk_id} does not belong to document {path}")]
    ForeignChunk { chunk_id: String, path: String },

    #[error("unsupported store schema version {0}")]
    SchemaVersion(u32),
}
