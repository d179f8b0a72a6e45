use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChunkerError>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ChunkerError {
    #[error("chunking.tokens must be greater than zero")]
    ZeroTokenBudget,

    #[error("chunking.overlap ({overlap}) must be smaller than chunking.tokens ({tokens})")]
    OverlapTooLarge { tokens: usize, overlap: usize },
}
