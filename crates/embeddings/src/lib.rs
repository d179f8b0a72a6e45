//! # Memory Embeddings
//!
//! Turns chunk texts into vectors through one of two paths.
//!
//! ```text
//! pending chunks
//!     │
//!     ├──> Direct path
//!     │      ├─ byte-budgeted sub-batches
//!     │      └─ embed_batch + transient retry
//!     │
//!     └──> Remote batch pipeline
//!            ├─ JSONL upload (custom_id per chunk)
//!            ├─ create job (transient retry)
//!            ├─ poll until terminal
//!            └─ download + reconcile by custom_id
//! ```
//!
//! Provider outcomes are tagged as [`ProviderError::Transient`] or
//! [`ProviderError::Fatal`]; retry policy is a pure decision over that tag.

mod batch;
mod cancel;
mod direct;
mod error;
mod openai;
mod provider;
mod retry;

pub use batch::{
    decode_output, encode_requests, BatchConfig, BatchOutcome, BatchPipeline, BatchRequest,
    PendingBatchJob, PendingCheck, BATCH_ENDPOINT, MAX_REQUESTS_PER_JOB,
};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use direct::{group_by_byte_budget, DirectConfig, DirectEmbedder, DEFAULT_MAX_BATCH_BYTES};
pub use error::{EmbeddingError, ProviderError, Result};
pub use openai::{OpenAiConfig, OpenAiProvider, DEFAULT_OPENAI_BASE_URL};
pub use provider::{BatchJobStatus, BatchState, BatchTransport, EmbeddingProvider};
pub use retry::{RetryDecision, RetryPolicy};
