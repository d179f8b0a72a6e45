use crate::error::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Embedding capability consumed by the indexer.
///
/// Providers that can run asynchronous batch jobs expose a [`BatchTransport`]; the
/// remote batch pipeline is unavailable for every other provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short provider id (e.g. `openai`)
    fn id(&self) -> &str;

    /// Model identifier used to tag stored embeddings
    fn model(&self) -> &str;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Embed `texts`, returning one vector per input in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    fn batch_transport(&self) -> Option<&dyn BatchTransport> {
        None
    }
}

/// File and job endpoints of a batch-oriented embedding API
#[async_trait]
pub trait BatchTransport: Send + Sync {
    /// Upload a JSONL request document, returning its file id.
    async fn upload_file(&self, jsonl: Vec<u8>) -> Result<String, ProviderError>;

    async fn create_batch(&self, input_file_id: &str) -> Result<BatchJobStatus, ProviderError>;

    async fn batch_status(&self, job_id: &str) -> Result<BatchJobStatus, ProviderError>;

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJobStatus {
    pub id: String,
    pub status: BatchState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_file_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Validating,
    InProgress,
    Finalizing,
    Completed,
    Failed,
    Expired,
    Cancelling,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl BatchState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Expired | Self::Cancelled
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::InProgress => "in_progress",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }
}
