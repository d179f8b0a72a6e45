use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Tagged outcome of a failed provider call.
///
/// Only the boundary adapters (`classify_status`, `classify_message`) inspect raw
/// status codes or messages; everything downstream matches on the tag.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("provider error: {0}")]
    Fatal(String),
}

impl ProviderError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Classify an HTTP status: 408, 429 and 5xx are transient.
    #[must_use]
    pub fn classify_status(status: u16, body: &str) -> Self {
        let message = format!("HTTP {status}: {}", truncate(body.trim(), 300));
        if status == 408 || status == 429 || (500..600).contains(&status) {
            Self::Transient(message)
        } else {
            Self::Fatal(message)
        }
    }

    /// Classify a raw error message from a provider that only reports text.
    #[must_use]
    pub fn classify_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        let transient = lower.contains("rate limit")
            || lower.contains("rate_limit")
            || lower.contains("too many requests")
            || lower.contains("timed out")
            || lower.contains("timeout")
            || lower.contains("temporarily unavailable")
            || lower.contains("overloaded")
            || contains_5xx_code(&lower)
            || lower.contains("429");
        if transient {
            Self::Transient(message.to_string())
        } else {
            Self::Fatal(message.to_string())
        }
    }
}

fn contains_5xx_code(text: &str) -> bool {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|token| token.len() == 3)
        .filter_map(|token| token.parse::<u16>().ok())
        .any(|code| (500..600).contains(&code))
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("embedding cancelled")]
    Cancelled,

    #[error("refusing to embed blank text at position {0}")]
    EmptyInput(usize),

    #[error("provider returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    #[error("provider does not support batch embeddings")]
    BatchUnsupported,

    #[error("batch job {job_id} ended with status {status}")]
    BatchFailed { job_id: String, status: String },

    #[error("batch job {job_id} did not finish within {timeout:?}")]
    BatchTimeout { job_id: String, timeout: Duration },

    #[error("invalid batch output: {0}")]
    BatchOutput(String),

    #[error("invalid provider configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EmbeddingError {
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_and_upstream_errors_are_transient() {
        assert!(ProviderError::classify_status(429, "slow down").is_transient());
        assert!(ProviderError::classify_status(503, "").is_transient());
        assert!(ProviderError::classify_status(500, "boom").is_transient());
        assert!(ProviderError::classify_status(408, "").is_transient());
    }

    #[test]
    fn client_errors_are_fatal() {
        assert!(!ProviderError::classify_status(400, "bad input").is_transient());
        assert!(!ProviderError::classify_status(401, "no key").is_transient());
        assert!(!ProviderError::classify_status(404, "").is_transient());
    }

    #[test]
    fn message_classification() {
        assert!(ProviderError::classify_message("Rate limit reached for model").is_transient());
        assert!(ProviderError::classify_message("upstream returned 502 Bad Gateway").is_transient());
        assert!(ProviderError::classify_message("request timed out").is_transient());
        assert!(!ProviderError::classify_message("invalid api key").is_transient());
        assert!(!ProviderError::classify_message("input length 5000 exceeds limit").is_transient());
    }

    #[test]
    fn status_message_is_truncated() {
        let body = "x".repeat(1000);
        match ProviderError::classify_status(400, &body) {
            ProviderError::Fatal(msg) => assert!(msg.len() < 320),
            ProviderError::Transient(_) => panic!("400 must be fatal"),
        }
    }
}
