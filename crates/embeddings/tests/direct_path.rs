use async_trait::async_trait;
use memory_embeddings::{
    CancelSignal, DirectConfig, DirectEmbedder, EmbeddingError, EmbeddingProvider, ProviderError,
    RetryPolicy,
};
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct ScriptedProvider {
    calls: Mutex<Vec<Vec<String>>>,
    failures: Mutex<VecDeque<ProviderError>>,
}

impl ScriptedProvider {
    fn failing_with(errors: Vec<ProviderError>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(errors.into()),
        }
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(vec![text.len() as f32, 1.0])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.lock().unwrap().push(texts.to_vec());
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
    }
}

fn embedder(provider: Arc<ScriptedProvider>) -> DirectEmbedder {
    DirectEmbedder::new(
        provider,
        DirectConfig {
            max_batch_bytes: 8_000,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
        },
        CancelSignal::never(),
    )
}

fn texts(sizes: &[usize]) -> Vec<String> {
    sizes
        .iter()
        .enumerate()
        .map(|(i, size)| format!("{i}{}", "x".repeat(size - 1)))
        .collect()
}

#[tokio::test]
async fn chunk_set_under_budget_uses_one_call() {
    let provider = Arc::new(ScriptedProvider::default());
    let input = texts(&[1_000, 2_000, 3_000]);

    let vectors = embedder(provider.clone()).embed_all(&input).await.unwrap();

    assert_eq!(provider.calls().len(), 1);
    assert_eq!(vectors.len(), 3);
    assert_eq!(vectors[2][0], 3_000.0);
}

#[tokio::test]
async fn chunk_set_over_budget_is_split_without_losing_texts() {
    let provider = Arc::new(ScriptedProvider::default());
    let input = texts(&[5_000, 5_000, 2_500, 900]);

    let vectors = embedder(provider.clone()).embed_all(&input).await.unwrap();

    let calls = provider.calls();
    assert!(calls.len() >= 2, "expected a split, got {} calls", calls.len());
    let embedded: usize = calls.iter().map(Vec::len).sum();
    assert_eq!(embedded, input.len());
    for call in &calls {
        let bytes: usize = call.iter().map(String::len).sum();
        assert!(bytes <= 8_000 || call.len() == 1);
    }
    let lengths: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
    assert_eq!(lengths, vec![5_000.0, 5_000.0, 2_500.0, 900.0]);
}

#[tokio::test]
async fn transient_errors_are_retried_until_success() {
    let provider = Arc::new(ScriptedProvider::failing_with(vec![
        ProviderError::Transient("HTTP 429".into()),
        ProviderError::Transient("HTTP 503".into()),
    ]));

    let vectors = embedder(provider.clone())
        .embed_all(&texts(&[10, 20]))
        .await
        .unwrap();

    assert_eq!(provider.calls().len(), 3);
    assert_eq!(vectors.len(), 2);
}

#[tokio::test]
async fn transient_errors_surface_after_the_bound() {
    let provider = Arc::new(ScriptedProvider::failing_with(vec![
        ProviderError::Transient("HTTP 503".into()),
        ProviderError::Transient("HTTP 503".into()),
        ProviderError::Transient("HTTP 503".into()),
        ProviderError::Transient("HTTP 503".into()),
    ]));

    let err = embedder(provider.clone())
        .embed_all(&texts(&[10]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EmbeddingError::Provider(ProviderError::Transient(_))
    ));
    assert_eq!(provider.calls().len(), 3);
}

#[tokio::test]
async fn fatal_errors_are_not_retried() {
    let provider = Arc::new(ScriptedProvider::failing_with(vec![ProviderError::Fatal(
        "HTTP 400: input too long".into(),
    )]));

    let err = embedder(provider.clone())
        .embed_all(&texts(&[5_000, 5_000]))
        .await
        .unwrap_err();

    assert!(matches!(err, EmbeddingError::Provider(ProviderError::Fatal(_))));
    assert_eq!(provider.calls().len(), 1);
}

#[tokio::test]
async fn blank_texts_never_reach_the_provider() {
    let provider = Arc::new(ScriptedProvider::default());
    let input = vec!["real text".to_string(), "   ".to_string()];

    let err = embedder(provider.clone()).embed_all(&input).await.unwrap_err();

    assert!(matches!(err, EmbeddingError::EmptyInput(1)));
    assert!(provider.calls().is_empty());
}
