#![allow(dead_code)]

use async_trait::async_trait;
use memory_embeddings::{BatchJobStatus, BatchState, BatchTransport, EmbeddingProvider, ProviderError};
use memory_indexer::{MemoryIndexManager, MemorySearchSettings, ResolvedConfig};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Words with their own embedding dimension; everything else is ignored.
const VOCABULARY: &[&str] = &[
    "deploy", "key", "vault", "staging", "tuesday", "sync", "apples", "milk", "oat",
];

/// Deterministic bag-of-words embedding over [`VOCABULARY`].
pub fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; VOCABULARY.len() + 1];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
    {
        if let Some(idx) = VOCABULARY.iter().position(|v| *v == word) {
            vector[idx] += 1.0;
        }
    }
    // Keeps every vector non-zero.
    vector[VOCABULARY.len()] = 0.01;
    vector
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Provider that embeds locally and counts every call
pub struct FakeProvider {
    model: String,
    pub embed_calls: AtomicUsize,
    pub embedded_texts: AtomicUsize,
    pub query_calls: AtomicUsize,
    pub fail_queries: AtomicBool,
    embed_failures: Mutex<VecDeque<ProviderError>>,
    batch: Option<FakeBatchApi>,
}

impl FakeProvider {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            embed_calls: AtomicUsize::new(0),
            embedded_texts: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            fail_queries: AtomicBool::new(false),
            embed_failures: Mutex::new(VecDeque::new()),
            batch: None,
        }
    }

    pub fn with_batch(model: &str, batch: FakeBatchApi) -> Self {
        Self {
            batch: Some(batch),
            ..Self::new(model)
        }
    }

    pub fn fail_next_embeds(&self, errors: Vec<ProviderError>) {
        self.embed_failures.lock().unwrap().extend(errors);
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn batch(&self) -> &FakeBatchApi {
        self.batch.as_ref().expect("provider has no batch api")
    }
}

#[async_trait]
impl EmbeddingProvider for FakeProvider {
    fn id(&self) -> &str {
        "fake"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(ProviderError::Transient("query endpoint down".into()));
        }
        Ok(embed_text(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.embed_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.embedded_texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|text| embed_text(text)).collect())
    }

    fn batch_transport(&self) -> Option<&dyn BatchTransport> {
        self.batch.as_ref().map(|batch| batch as &dyn BatchTransport)
    }
}

/// In-memory batch API. Each upload becomes one job whose output echoes the uploaded
/// requests with [`embed_text`] vectors.
#[derive(Default)]
pub struct FakeBatchApi {
    uploads: Mutex<Vec<Vec<u8>>>,
    /// Consumed one per `create_batch` call; `None` means success
    pub create_script: Mutex<VecDeque<Option<ProviderError>>>,
    /// Consumed one per status call; `Completed` once empty
    pub poll_states: Mutex<VecDeque<BatchState>>,
    /// Report every job as in progress forever
    pub never_finish: AtomicBool,
    pub calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
}

impl FakeBatchApi {
    pub fn scripted(create: Vec<Option<ProviderError>>) -> Self {
        Self {
            create_script: Mutex::new(create.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    fn status(job_id: &str, state: BatchState) -> BatchJobStatus {
        let idx = job_id.trim_start_matches("batch_");
        BatchJobStatus {
            id: job_id.to_string(),
            status: state,
            output_file_id: (state == BatchState::Completed).then(|| format!("out_{idx}")),
            error_file_id: None,
        }
    }
}

#[async_trait]
impl BatchTransport for FakeBatchApi {
    async fn upload_file(&self, jsonl: Vec<u8>) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push(jsonl);
        Ok(format!("in_{}", uploads.len() - 1))
    }

    async fn create_batch(&self, input_file_id: &str) -> Result<BatchJobStatus, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(Some(err)) = self.create_script.lock().unwrap().pop_front() {
            return Err(err);
        }
        let idx = input_file_id.trim_start_matches("in_");
        Ok(Self::status(&format!("batch_{idx}"), BatchState::Validating))
    }

    async fn batch_status(&self, job_id: &str) -> Result<BatchJobStatus, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let state = if self.never_finish.load(Ordering::SeqCst) {
            BatchState::InProgress
        } else {
            self.poll_states
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(BatchState::Completed)
        };
        Ok(Self::status(job_id, state))
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let idx: usize = file_id.trim_start_matches("out_").parse().unwrap();
        let upload = self.uploads.lock().unwrap()[idx].clone();
        let lines: Vec<String> = String::from_utf8(upload)
            .unwrap()
            .lines()
            .map(|line| {
                let request: serde_json::Value = serde_json::from_str(line).unwrap();
                let input = request["body"]["input"].as_str().unwrap();
                serde_json::json!({
                    "custom_id": request["custom_id"],
                    "response": {
                        "status_code": 200,
                        "body": { "data": [ { "embedding": embed_text(input) } ] }
                    }
                })
                .to_string()
            })
            .rev()
            .collect();
        Ok(lines.join("\n").into_bytes())
    }
}

pub fn write(root: &Path, relative: &str, text: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

/// Settings with background triggers off and millisecond retry delays.
pub fn settings(workspace: &TempDir) -> MemorySearchSettings {
    let mut settings = MemorySearchSettings::default();
    settings.workspace = Some(workspace.path().to_path_buf());
    settings.sync.watch = false;
    settings.sync.on_search = false;
    settings.sync.on_session_start = false;
    settings.embedding.retry.base_delay_ms = 1;
    settings.embedding.retry.max_delay_ms = 4;
    settings
}

pub fn batch_settings(workspace: &TempDir, wait: bool) -> MemorySearchSettings {
    let mut settings = settings(workspace);
    settings.remote.batch.enabled = true;
    settings.remote.batch.wait = wait;
    settings.remote.batch.poll_interval_ms = 5;
    settings
}

pub fn resolve(settings: &MemorySearchSettings) -> ResolvedConfig {
    settings.resolve_with_env("main", |_| None).unwrap()
}

pub async fn open(
    settings: &MemorySearchSettings,
    provider: &Arc<FakeProvider>,
) -> Arc<MemoryIndexManager> {
    let provider: Arc<dyn EmbeddingProvider> = provider.clone();
    MemoryIndexManager::open(resolve(settings), provider)
        .await
        .unwrap()
}
