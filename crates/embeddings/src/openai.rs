//! OpenAI-compatible embedding client with batch file/job endpoints.

use crate::batch::BATCH_ENDPOINT;
use crate::error::{EmbeddingError, ProviderError, Result};
use crate::provider::{BatchJobStatus, BatchTransport, EmbeddingProvider};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
    /// Expose the file/batch endpoints as a batch transport
    pub batch: bool,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(60),
            batch: false,
        }
    }
}

#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    model: String,
    batch: bool,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct CreateBatchRequest<'a> {
    input_file_id: &'a str,
    endpoint: &'static str,
    completion_window: &'static str,
    metadata: BTreeMap<&'static str, &'static str>,
}

#[derive(Deserialize)]
struct FileObject {
    id: String,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(EmbeddingError::Config("missing OpenAI API key".into()));
        }
        if config.model.trim().is_empty() {
            return Err(EmbeddingError::Config("missing embedding model".into()));
        }

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| EmbeddingError::Config("invalid OpenAI API key".into()))?,
        );
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| EmbeddingError::Config(format!("invalid header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| EmbeddingError::Config(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| EmbeddingError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model,
            batch: config.batch,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn transport_error(err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ProviderError::Transient(err.to_string())
    } else if let Some(status) = err.status() {
        ProviderError::classify_status(status.as_u16(), &err.to_string())
    } else {
        ProviderError::classify_message(&err.to_string())
    }
}

async fn check(
    response: std::result::Result<Response, reqwest::Error>,
) -> std::result::Result<Response, ProviderError> {
    let response = response.map_err(|e| transport_error(&e))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::classify_status(status.as_u16(), &body))
}

async fn decode_json<T: for<'de> Deserialize<'de>>(
    response: Response,
) -> std::result::Result<T, ProviderError> {
    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::Fatal(format!("invalid response body: {e}")))
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn id(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_query(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| ProviderError::Fatal("empty embedding response".into()))
    }

    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let response = check(
            self.client
                .post(self.url("embeddings"))
                .json(&request)
                .send()
                .await,
        )
        .await?;
        let mut body: EmbeddingResponse = decode_json(response).await?;
        body.data.sort_by_key(|item| item.index);
        Ok(body.data.into_iter().map(|item| item.embedding).collect())
    }

    fn batch_transport(&self) -> Option<&dyn BatchTransport> {
        self.batch.then_some(self as &dyn BatchTransport)
    }
}

#[async_trait]
impl BatchTransport for OpenAiProvider {
    async fn upload_file(&self, jsonl: Vec<u8>) -> std::result::Result<String, ProviderError> {
        let part = Part::bytes(jsonl)
            .file_name("memory-embeddings.jsonl")
            .mime_str("application/jsonl")
            .map_err(|e| ProviderError::Fatal(e.to_string()))?;
        let form = Form::new().text("purpose", "batch").part("file", part);
        let response = check(
            self.client
                .post(self.url("files"))
                .multipart(form)
                .send()
                .await,
        )
        .await?;
        let file: FileObject = decode_json(response).await?;
        Ok(file.id)
    }

    async fn create_batch(
        &self,
        input_file_id: &str,
    ) -> std::result::Result<BatchJobStatus, ProviderError> {
        let request = CreateBatchRequest {
            input_file_id,
            endpoint: BATCH_ENDPOINT,
            completion_window: "24h",
            metadata: BTreeMap::from([("source", "memory-index")]),
        };
        let response = check(
            self.client
                .post(self.url("batches"))
                .json(&request)
                .send()
                .await,
        )
        .await?;
        decode_json(response).await
    }

    async fn batch_status(
        &self,
        job_id: &str,
    ) -> std::result::Result<BatchJobStatus, ProviderError> {
        let response = check(
            self.client
                .get(self.url(&format!("batches/{job_id}")))
                .send()
                .await,
        )
        .await?;
        decode_json(response).await
    }

    async fn download_file(&self, file_id: &str) -> std::result::Result<Vec<u8>, ProviderError> {
        let response = check(
            self.client
                .get(self.url(&format!("files/{file_id}/content")))
                .send()
                .await,
        )
        .await?;
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|e| transport_error(&e))
    }
}
