use crate::cancel::CancelSignal;
use crate::error::{EmbeddingError, Result};
use crate::provider::{BatchJobStatus, BatchState, BatchTransport};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Endpoint every request line targets
pub const BATCH_ENDPOINT: &str = "/v1/embeddings";

/// Provider limit on request lines per uploaded file
pub const MAX_REQUESTS_PER_JOB: usize = 50_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Poll until completion; when false jobs are submitted and reconciled later
    pub wait: bool,
    pub poll_interval: Duration,
    /// Upper bound on how long one job may be polled
    pub timeout: Duration,
    /// Retry policy for job creation
    pub create_retry: RetryPolicy,
    pub max_requests_per_job: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            wait: true,
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(60 * 60),
            create_retry: RetryPolicy::default(),
            max_requests_per_job: MAX_REQUESTS_PER_JOB,
        }
    }
}

/// One chunk to embed, tagged with its correlation id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub custom_id: String,
    pub text: String,
}

/// A job submitted without waiting, to be checked on a later sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBatchJob {
    pub job_id: String,
    pub custom_ids: Vec<String>,
    pub submitted_at: Instant,
}

#[derive(Debug)]
pub enum BatchOutcome {
    /// Embeddings keyed by `custom_id`
    Completed(HashMap<String, Vec<f32>>),
    /// Jobs left running. When `failure` is set a later group could not be submitted
    /// and its requests were never sent.
    Submitted {
        jobs: Vec<PendingBatchJob>,
        failure: Option<EmbeddingError>,
    },
}

#[derive(Debug)]
pub enum PendingCheck {
    Running,
    Completed(HashMap<String, Vec<f32>>),
}

#[derive(Serialize)]
struct RequestLine<'a> {
    custom_id: &'a str,
    method: &'static str,
    url: &'static str,
    body: RequestBody<'a>,
}

#[derive(Serialize)]
struct RequestBody<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct OutputLine {
    custom_id: String,
    #[serde(default)]
    response: Option<OutputResponse>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct OutputResponse {
    status_code: u16,
    #[serde(default)]
    body: Option<OutputBody>,
}

#[derive(Deserialize)]
struct OutputBody {
    #[serde(default)]
    data: Vec<OutputEmbedding>,
}

#[derive(Deserialize)]
struct OutputEmbedding {
    embedding: Vec<f32>,
}

/// Serialize requests as newline-delimited JSON, one request per line.
pub fn encode_requests(model: &str, requests: &[BatchRequest]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for request in requests {
        let line = RequestLine {
            custom_id: &request.custom_id,
            method: "POST",
            url: BATCH_ENDPOINT,
            body: RequestBody {
                model,
                input: &request.text,
            },
        };
        serde_json::to_writer(&mut out, &line)?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Parse an output file into embeddings keyed by `custom_id`.
///
/// Any line carrying an error, a non-200 status, or no embedding fails the whole file.
pub fn decode_output(bytes: &[u8]) -> Result<HashMap<String, Vec<f32>>> {
    let text = String::from_utf8_lossy(bytes);
    let mut out = HashMap::new();

    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let parsed: OutputLine = serde_json::from_str(line)?;
        let id = parsed.custom_id;
        if let Some(err) = parsed.error.filter(|e| !e.is_null()) {
            return Err(EmbeddingError::BatchOutput(format!("{id}: {err}")));
        }
        let response = parsed
            .response
            .ok_or_else(|| EmbeddingError::BatchOutput(format!("{id}: missing response")))?;
        if response.status_code != 200 {
            return Err(EmbeddingError::BatchOutput(format!(
                "{id}: status {}",
                response.status_code
            )));
        }
        let embedding = response
            .body
            .and_then(|body| body.data.into_iter().next())
            .map(|item| item.embedding)
            .filter(|embedding| !embedding.is_empty())
            .ok_or_else(|| EmbeddingError::BatchOutput(format!("{id}: missing embedding")))?;
        out.insert(id, embedding);
    }

    Ok(out)
}

/// One remote batch attempt over a provider's batch transport
pub struct BatchPipeline<'a> {
    transport: &'a dyn BatchTransport,
    model: &'a str,
    config: BatchConfig,
    cancel: CancelSignal,
}

impl<'a> BatchPipeline<'a> {
    #[must_use]
    pub fn new(
        transport: &'a dyn BatchTransport,
        model: &'a str,
        config: BatchConfig,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            transport,
            model,
            config,
            cancel,
        }
    }

    /// Submit every request and, when waiting, reconcile the results by `custom_id`.
    pub async fn run(&self, requests: &[BatchRequest]) -> Result<BatchOutcome> {
        if let Some(pos) = requests.iter().position(|r| r.text.trim().is_empty()) {
            return Err(EmbeddingError::EmptyInput(pos));
        }

        let mut embeddings = HashMap::with_capacity(requests.len());
        let mut submitted = Vec::new();

        for group in requests.chunks(self.config.max_requests_per_job.max(1)) {
            let job = match self.submit(group).await {
                Ok(job) => job,
                Err(err) if !self.config.wait && !submitted.is_empty() && !err.is_cancelled() => {
                    log::warn!(
                        "Batch submission stopped after {} jobs: {err}",
                        submitted.len()
                    );
                    return Ok(BatchOutcome::Submitted {
                        jobs: submitted,
                        failure: Some(err),
                    });
                }
                Err(err) => return Err(err),
            };
            let custom_ids: Vec<String> = group.iter().map(|r| r.custom_id.clone()).collect();

            if !self.config.wait {
                log::info!(
                    "Submitted batch job {} ({} requests) without waiting",
                    job.id,
                    custom_ids.len()
                );
                submitted.push(PendingBatchJob {
                    job_id: job.id,
                    custom_ids,
                    submitted_at: Instant::now(),
                });
                continue;
            }

            let finished = self.wait_for_completion(job).await?;
            embeddings.extend(self.collect_output(&finished, &custom_ids).await?);
        }

        if self.config.wait {
            Ok(BatchOutcome::Completed(embeddings))
        } else {
            Ok(BatchOutcome::Submitted {
                jobs: submitted,
                failure: None,
            })
        }
    }

    /// Look at a previously submitted job once, without polling. A job older than the
    /// configured timeout fails without touching the transport.
    pub async fn check_pending(&self, pending: &PendingBatchJob) -> Result<PendingCheck> {
        self.cancel.check()?;
        if pending.submitted_at.elapsed() >= self.config.timeout {
            return Err(EmbeddingError::BatchTimeout {
                job_id: pending.job_id.clone(),
                timeout: self.config.timeout,
            });
        }
        let status = self.transport.batch_status(&pending.job_id).await?;
        match status.status {
            BatchState::Completed => Ok(PendingCheck::Completed(
                self.collect_output(&status, &pending.custom_ids).await?,
            )),
            state if state.is_terminal() => Err(EmbeddingError::BatchFailed {
                job_id: status.id,
                status: state.as_str().to_string(),
            }),
            _ => Ok(PendingCheck::Running),
        }
    }

    async fn submit(&self, group: &[BatchRequest]) -> Result<BatchJobStatus> {
        let payload = encode_requests(self.model, group)?;
        self.cancel.check()?;
        let file_id = self.transport.upload_file(payload).await?;
        log::debug!("Uploaded batch input {file_id} ({} requests)", group.len());

        let job = self
            .config
            .create_retry
            .run("create batch", &self.cancel, |_| {
                self.transport.create_batch(&file_id)
            })
            .await?;
        log::info!("Created batch job {} from {file_id}", job.id);
        Ok(job)
    }

    async fn wait_for_completion(&self, mut job: BatchJobStatus) -> Result<BatchJobStatus> {
        let started = Instant::now();
        loop {
            match job.status {
                BatchState::Completed => return Ok(job),
                state if state.is_terminal() => {
                    return Err(EmbeddingError::BatchFailed {
                        job_id: job.id,
                        status: state.as_str().to_string(),
                    })
                }
                _ => {}
            }
            if started.elapsed() >= self.config.timeout {
                return Err(EmbeddingError::BatchTimeout {
                    job_id: job.id,
                    timeout: self.config.timeout,
                });
            }

            self.cancel.sleep(self.config.poll_interval).await?;
            match self.transport.batch_status(&job.id).await {
                Ok(next) => {
                    log::debug!("Batch job {} is {}", next.id, next.status.as_str());
                    job = next;
                }
                Err(err) if err.is_transient() => {
                    log::warn!("Polling batch job {} failed: {err}", job.id);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn collect_output(
        &self,
        job: &BatchJobStatus,
        expected: &[String],
    ) -> Result<HashMap<String, Vec<f32>>> {
        let file_id = job.output_file_id.as_deref().ok_or_else(|| {
            EmbeddingError::BatchOutput(format!("job {} completed without an output file", job.id))
        })?;
        self.cancel.check()?;
        let bytes = self.transport.download_file(file_id).await?;
        let mut decoded = decode_output(&bytes)?;

        let mut out = HashMap::with_capacity(expected.len());
        for id in expected {
            let embedding = decoded
                .remove(id)
                .ok_or_else(|| EmbeddingError::BatchOutput(format!("missing result for {id}")))?;
            out.insert(id.clone(), embedding);
        }
        if !decoded.is_empty() {
            log::debug!(
                "Ignoring {} unexpected result lines from job {}",
                decoded.len(),
                job.id
            );
        }
        Ok(out)
    }
}
