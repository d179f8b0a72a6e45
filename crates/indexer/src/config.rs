use memory_chunker::ChunkerConfig;
use memory_embeddings::{BatchConfig, DirectConfig, RetryPolicy, MAX_REQUESTS_PER_JOB};
use memory_search::{HybridWeights, QueryOptions};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_STORE_PATH: &str = "{workspace}/.memory/{agentId}.json";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("memory search is disabled")]
    Disabled,

    #[error("agent id must be a non-empty file-name-safe string, got {0:?}")]
    InvalidAgentId(String),

    #[error("memory search requires a workspace directory")]
    MissingWorkspace,

    #[error("workspace {0} is not a directory")]
    WorkspaceNotFound(PathBuf),

    #[error("embedding model is not configured")]
    MissingModel,

    #[error("invalid chunking: {0}")]
    Chunking(String),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("failed to parse memory search settings: {0}")]
    Parse(String),
}

/// Memory search settings as they appear in configuration files (camelCase keys)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct MemorySearchSettings {
    pub enabled: bool,
    pub provider: String,
    pub model: String,
    pub workspace: Option<PathBuf>,
    /// Files or directories, relative to the workspace, that hold memory documents
    pub memory_paths: Vec<String>,
    pub extensions: Vec<String>,
    pub store: StoreSettings,
    pub chunking: ChunkingSettings,
    pub sync: SyncSettings,
    pub query: QuerySettings,
    pub remote: RemoteSettings,
    pub embedding: EmbeddingSettings,
    pub cache: CacheSettings,
}

impl Default for MemorySearchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            workspace: None,
            memory_paths: vec!["MEMORY.md".to_string(), "memory".to_string()],
            extensions: vec!["md".to_string(), "markdown".to_string(), "txt".to_string()],
            store: StoreSettings::default(),
            chunking: ChunkingSettings::default(),
            sync: SyncSettings::default(),
            query: QuerySettings::default(),
            remote: RemoteSettings::default(),
            embedding: EmbeddingSettings::default(),
            cache: CacheSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreSettings {
    /// Supports `{workspace}` and `{agentId}` tokens; relative paths resolve against the workspace
    pub path: String,
    pub vector: VectorSettings,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: DEFAULT_STORE_PATH.to_string(),
            vector: VectorSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct VectorSettings {
    pub enabled: bool,
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct ChunkingSettings {
    pub tokens: usize,
    pub overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        let defaults = ChunkerConfig::default();
        Self {
            tokens: defaults.tokens,
            overlap: defaults.overlap,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncSettings {
    pub watch: bool,
    pub watch_debounce_ms: u64,
    pub on_session_start: bool,
    pub on_search: bool,
    /// Periodic background sync; 0 disables it
    pub interval_minutes: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            watch: true,
            watch_debounce_ms: 1_500,
            on_session_start: true,
            on_search: true,
            interval_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct QuerySettings {
    pub max_results: usize,
    pub min_score: f32,
    pub hybrid: HybridSettings,
}

impl Default for QuerySettings {
    fn default() -> Self {
        let defaults = QueryOptions::default();
        Self {
            max_results: defaults.max_results,
            min_score: defaults.min_score,
            hybrid: HybridSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct HybridSettings {
    pub enabled: bool,
    pub vector_weight: f32,
    pub text_weight: f32,
}

impl Default for HybridSettings {
    fn default() -> Self {
        let defaults = HybridWeights::default();
        Self {
            enabled: defaults.enabled,
            vector_weight: defaults.vector,
            text_weight: defaults.text,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteSettings {
    pub base_url: Option<String>,
    /// Falls back to `OPENAI_API_KEY`
    pub api_key: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub batch: RemoteBatchSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct RemoteBatchSettings {
    pub enabled: bool,
    pub wait: bool,
    pub poll_interval_ms: u64,
    pub timeout_minutes: u64,
    /// Consecutive pipeline failures before the batch path is disabled
    pub failure_threshold: u32,
}

impl Default for RemoteBatchSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            wait: true,
            poll_interval_ms: 2_000,
            timeout_minutes: 60,
            failure_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct EmbeddingSettings {
    pub max_batch_bytes: usize,
    pub retry: RetrySettings,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            max_batch_bytes: DirectConfig::default().max_batch_bytes,
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheSettings {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: memory_store::DEFAULT_CACHE_ENTRIES,
        }
    }
}

/// Validated settings for one agent
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub agent_id: String,
    pub provider: String,
    pub model: String,
    pub workspace: PathBuf,
    pub memory_paths: Vec<String>,
    /// Lowercase, without the leading dot
    pub extensions: Vec<String>,
    pub store_path: PathBuf,
    pub vector_enabled: bool,
    pub chunker: ChunkerConfig,
    pub sync: ResolvedSync,
    pub query: QueryOptions,
    pub hybrid: HybridWeights,
    pub remote: ResolvedRemote,
    /// `None` when the remote batch path is not configured
    pub batch: Option<ResolvedBatch>,
    pub direct: DirectConfig,
    /// `None` when the embedding cache is disabled
    pub cache_entries: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSync {
    pub watch: bool,
    pub debounce: Duration,
    pub on_session_start: bool,
    pub on_search: bool,
    pub interval: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRemote {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBatch {
    pub pipeline: BatchConfig,
    pub failure_threshold: u32,
}

impl MemorySearchSettings {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Validate for `agent_id`, reading the API key fallback from the process environment.
    pub fn resolve(&self, agent_id: &str) -> Result<ResolvedConfig, ConfigError> {
        self.resolve_with_env(agent_id, |key| std::env::var(key).ok())
    }

    pub fn resolve_with_env(
        &self,
        agent_id: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<ResolvedConfig, ConfigError> {
        if !self.enabled {
            return Err(ConfigError::Disabled);
        }
        let agent_id = agent_id.trim();
        if !is_file_name_safe(agent_id) {
            return Err(ConfigError::InvalidAgentId(agent_id.to_string()));
        }

        let workspace = self.workspace.clone().ok_or(ConfigError::MissingWorkspace)?;
        if !workspace.is_dir() {
            return Err(ConfigError::WorkspaceNotFound(workspace));
        }

        let model = self.model.trim();
        if model.is_empty() {
            return Err(ConfigError::MissingModel);
        }
        let provider = self.provider.trim();
        if provider.is_empty() {
            return Err(invalid("provider", "must not be empty"));
        }

        let memory_paths = self.resolve_memory_paths()?;
        let extensions: Vec<String> = self
            .extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        if extensions.is_empty() {
            return Err(invalid("extensions", "at least one extension is required"));
        }

        let chunker = ChunkerConfig {
            tokens: self.chunking.tokens,
            overlap: self.chunking.overlap,
        };
        chunker
            .validate()
            .map_err(|e| ConfigError::Chunking(e.to_string()))?;

        let query = &self.query;
        if !(0.0..=1.0).contains(&query.min_score) {
            return Err(invalid("query.minScore", "must be within [0, 1]"));
        }
        if query.max_results == 0 {
            return Err(invalid("query.maxResults", "must be at least 1"));
        }
        let hybrid = &query.hybrid;
        for (key, weight) in [
            ("query.hybrid.vectorWeight", hybrid.vector_weight),
            ("query.hybrid.textWeight", hybrid.text_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(invalid(key, "must be a non-negative number"));
            }
        }
        if hybrid.vector_weight + hybrid.text_weight <= 0.0 {
            return Err(invalid("query.hybrid", "weights must not both be zero"));
        }

        let retry = &self.embedding.retry;
        if retry.max_attempts == 0 {
            return Err(invalid("embedding.retry.maxAttempts", "must be at least 1"));
        }
        if self.embedding.max_batch_bytes == 0 {
            return Err(invalid("embedding.maxBatchBytes", "must be at least 1"));
        }
        let retry = RetryPolicy {
            max_attempts: retry.max_attempts,
            base_delay: Duration::from_millis(retry.base_delay_ms),
            max_delay: Duration::from_millis(retry.max_delay_ms.max(retry.base_delay_ms)),
        };

        let batch = if self.remote.batch.enabled {
            Some(self.resolve_batch(retry)?)
        } else {
            None
        };

        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(invalid("cache.maxEntries", "must be at least 1"));
        }

        let api_key = self
            .remote
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| env(OPENAI_API_KEY_ENV).filter(|key| !key.trim().is_empty()));

        Ok(ResolvedConfig {
            agent_id: agent_id.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            store_path: expand_store_path(&self.store.path, &workspace, agent_id),
            workspace,
            memory_paths,
            extensions,
            vector_enabled: self.store.vector.enabled,
            chunker,
            sync: ResolvedSync {
                watch: self.sync.watch,
                debounce: Duration::from_millis(self.sync.watch_debounce_ms),
                on_session_start: self.sync.on_session_start,
                on_search: self.sync.on_search,
                interval: (self.sync.interval_minutes > 0)
                    .then(|| Duration::from_secs(self.sync.interval_minutes * 60)),
            },
            query: QueryOptions {
                max_results: query.max_results,
                min_score: query.min_score,
            },
            hybrid: HybridWeights {
                enabled: hybrid.enabled,
                vector: hybrid.vector_weight,
                text: hybrid.text_weight,
            },
            remote: ResolvedRemote {
                base_url: self.remote.base_url.clone(),
                api_key,
                headers: self.remote.headers.clone(),
            },
            batch,
            direct: DirectConfig {
                max_batch_bytes: self.embedding.max_batch_bytes,
                retry,
            },
            cache_entries: self.cache.enabled.then_some(self.cache.max_entries),
        })
    }

    fn resolve_memory_paths(&self) -> Result<Vec<String>, ConfigError> {
        let mut out = Vec::with_capacity(self.memory_paths.len());
        for raw in &self.memory_paths {
            let trimmed = raw.trim().trim_end_matches('/');
            let path = Path::new(trimmed);
            let escapes = path
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
            if trimmed.is_empty() || escapes {
                return Err(invalid(
                    "memoryPaths",
                    format!("{raw:?} must be a relative path inside the workspace"),
                ));
            }
            out.push(trimmed.replace('\\', "/"));
        }
        if out.is_empty() {
            return Err(invalid("memoryPaths", "at least one path is required"));
        }
        Ok(out)
    }

    fn resolve_batch(&self, create_retry: RetryPolicy) -> Result<ResolvedBatch, ConfigError> {
        let batch = &self.remote.batch;
        if batch.poll_interval_ms == 0 {
            return Err(invalid("remote.batch.pollIntervalMs", "must be at least 1"));
        }
        if batch.timeout_minutes == 0 {
            return Err(invalid("remote.batch.timeoutMinutes", "must be at least 1"));
        }
        if batch.failure_threshold == 0 {
            return Err(invalid("remote.batch.failureThreshold", "must be at least 1"));
        }
        Ok(ResolvedBatch {
            pipeline: BatchConfig {
                wait: batch.wait,
                poll_interval: Duration::from_millis(batch.poll_interval_ms),
                timeout: Duration::from_secs(batch.timeout_minutes * 60),
                create_retry,
                max_requests_per_job: MAX_REQUESTS_PER_JOB,
            },
            failure_threshold: batch.failure_threshold,
        })
    }
}

/// JSON schema of the settings document.
#[must_use]
pub fn settings_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(MemorySearchSettings)).unwrap_or_default()
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

fn is_file_name_safe(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn expand_store_path(template: &str, workspace: &Path, agent_id: &str) -> PathBuf {
    let template = if template.trim().is_empty() {
        DEFAULT_STORE_PATH
    } else {
        template.trim()
    };
    let expanded = template
        .replace("{workspace}", &workspace.to_string_lossy())
        .replace("{agentId}", agent_id);
    let path = PathBuf::from(expanded);
    if path.is_absolute() {
        path
    } else {
        workspace.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn settings(workspace: &Path) -> MemorySearchSettings {
        MemorySearchSettings {
            workspace: Some(workspace.to_path_buf()),
            ..MemorySearchSettings::default()
        }
    }

    #[test]
    fn defaults_resolve() {
        let dir = TempDir::new().unwrap();
        let resolved = settings(dir.path())
            .resolve_with_env("main", |_| Some("sk-env".into()))
            .unwrap();

        assert_eq!(resolved.store_path, dir.path().join(".memory").join("main.json"));
        assert_eq!(resolved.chunker, ChunkerConfig { tokens: 400, overlap: 80 });
        assert_eq!(resolved.query, QueryOptions::default());
        assert_eq!(resolved.direct.max_batch_bytes, 8_000);
        assert_eq!(resolved.remote.api_key.as_deref(), Some("sk-env"));
        assert_eq!(resolved.batch, None);
        assert_eq!(resolved.sync.interval, None);
        assert_eq!(resolved.sync.debounce, Duration::from_millis(1_500));
        assert_eq!(resolved.cache_entries, Some(10_000));
        assert_eq!(resolved.extensions, vec!["md", "markdown", "txt"]);
    }

    #[test]
    fn parses_camel_case_toml() {
        let dir = TempDir::new().unwrap();
        let text = format!(
            r#"
            model = "text-embedding-3-large"
            workspace = "{}"
            memoryPaths = ["NOTES.md", "journal/"]
            extensions = [".MD"]

            [store]
            path = "state/{{agentId}}.index.json"

            [chunking]
            tokens = 200
            overlap = 20

            [sync]
            intervalMinutes = 15

            [remote]
            apiKey = "sk-file"

            [remote.batch]
            enabled = true
            wait = false
            failureThreshold = 3
            "#,
            dir.path().display()
        );
        let resolved = MemorySearchSettings::from_toml_str(&text)
            .unwrap()
            .resolve_with_env("ops", |_| Some("sk-env".into()))
            .unwrap();

        assert_eq!(resolved.model, "text-embedding-3-large");
        assert_eq!(resolved.memory_paths, vec!["NOTES.md", "journal"]);
        assert_eq!(resolved.extensions, vec!["md"]);
        assert_eq!(
            resolved.store_path,
            dir.path().join("state").join("ops.index.json")
        );
        assert_eq!(resolved.chunker.tokens, 200);
        assert_eq!(resolved.sync.interval, Some(Duration::from_secs(900)));
        assert_eq!(resolved.remote.api_key.as_deref(), Some("sk-file"));
        let batch = resolved.batch.unwrap();
        assert!(!batch.pipeline.wait);
        assert_eq!(batch.failure_threshold, 3);
        assert_eq!(batch.pipeline.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn rejects_invalid_settings() {
        let dir = TempDir::new().unwrap();
        let env = |_: &str| None;

        let disabled = MemorySearchSettings {
            enabled: false,
            ..settings(dir.path())
        };
        assert_eq!(disabled.resolve_with_env("a", env), Err(ConfigError::Disabled));

        assert_eq!(
            MemorySearchSettings::default().resolve_with_env("a", env),
            Err(ConfigError::MissingWorkspace)
        );
        assert!(matches!(
            settings(dir.path()).resolve_with_env("../escape", env),
            Err(ConfigError::InvalidAgentId(_))
        ));

        let mut overlap = settings(dir.path());
        overlap.chunking.overlap = 400;
        assert!(matches!(
            overlap.resolve_with_env("a", env),
            Err(ConfigError::Chunking(_))
        ));

        let mut score = settings(dir.path());
        score.query.min_score = 1.5;
        assert!(matches!(
            score.resolve_with_env("a", env),
            Err(ConfigError::Invalid { key: "query.minScore", .. })
        ));

        let mut escape = settings(dir.path());
        escape.memory_paths = vec!["../secrets".into()];
        assert!(matches!(
            escape.resolve_with_env("a", env),
            Err(ConfigError::Invalid { key: "memoryPaths", .. })
        ));

        let mut threshold = settings(dir.path());
        threshold.remote.batch.enabled = true;
        threshold.remote.batch.failure_threshold = 0;
        assert!(matches!(
            threshold.resolve_with_env("a", env),
            Err(ConfigError::Invalid { key: "remote.batch.failureThreshold", .. })
        ));
    }

    #[test]
    fn schema_lists_camel_case_keys() {
        let schema = settings_schema();
        assert!(schema["properties"]["memoryPaths"].is_object());
        assert!(schema["properties"]["store"].is_object());
    }
}
