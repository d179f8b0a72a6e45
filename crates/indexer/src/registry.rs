use crate::config::{MemorySearchSettings, ResolvedConfig};
use crate::manager::MemoryIndexManager;
use log::{debug, info, warn};
use memory_embeddings::{EmbeddingProvider, OpenAiConfig, OpenAiProvider};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ManagerKey {
    agent_id: String,
    workspace: PathBuf,
    store_path: PathBuf,
}

impl ManagerKey {
    fn of(config: &ResolvedConfig) -> Self {
        Self {
            agent_id: config.agent_id.clone(),
            workspace: config.workspace.clone(),
            store_path: config.store_path.clone(),
        }
    }
}

/// Explicit cache of open managers, one per `(agent, workspace, store path)`
#[derive(Default)]
pub struct ManagerRegistry {
    managers: Mutex<HashMap<ManagerKey, Arc<MemoryIndexManager>>>,
}

impl ManagerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.managers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.managers.lock().await.is_empty()
    }

    /// Close every cached manager and forget them.
    pub async fn close_all(&self) {
        let managers: Vec<_> = self.managers.lock().await.drain().map(|(_, m)| m).collect();
        for manager in managers {
            if let Err(err) = manager.close().await {
                warn!(
                    "Failed to close memory index for {}: {err}",
                    manager.config().agent_id
                );
            }
        }
    }
}

pub struct ManagerRequest {
    pub settings: MemorySearchSettings,
    pub agent_id: String,
    /// Use this provider instead of building one from the settings
    pub provider: Option<Arc<dyn EmbeddingProvider>>,
}

impl ManagerRequest {
    #[must_use]
    pub fn new(settings: MemorySearchSettings, agent_id: impl Into<String>) -> Self {
        Self {
            settings,
            agent_id: agent_id.into(),
            provider: None,
        }
    }

    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }
}

/// Outcome of a manager lookup; `manager` is `None` exactly when `reason` is set
pub struct ManagerLookup {
    pub manager: Option<Arc<MemoryIndexManager>>,
    pub reason: Option<String>,
}

impl ManagerLookup {
    fn found(manager: Arc<MemoryIndexManager>) -> Self {
        Self {
            manager: Some(manager),
            reason: None,
        }
    }

    fn unavailable(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        debug!("Memory search unavailable: {reason}");
        Self {
            manager: None,
            reason: Some(reason),
        }
    }
}

/// Return the cached manager for the request, opening one on first use.
///
/// Disabled or invalid settings, a provider that cannot be built and a store that cannot
/// be opened all yield `None` with a reason; this never fails.
pub async fn get_memory_search_manager(
    registry: &ManagerRegistry,
    request: ManagerRequest,
) -> ManagerLookup {
    let config = match request.settings.resolve(&request.agent_id) {
        Ok(config) => config,
        Err(err) => return ManagerLookup::unavailable(err.to_string()),
    };
    let key = ManagerKey::of(&config);

    let mut managers = registry.managers.lock().await;
    if let Some(manager) = managers.get(&key) {
        if !manager.is_closed() && manager.serves(&config, request.provider.as_deref()) {
            return ManagerLookup::found(Arc::clone(manager));
        }
    }
    if let Some(stale) = managers.remove(&key) {
        if !stale.is_closed() {
            info!(
                "Memory settings for agent {} changed, reopening the index",
                config.agent_id
            );
            if let Err(err) = stale.close().await {
                warn!("Failed to close memory index for {}: {err}", config.agent_id);
            }
        }
    }

    let provider = match request.provider {
        Some(provider) => provider,
        None => match build_provider(&config) {
            Ok(provider) => provider,
            Err(reason) => return ManagerLookup::unavailable(reason),
        },
    };

    match MemoryIndexManager::open(config, provider).await {
        Ok(manager) => {
            managers.insert(key, Arc::clone(&manager));
            ManagerLookup::found(manager)
        }
        Err(err) => ManagerLookup::unavailable(format!("failed to open memory index: {err}")),
    }
}

fn build_provider(config: &ResolvedConfig) -> Result<Arc<dyn EmbeddingProvider>, String> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = config
                .remote
                .api_key
                .clone()
                .ok_or_else(|| "no API key configured for the openai provider".to_string())?;
            let mut openai = OpenAiConfig::new(api_key, config.model.clone());
            if let Some(base_url) = &config.remote.base_url {
                openai.base_url.clone_from(base_url);
            }
            openai.headers.clone_from(&config.remote.headers);
            openai.batch = config.batch.is_some();
            let provider = OpenAiProvider::new(openai).map_err(|e| e.to_string())?;
            Ok(Arc::new(provider))
        }
        other => Err(format!("unsupported embedding provider: {other}")),
    }
}
