use crate::config::{ConfigError, ResolvedConfig};
use crate::dirty::{DirtyTracker, DocumentScanner, ScannedDocument};
use crate::status::{MemoryStatus, SyncOptions, SyncProgress, SyncReport};
use crate::sync_state::{PendingBatch, SyncState};
use crate::watcher::{MemoryWatcher, WatcherConfig};
use crate::{IndexerError, Result};
use log::{debug, error, info, warn};
use memory_chunker::{content_digest, Chunker, MemoryChunk};
use memory_embeddings::{
    cancel_pair, BatchOutcome, BatchPipeline, BatchRequest, CancelHandle, DirectEmbedder,
    EmbeddingProvider, PendingCheck,
};
use memory_search::{HybridSearch, MemorySearchResult, QueryOptions};
use memory_store::{
    DocumentRecord, EmbeddingCache, MemoryStore, StoreMeta, StoredChunk, VectorBackend,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as TokioMutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A document read during this pass, waiting for its embeddings
struct StagedDocument {
    record: DocumentRecord,
    chunks: Vec<MemoryChunk>,
    embeddings: Vec<Option<Vec<f32>>>,
    committed: bool,
    /// Left dirty for a later pass (waiting on a detached batch job)
    deferred: bool,
}

impl StagedDocument {
    fn is_ready(&self) -> bool {
        !self.committed && !self.deferred && self.embeddings.iter().all(Option::is_some)
    }

    fn missing(&self) -> impl Iterator<Item = usize> + '_ {
        self.embeddings
            .iter()
            .enumerate()
            .filter(|(_, embedding)| embedding.is_none())
            .map(|(idx, _)| idx)
    }
}

/// Owns the memory index of one agent workspace
///
/// Syncs are single-flight. Queries read the store concurrently with a running sync and
/// only ever observe whole documents, since the store write lock is held for one
/// document commit at a time.
pub struct MemoryIndexManager {
    this: Weak<MemoryIndexManager>,
    config: ResolvedConfig,
    provider: Arc<dyn EmbeddingProvider>,
    chunker: Chunker,
    search: HybridSearch,
    scanner: DocumentScanner,
    store: RwLock<MemoryStore>,
    tracker: Mutex<DirtyTracker>,
    state: Mutex<SyncState>,
    cache: Option<Mutex<EmbeddingCache>>,
    sync_lock: TokioMutex<()>,
    cancel: CancelHandle,
    closed: AtomicBool,
    background_pending: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    interval_task: Mutex<Option<JoinHandle<()>>>,
    watcher: Mutex<Option<MemoryWatcher>>,
}

impl MemoryIndexManager {
    /// Open (or create) the store, reconcile it with the active provider and chunking,
    /// then start the watcher and interval triggers that the configuration asks for.
    pub async fn open(
        config: ResolvedConfig,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Arc<Self>> {
        let chunker =
            Chunker::new(config.chunker).map_err(|e| ConfigError::Chunking(e.to_string()))?;

        let mut store = match MemoryStore::open(&config.store_path).await {
            Ok(store) => store,
            Err(err) => {
                warn!(
                    "Memory store {} is unreadable, starting fresh: {err}",
                    config.store_path.display()
                );
                MemoryStore::new(&config.store_path)
            }
        };
        let change = store.ensure_meta(StoreMeta {
            provider: provider.id().to_string(),
            model: provider.model().to_string(),
            chunk_tokens: config.chunker.tokens,
            chunk_overlap: config.chunker.overlap,
        });

        let mut tracker = DirtyTracker::new();
        tracker.seed(&store);
        if change.requires_full_reindex() {
            tracker.mark_all();
        }

        let cache = config.cache_entries.map(|max_entries| {
            let mut cache = EmbeddingCache::new(max_entries);
            let seeded = cache.seed_from(&store);
            debug!("Seeded embedding cache with {seeded} vectors");
            Mutex::new(cache)
        });

        let search = if config.vector_enabled {
            HybridSearch::new(config.hybrid, Some(VectorBackend))
        } else {
            HybridSearch::lexical_only()
        };

        let mut state = SyncState::new(config.batch.as_ref().map(|b| b.failure_threshold));
        state.documents = store.document_count();
        state.chunks = store.chunk_count();

        let scanner = DocumentScanner::new(
            &config.workspace,
            config.memory_paths.clone(),
            config.extensions.clone(),
        );
        let (cancel, _) = cancel_pair();

        info!(
            "Opened memory index for agent {} ({} documents, {} chunks, {}/{})",
            config.agent_id,
            state.documents,
            state.chunks,
            provider.id(),
            provider.model()
        );

        let manager = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            config,
            provider,
            chunker,
            search,
            scanner,
            store: RwLock::new(store),
            tracker: Mutex::new(tracker),
            state: Mutex::new(state),
            cache,
            sync_lock: TokioMutex::new(()),
            cancel,
            closed: AtomicBool::new(false),
            background_pending: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            interval_task: Mutex::new(None),
            watcher: Mutex::new(None),
        });
        manager.start_background();
        Ok(manager)
    }

    fn start_background(&self) {
        if self.config.sync.watch {
            match MemoryWatcher::start(
                self.this.clone(),
                self.scanner.clone(),
                WatcherConfig::with_debounce(self.config.sync.debounce),
            ) {
                Ok(watcher) => *lock(&self.watcher) = Some(watcher),
                Err(err) => warn!("Memory watcher disabled: {err}"),
            }
        }
        if let Some(period) = self.config.sync.interval {
            *lock(&self.interval_task) = Some(self.spawn_interval(period));
        }
    }

    fn spawn_interval(&self, period: Duration) -> JoinHandle<()> {
        let this = self.this.clone();
        let cancel = self.cancel.signal();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = cancel.cancelled() => break,
                }
                let Some(manager) = this.upgrade() else { break };
                manager.spawn_sync("interval");
            }
        })
    }

    #[must_use]
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Whether this manager was opened with `config` and, when given, a provider for
    /// the same service and model.
    pub(crate) fn serves(
        &self,
        config: &ResolvedConfig,
        provider: Option<&dyn EmbeddingProvider>,
    ) -> bool {
        self.config == *config
            && provider.map_or(true, |provider| {
                provider.id() == self.provider.id() && provider.model() == self.provider.model()
            })
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        lock(&self.state).dirty || lock(&self.tracker).is_dirty()
    }

    /// Mark one document (or, with `None`, every document) for the next sync.
    pub fn mark_dirty(&self, path: Option<&str>) {
        {
            let mut tracker = lock(&self.tracker);
            match path {
                Some(path) => tracker.mark(path),
                None => tracker.mark_all(),
            }
        }
        lock(&self.state).dirty = true;
    }

    /// Start one background sync per session key when session warm-up is enabled.
    pub fn warm_session(&self, session_key: &str) -> bool {
        if !self.config.sync.on_session_start || self.is_closed() {
            return false;
        }
        if !lock(&self.state)
            .warmed_sessions
            .insert(session_key.to_string())
        {
            return false;
        }
        self.spawn_sync("session");
        true
    }

    /// Turn the remote batch path back on after the breaker disabled it.
    pub fn reenable_batch(&self) {
        if let Some(health) = lock(&self.state).batch.as_mut() {
            health.reenable();
            info!("Remote batch embedding re-enabled for {}", self.config.agent_id);
        }
    }

    pub(crate) fn note_watch_changes(&self, paths: Vec<String>, rescan: bool) {
        {
            let mut tracker = lock(&self.tracker);
            for path in &paths {
                tracker.mark(path);
            }
        }
        lock(&self.state).dirty = true;
        debug!(
            "Watcher reported {} memory changes (rescan: {rescan})",
            paths.len()
        );
        self.spawn_sync("watch");
    }

    /// Run a sync in the background unless one is already queued.
    pub fn spawn_sync(&self, reason: &str) -> bool {
        if self.is_closed() || self.background_pending.swap(true, Ordering::SeqCst) {
            return false;
        }
        let Some(this) = self.this.upgrade() else {
            self.background_pending.store(false, Ordering::SeqCst);
            return false;
        };
        let options = SyncOptions::new(reason);
        let handle = tokio::spawn(async move {
            let result = {
                let _guard = this.sync_lock.lock().await;
                this.background_pending.store(false, Ordering::SeqCst);
                this.sync_locked(&options).await
            };
            match result {
                Ok(report) => debug!(
                    "Background memory sync ({}) finished: {} indexed, {} removed",
                    report.reason, report.indexed_documents, report.removed_documents
                ),
                Err(err) if err.is_cancelled() => {
                    debug!("Background memory sync ({}) stopped: {err}", options.reason);
                }
                Err(err) => error!("Background memory sync ({}) failed: {err}", options.reason),
            }
        });

        let mut tasks = lock(&self.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
        true
    }

    /// Bring the index up to date with the memory documents on disk.
    pub async fn sync(&self, options: SyncOptions) -> Result<SyncReport> {
        if self.is_closed() {
            return Err(IndexerError::Closed);
        }
        let _guard = self.sync_lock.lock().await;
        self.sync_locked(&options).await
    }

    async fn sync_locked(&self, options: &SyncOptions) -> Result<SyncReport> {
        if self.is_closed() {
            return Err(IndexerError::Closed);
        }
        let started = Instant::now();
        lock(&self.state).syncing = true;

        let mut report = SyncReport::new(&options.reason);
        let result = self.run_sync(options, &mut report).await;

        // Partial progress is persisted even when the pass failed.
        let saved = if report.noop {
            Ok(())
        } else {
            self.save_store().await
        };
        let result = result.and(saved);

        let (documents, chunks) = {
            let store = self.store.read().await;
            (store.document_count(), store.chunk_count())
        };
        let tracker_dirty = lock(&self.tracker).is_dirty();
        let mut state = lock(&self.state);
        state.syncing = false;
        state.documents = documents;
        state.chunks = chunks;
        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(()) => {
                let dirty = tracker_dirty || state.pending_batch.is_some();
                if report.noop {
                    state.record_noop(dirty);
                    debug!("Memory sync ({}): nothing to do", report.reason);
                } else {
                    state.record_success(dirty);
                    info!(
                        "Memory sync ({}) indexed {} documents, removed {}, embedded {} chunks ({} reused) in {}ms",
                        report.reason,
                        report.indexed_documents,
                        report.removed_documents,
                        report.embedded_chunks,
                        report.cached_chunks,
                        report.duration_ms
                    );
                }
                Ok(report)
            }
            Err(err) => {
                state.record_error(err.to_string());
                Err(err)
            }
        }
    }

    async fn run_sync(&self, options: &SyncOptions, report: &mut SyncReport) -> Result<()> {
        let scanner = self.scanner.clone();
        let scanned = tokio::task::spawn_blocking(move || scanner.scan())
            .await
            .map_err(|e| IndexerError::Other(format!("memory scan task failed: {e}")))?;
        report.scanned = scanned.len();

        let plan = {
            let store = self.store.read().await;
            lock(&self.tracker).plan(&scanned, &store, options.force)
        };
        let has_pending = lock(&self.state).pending_batch.is_some();
        if plan.is_empty() && !has_pending {
            report.noop = true;
            lock(&self.tracker).finish_pass(true);
            return Ok(());
        }

        if !plan.removed.is_empty() {
            let mut store = self.store.write().await;
            let mut tracker = lock(&self.tracker);
            for path in &plan.removed {
                if store.remove_document(path) {
                    report.removed_documents += 1;
                }
                tracker.forget(path);
            }
        }

        let mut staged = self.stage_documents(plan.candidates, options, report).await?;
        self.reuse_embeddings(&mut staged, report).await;

        let pending = lock(&self.state).pending_batch.take();
        let mut batch_failed = false;
        if let Some(pending) = pending.filter(|p| !p.is_empty()) {
            batch_failed = self.reconcile_pending(pending, &mut staged, report).await?;
        }

        self.commit_ready(&mut staged, options, report).await?;

        // A failed detached job falls back to the direct path within this pass.
        if !batch_failed
            && staged.iter().any(|doc| !doc.committed && !doc.deferred)
            && self.batch_eligible()
        {
            self.embed_with_batch(&mut staged, report).await?;
            self.commit_ready(&mut staged, options, report).await?;
        }

        self.embed_direct(&mut staged, options, report).await?;

        report.skipped_documents += staged.iter().filter(|doc| doc.deferred).count();
        lock(&self.tracker).finish_pass(report.skipped_documents == 0);
        Ok(())
    }

    /// Read candidates, confirm changes by digest and chunk what changed.
    async fn stage_documents(
        &self,
        candidates: Vec<ScannedDocument>,
        options: &SyncOptions,
        report: &mut SyncReport,
    ) -> Result<Vec<StagedDocument>> {
        let cancel = self.cancel.signal();
        let mut staged = Vec::new();

        for doc in candidates {
            cancel.check()?;
            let text = match tokio::fs::read_to_string(&doc.abs_path).await {
                Ok(text) => text,
                Err(err) => {
                    warn!("Skipping memory document {}: {err}", doc.path);
                    lock(&self.tracker).mark(&doc.path);
                    report.skipped_documents += 1;
                    continue;
                }
            };

            let digest = content_digest(&text);
            let changed = options.force || lock(&self.tracker).confirm_changed(&doc.path, &digest);
            if !changed {
                self.store
                    .write()
                    .await
                    .touch_document(&doc.path, doc.mtime_ms, doc.size);
                lock(&self.tracker).record_indexed(&doc.path, &digest);
                continue;
            }

            let chunks = self.chunker.chunk(&doc.path, &text);
            // Uncommitted documents stay dirty if this pass fails.
            lock(&self.tracker).mark(&doc.path);
            staged.push(StagedDocument {
                embeddings: vec![None; chunks.len()],
                chunks,
                record: DocumentRecord {
                    path: doc.path,
                    digest,
                    mtime_ms: doc.mtime_ms,
                    size: doc.size,
                },
                committed: false,
                deferred: false,
            });
        }

        report.total_chunks = staged.iter().map(|doc| doc.chunks.len()).sum();
        Ok(staged)
    }

    /// Fill embeddings from the cache, or from stored chunks with identical content.
    async fn reuse_embeddings(&self, staged: &mut [StagedDocument], report: &mut SyncReport) {
        let model = self.provider.model();
        let store = self.store.read().await;
        let mut cache = self.cache.as_ref().map(lock);

        for doc in staged.iter_mut() {
            for (chunk, slot) in doc.chunks.iter().zip(doc.embeddings.iter_mut()) {
                let hit = cache
                    .as_mut()
                    .and_then(|cache| cache.get(model, &chunk.digest))
                    .or_else(|| {
                        store
                            .chunk(&chunk.id())
                            .filter(|stored| stored.digest == chunk.digest)
                            .and_then(|stored| stored.embedding.clone())
                    });
                if hit.is_some() {
                    *slot = hit;
                    report.cached_chunks += 1;
                }
            }
        }
    }

    /// Check detached batch jobs once. Finished vectors are applied; chunks of
    /// still-running jobs are deferred so they are not submitted twice. Returns whether
    /// a job failed.
    ///
    /// With the batch path disabled the jobs are dropped unchecked and their chunks
    /// go to the direct path.
    async fn reconcile_pending(
        &self,
        pending: PendingBatch,
        staged: &mut [StagedDocument],
        report: &mut SyncReport,
    ) -> Result<bool> {
        let (Some(transport), Some(batch)) =
            (self.provider.batch_transport(), self.config.batch.as_ref())
        else {
            warn!("Dropping {} pending batch jobs: batch path unavailable", pending.jobs.len());
            return Ok(false);
        };
        if !lock(&self.state).batch_available() {
            warn!(
                "Dropping {} pending batch jobs: remote batch embedding is disabled",
                pending.jobs.len()
            );
            return Ok(false);
        }
        let model = self.provider.model();
        let pipeline = BatchPipeline::new(
            transport,
            model,
            batch.pipeline.clone(),
            self.cancel.signal(),
        );

        let mut finished: HashMap<String, Vec<f32>> = HashMap::new();
        let mut running = PendingBatch::default();
        let mut failed = false;
        for job in pending.jobs {
            match pipeline.check_pending(&job).await {
                Ok(PendingCheck::Completed(vectors)) => {
                    debug!("Pending batch job {} completed", job.job_id);
                    for (custom_id, vector) in vectors {
                        if let Some(digest) = pending.digests.get(&custom_id) {
                            finished.insert(digest.clone(), vector);
                        }
                    }
                    self.record_batch_success();
                }
                Ok(PendingCheck::Running) => {
                    for custom_id in &job.custom_ids {
                        if let Some(digest) = pending.digests.get(custom_id) {
                            running.digests.insert(custom_id.clone(), digest.clone());
                        }
                    }
                    running.jobs.push(job);
                }
                Err(err) if err.is_cancelled() => return Err(err.into()),
                Err(err) => {
                    warn!("Pending batch job {} failed: {err}", job.job_id);
                    self.record_batch_failure();
                    failed = true;
                }
            }
        }

        if let Some(cache) = &self.cache {
            let mut cache = lock(cache);
            for (digest, vector) in &finished {
                cache.insert(model, digest, vector.clone());
            }
        }

        for doc in staged.iter_mut() {
            for (chunk, slot) in doc.chunks.iter().zip(doc.embeddings.iter_mut()) {
                if slot.is_none() {
                    if let Some(vector) = finished.get(&chunk.digest) {
                        *slot = Some(vector.clone());
                        report.cached_chunks += 1;
                    }
                }
            }
            let waiting = doc
                .missing()
                .any(|idx| running.covers(&doc.chunks[idx].id(), &doc.chunks[idx].digest));
            if waiting {
                doc.deferred = true;
                report.batch_pending = true;
            }
        }

        if !running.is_empty() {
            lock(&self.state).pending_batch = Some(running);
        }
        Ok(failed)
    }

    fn batch_eligible(&self) -> bool {
        self.config.batch.is_some()
            && self.provider.batch_transport().is_some()
            && lock(&self.state).batch_available()
    }

    fn record_batch_success(&self) {
        if let Some(health) = lock(&self.state).batch.as_mut() {
            health.record_success();
        }
    }

    fn record_batch_failure(&self) {
        let mut state = lock(&self.state);
        if let Some(health) = state.batch.as_mut() {
            if health.record_failure() {
                warn!(
                    "Remote batch embedding disabled after {} consecutive failures",
                    health.failures
                );
            }
        }
    }

    /// Run the remote batch pipeline over every missing chunk. A failure is counted and
    /// leaves the chunks to the direct path.
    async fn embed_with_batch(
        &self,
        staged: &mut [StagedDocument],
        report: &mut SyncReport,
    ) -> Result<()> {
        let (Some(transport), Some(batch)) =
            (self.provider.batch_transport(), self.config.batch.as_ref())
        else {
            return Ok(());
        };

        let mut slots: HashMap<String, (usize, usize)> = HashMap::new();
        let mut requests = Vec::new();
        let mut digests = HashMap::new();
        for (doc_idx, doc) in staged.iter().enumerate() {
            if doc.committed || doc.deferred {
                continue;
            }
            for chunk_idx in doc.missing() {
                let chunk = &doc.chunks[chunk_idx];
                let custom_id = chunk.id();
                slots.insert(custom_id.clone(), (doc_idx, chunk_idx));
                digests.insert(custom_id.clone(), chunk.digest.clone());
                requests.push(BatchRequest {
                    custom_id,
                    text: chunk.text.clone(),
                });
            }
        }
        if requests.is_empty() {
            return Ok(());
        }

        let pipeline = BatchPipeline::new(
            transport,
            self.provider.model(),
            batch.pipeline.clone(),
            self.cancel.signal(),
        );
        debug!("Submitting {} chunks to the remote batch pipeline", requests.len());

        match pipeline.run(&requests).await {
            Ok(BatchOutcome::Completed(vectors)) => {
                self.record_batch_success();
                report.batch_used = true;
                for (custom_id, vector) in vectors {
                    if let Some(&(doc_idx, chunk_idx)) = slots.get(&custom_id) {
                        staged[doc_idx].embeddings[chunk_idx] = Some(vector);
                        report.embedded_chunks += 1;
                    }
                }
            }
            // Success is only counted once a detached job is reconciled as completed.
            Ok(BatchOutcome::Submitted { jobs, failure }) => {
                report.batch_used = true;
                report.batch_pending = true;
                let mut submitted = PendingBatch {
                    jobs,
                    digests: HashMap::new(),
                };
                for custom_id in submitted.jobs.iter().flat_map(|job| &job.custom_ids) {
                    if let Some(digest) = digests.get(custom_id) {
                        submitted.digests.insert(custom_id.clone(), digest.clone());
                    }
                    if let Some(&(doc_idx, _)) = slots.get(custom_id) {
                        staged[doc_idx].deferred = true;
                    }
                }
                if let Some(err) = failure {
                    warn!("Remote batch submission incomplete, embedding the rest directly: {err}");
                    self.record_batch_failure();
                }
                lock(&self.state).pending_batch = Some(submitted);
            }
            Err(err) if err.is_cancelled() => return Err(err.into()),
            Err(err) => {
                warn!("Remote batch embedding failed, falling back to direct: {err}");
                self.record_batch_failure();
            }
        }
        Ok(())
    }

    /// Embed what is still missing through `embed_batch`, committing documents as
    /// their last chunk arrives.
    async fn embed_direct(
        &self,
        staged: &mut [StagedDocument],
        options: &SyncOptions,
        report: &mut SyncReport,
    ) -> Result<()> {
        let mut slots = Vec::new();
        let mut texts = Vec::new();
        for (doc_idx, doc) in staged.iter().enumerate() {
            if doc.committed || doc.deferred {
                continue;
            }
            for chunk_idx in doc.missing() {
                slots.push((doc_idx, chunk_idx));
                texts.push(doc.chunks[chunk_idx].text.clone());
            }
        }
        if texts.is_empty() {
            return Ok(());
        }

        let embedder = DirectEmbedder::new(
            Arc::clone(&self.provider),
            self.config.direct,
            self.cancel.signal(),
        );
        for range in embedder.plan(&texts) {
            let vectors = embedder.embed_group(&texts[range.clone()]).await?;
            for (&(doc_idx, chunk_idx), vector) in slots[range].iter().zip(vectors) {
                staged[doc_idx].embeddings[chunk_idx] = Some(vector);
                report.embedded_chunks += 1;
            }
            self.commit_ready(staged, options, report).await?;
        }
        Ok(())
    }

    /// Commit every fully embedded document and report progress.
    async fn commit_ready(
        &self,
        staged: &mut [StagedDocument],
        options: &SyncOptions,
        report: &mut SyncReport,
    ) -> Result<()> {
        let model = self.provider.model();
        for doc in staged.iter_mut().filter(|doc| doc.is_ready()) {
            let stored: Vec<StoredChunk> = doc
                .chunks
                .iter()
                .cloned()
                .zip(doc.embeddings.iter().cloned())
                .map(|(chunk, embedding)| StoredChunk::from_chunk(chunk, embedding))
                .collect();

            self.store
                .write()
                .await
                .replace_document(doc.record.clone(), stored)?;
            lock(&self.tracker).record_indexed(&doc.record.path, &doc.record.digest);
            if let Some(cache) = &self.cache {
                let mut cache = lock(cache);
                for (chunk, embedding) in doc.chunks.iter().zip(&doc.embeddings) {
                    if let Some(embedding) = embedding {
                        cache.insert(model, &chunk.digest, embedding.clone());
                    }
                }
            }
            doc.committed = true;
            report.indexed_documents += 1;
            debug!("Committed memory document {}", doc.record.path);
        }

        let live = staged.iter().filter(|doc| !doc.deferred);
        let (completed, total) = live.fold((0, 0), |(completed, total), doc| {
            let done = doc.embeddings.iter().filter(|e| e.is_some()).count();
            (completed + done, total + doc.chunks.len())
        });
        report.total_chunks = total;
        report.completed_chunks = completed;
        options.report(SyncProgress { completed, total });
        Ok(())
    }

    async fn save_store(&self) -> Result<()> {
        self.store.read().await.save().await?;
        Ok(())
    }

    /// Snapshot of counts, health and the last sync outcome.
    #[must_use]
    pub fn status(&self) -> MemoryStatus {
        let tracker_dirty = lock(&self.tracker).is_dirty();
        let state = lock(&self.state);
        MemoryStatus {
            agent_id: self.config.agent_id.clone(),
            provider: self.provider.id().to_string(),
            model: self.provider.model().to_string(),
            documents: state.documents,
            chunks: state.chunks,
            dirty: state.dirty || tracker_dirty,
            syncing: state.syncing,
            batch: state.batch,
            pending_batch_jobs: state.pending_batch.as_ref().map(|p| p.jobs.len()),
            last_sync_unix_ms: state.last_sync_unix_ms,
            last_error: state.last_error.clone(),
            vector: self.search.wants_query_vector(),
            store_path: self.config.store_path.display().to_string(),
            closed: self.is_closed(),
        }
    }

    /// Rank memory chunks for `text`. Never fails; operational problems yield fewer
    /// (or no) results.
    pub async fn query(&self, text: &str, options: Option<QueryOptions>) -> Vec<MemorySearchResult> {
        if self.is_closed() || text.trim().is_empty() {
            return Vec::new();
        }
        let options = options.unwrap_or(self.config.query);

        if self.config.sync.on_search && self.is_dirty() {
            self.spawn_sync("search");
        }

        let query_vector = if self.search.wants_query_vector() {
            let cancel = self.cancel.signal();
            tokio::select! {
                result = self.provider.embed_query(text) => match result {
                    Ok(vector) => Some(vector),
                    Err(err) => {
                        warn!("Query embedding failed, ranking lexically: {err}");
                        None
                    }
                },
                () = cancel.cancelled() => return Vec::new(),
            }
        } else {
            None
        };

        let store = self.store.read().await;
        self.search
            .search(&store, text, query_vector.as_deref(), &options)
    }

    /// Stop background work, wait for an in-flight sync and persist the store.
    ///
    /// Safe to call more than once; only the first call does anything.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.shutdown();
        }
        if let Some(task) = lock(&self.interval_task).take() {
            task.abort();
        }
        lock(&self.tasks).clear();

        let _guard = self.sync_lock.lock().await;
        self.save_store().await?;
        info!("Closed memory index for agent {}", self.config.agent_id);
        Ok(())
    }
}

impl Drop for MemoryIndexManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
