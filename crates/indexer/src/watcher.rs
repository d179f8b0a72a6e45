use crate::dirty::DocumentScanner;
use crate::manager::MemoryIndexManager;
use crate::{IndexerError, Result};
use log::{debug, warn};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Quiet period after the last change before a sync is requested
    pub debounce: Duration,
    /// Upper bound on how long a burst of changes can postpone a sync
    pub max_batch_wait: Duration,
    pub notify_poll_interval: Duration,
}

impl WatcherConfig {
    #[must_use]
    pub fn with_debounce(debounce: Duration) -> Self {
        Self {
            debounce,
            max_batch_wait: (debounce * 4).max(Duration::from_secs(3)),
            ..Self::default()
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1_500),
            max_batch_wait: Duration::from_secs(6),
            notify_poll_interval: Duration::from_secs(2),
        }
    }
}

/// Filesystem watcher over the memory documents of one manager
///
/// Changes are collected, debounced and handed to the manager as dirty marks followed
/// by a `watch` sync. Dropping the watcher stops it.
pub struct MemoryWatcher {
    command_tx: mpsc::Sender<WatcherCommand>,
    _watcher: Arc<Mutex<RecommendedWatcher>>,
    task: JoinHandle<()>,
}

enum WatcherCommand {
    Shutdown,
}

impl MemoryWatcher {
    pub(crate) fn start(
        manager: Weak<MemoryIndexManager>,
        scanner: DocumentScanner,
        config: WatcherConfig,
    ) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel(1024);
        let (command_tx, command_rx) = mpsc::channel(4);

        let watcher = create_fs_watcher(&scanner, event_tx, config.notify_poll_interval)?;
        let watcher = Arc::new(Mutex::new(watcher));

        let task = tokio::spawn(watch_loop(
            manager,
            scanner,
            config,
            Arc::clone(&watcher),
            event_rx,
            command_rx,
        ));

        Ok(Self {
            command_tx,
            _watcher: watcher,
            task,
        })
    }

    /// Stop the loop. Pending changes that were not handed over yet are dropped.
    pub fn shutdown(&self) {
        let _ = self.command_tx.try_send(WatcherCommand::Shutdown);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for MemoryWatcher {
    fn drop(&mut self) {
        self.shutdown();
        self.task.abort();
    }
}

fn create_fs_watcher(
    scanner: &DocumentScanner,
    sender: mpsc::Sender<notify::Result<Event>>,
    poll_interval: Duration,
) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = sender.blocking_send(res);
        },
        NotifyConfig::default().with_poll_interval(poll_interval),
    )
    .map_err(|e| IndexerError::Other(format!("watcher init failed: {e}")))?;

    // Root-level documents and the creation of memory directories.
    let root = scanner.root();
    watcher
        .watch(root, RecursiveMode::NonRecursive)
        .map_err(|e| IndexerError::Other(format!("failed to watch {}: {e}", root.display())))?;
    for dir in scanner.watch_dirs() {
        watcher
            .watch(&dir, RecursiveMode::Recursive)
            .map_err(|e| IndexerError::Other(format!("failed to watch {}: {e}", dir.display())))?;
    }
    Ok(watcher)
}

async fn watch_loop(
    manager: Weak<MemoryIndexManager>,
    scanner: DocumentScanner,
    config: WatcherConfig,
    watcher: Arc<Mutex<RecommendedWatcher>>,
    mut event_rx: mpsc::Receiver<notify::Result<Event>>,
    mut command_rx: mpsc::Receiver<WatcherCommand>,
) {
    let mut state = DebounceState::new(config.debounce, config.max_batch_wait);

    loop {
        let next_deadline = state.next_deadline();

        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                handle_event(&scanner, &watcher, event, &mut state);
            }
            command = command_rx.recv() => match command {
                Some(WatcherCommand::Shutdown) | None => break,
            },
            () = async {
                if let Some(deadline) = next_deadline {
                    time::sleep_until(deadline).await;
                }
            }, if next_deadline.is_some() => {
                let Some(manager) = manager.upgrade() else { break };
                if manager.is_closed() {
                    break;
                }
                let (paths, rescan) = state.take();
                debug!("Watcher flushing {} changed paths (rescan: {rescan})", paths.len());
                manager.note_watch_changes(paths, rescan);
            }
        }
    }
    debug!("Memory watcher for {} stopped", scanner.root().display());
}

fn handle_event(
    scanner: &DocumentScanner,
    watcher: &Mutex<RecommendedWatcher>,
    event: notify::Result<Event>,
    state: &mut DebounceState,
) {
    let event = match event {
        Ok(event) => event,
        Err(err) => {
            warn!("Watcher error: {err}");
            return;
        }
    };

    if event.paths.is_empty() {
        state.record_rescan();
        return;
    }

    for path in &event.paths {
        if scanner.is_memory_root(path) {
            // A memory directory appeared (or went away) after startup.
            if path.is_dir() {
                watch_new_dir(watcher, path);
            }
            state.record_rescan();
        } else if scanner.is_tracked(path) {
            if let Some(relative) = scanner.relative_path(path) {
                state.record_path(relative);
            }
        }
    }
}

fn watch_new_dir(watcher: &Mutex<RecommendedWatcher>, dir: &Path) {
    let mut guard = watcher.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(err) = guard.watch(dir, RecursiveMode::Recursive) {
        warn!("Failed to watch {}: {err}", dir.display());
    }
}

struct DebounceState {
    debounce: Duration,
    max_batch: Duration,
    paths: BTreeSet<String>,
    rescan: bool,
    last_event: Option<Instant>,
    first_event: Option<Instant>,
}

impl DebounceState {
    const fn new(debounce: Duration, max_batch: Duration) -> Self {
        Self {
            debounce,
            max_batch,
            paths: BTreeSet::new(),
            rescan: false,
            last_event: None,
            first_event: None,
        }
    }

    fn record_path(&mut self, path: String) {
        self.paths.insert(path);
        self.touch();
    }

    fn record_rescan(&mut self) {
        self.rescan = true;
        self.touch();
    }

    fn touch(&mut self) {
        let now = Instant::now();
        self.last_event = Some(now);
        self.first_event.get_or_insert(now);
    }

    fn pending(&self) -> bool {
        self.rescan || !self.paths.is_empty()
    }

    fn next_deadline(&self) -> Option<time::Instant> {
        if !self.pending() {
            return None;
        }
        let quiet = self.last_event.map(|last| last + self.debounce);
        let forced = self.first_event.map(|first| first + self.max_batch);
        let deadline = match (quiet, forced) {
            (Some(quiet), Some(forced)) => quiet.min(forced),
            (quiet, forced) => quiet.or(forced)?,
        };
        Some(time::Instant::from_std(deadline))
    }

    /// Hand over everything collected so far and start a new window.
    fn take(&mut self) -> (Vec<String>, bool) {
        let paths = std::mem::take(&mut self.paths).into_iter().collect();
        let rescan = std::mem::replace(&mut self.rescan, false);
        self.last_event = None;
        self.first_event = None;
        (paths, rescan)
    }
}
