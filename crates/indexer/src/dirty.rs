use memory_store::MemoryStore;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// A memory document found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDocument {
    /// Workspace-relative path with forward slashes; the document id
    pub path: String,
    pub abs_path: PathBuf,
    pub mtime_ms: u64,
    pub size: u64,
}

/// Finds memory documents under the configured memory paths
#[derive(Debug, Clone)]
pub struct DocumentScanner {
    root: PathBuf,
    memory_paths: Vec<String>,
    extensions: Vec<String>,
}

impl DocumentScanner {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, memory_paths: Vec<String>, extensions: Vec<String>) -> Self {
        Self {
            root: root.into(),
            memory_paths,
            extensions,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Existing memory directories, for watching recursively.
    #[must_use]
    pub fn watch_dirs(&self) -> Vec<PathBuf> {
        self.memory_paths
            .iter()
            .map(|p| self.root.join(p))
            .filter(|p| p.is_dir())
            .collect()
    }

    /// Walk every memory path. Documents are sorted by path; unreadable entries are skipped.
    #[must_use]
    pub fn scan(&self) -> Vec<ScannedDocument> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for memory_path in &self.memory_paths {
            let base = self.root.join(memory_path);
            for entry in WalkDir::new(&base).follow_links(false) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        if err.io_error().map(std::io::Error::kind)
                            != Some(std::io::ErrorKind::NotFound)
                        {
                            log::warn!("Skipping unreadable memory path: {err}");
                        }
                        continue;
                    }
                };
                if !entry.file_type().is_file() || !self.has_memory_extension(entry.path()) {
                    continue;
                }
                let Some(path) = self.relative_path(entry.path()) else {
                    continue;
                };
                if !seen.insert(path.clone()) {
                    continue;
                }
                let meta = match entry.metadata() {
                    Ok(meta) => meta,
                    Err(err) => {
                        log::warn!("Skipping {path}: {err}");
                        continue;
                    }
                };
                let mtime_ms = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
                out.push(ScannedDocument {
                    path,
                    abs_path: entry.into_path(),
                    mtime_ms,
                    size: meta.len(),
                });
            }
        }

        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }

    /// Document id for an absolute path under the workspace root.
    #[must_use]
    pub fn relative_path(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        (!parts.is_empty()).then(|| parts.join("/"))
    }

    /// Whether `path` is one of the configured memory paths itself.
    #[must_use]
    pub fn is_memory_root(&self, path: &Path) -> bool {
        self.relative_path(path)
            .is_some_and(|relative| self.memory_paths.iter().any(|m| *m == relative))
    }

    /// Whether `path` is (or would be) a memory document.
    #[must_use]
    pub fn is_tracked(&self, path: &Path) -> bool {
        let Some(relative) = self.relative_path(path) else {
            return false;
        };
        self.has_memory_extension(path)
            && self.memory_paths.iter().any(|memory_path| {
                relative == *memory_path
                    || relative
                        .strip_prefix(memory_path.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
    }

    fn has_memory_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|e| *e == ext))
    }
}

/// What a sync pass has to do
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyPlan {
    /// Documents to read and confirm by digest
    pub candidates: Vec<ScannedDocument>,
    /// Indexed documents that no longer exist
    pub removed: Vec<String>,
}

impl DirtyPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty() && self.removed.is_empty()
    }
}

/// Explicit `path -> last indexed digest` arena plus manual dirty marks
#[derive(Debug, Default)]
pub struct DirtyTracker {
    indexed: HashMap<String, String>,
    marked: HashSet<String>,
    all_dirty: bool,
}

impl DirtyTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load digests of documents the store already holds.
    pub fn seed(&mut self, store: &MemoryStore) {
        self.indexed = store
            .documents()
            .filter(|record| !record.digest.is_empty())
            .map(|record| (record.path.clone(), record.digest.clone()))
            .collect();
    }

    pub fn mark(&mut self, path: &str) {
        self.marked.insert(path.to_string());
    }

    pub fn mark_all(&mut self) {
        self.all_dirty = true;
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.all_dirty || !self.marked.is_empty()
    }

    #[must_use]
    pub fn indexed_digest(&self, path: &str) -> Option<&str> {
        self.indexed.get(path).map(String::as_str)
    }

    /// Candidates are documents that are new, marked, or whose stat changed.
    #[must_use]
    pub fn plan(&self, scanned: &[ScannedDocument], store: &MemoryStore, force: bool) -> DirtyPlan {
        let everything = force || self.all_dirty;
        let candidates = scanned
            .iter()
            .filter(|doc| {
                everything
                    || self.marked.contains(&doc.path)
                    || !self.indexed.contains_key(&doc.path)
                    || store.document(&doc.path).is_none_or(|record| {
                        record.digest.is_empty()
                            || record.mtime_ms != doc.mtime_ms
                            || record.size != doc.size
                    })
            })
            .cloned()
            .collect();

        let live: HashSet<&str> = scanned.iter().map(|doc| doc.path.as_str()).collect();
        let mut removed: Vec<String> = store
            .documents()
            .map(|record| record.path.as_str())
            .chain(self.indexed.keys().map(String::as_str))
            .filter(|path| !live.contains(path))
            .map(str::to_string)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        removed.sort();

        DirtyPlan {
            candidates,
            removed,
        }
    }

    /// Whether `digest` differs from what was last indexed for `path`.
    #[must_use]
    pub fn confirm_changed(&self, path: &str, digest: &str) -> bool {
        self.indexed.get(path).is_none_or(|known| known != digest)
    }

    pub fn record_indexed(&mut self, path: &str, digest: &str) {
        self.indexed.insert(path.to_string(), digest.to_string());
        self.marked.remove(path);
    }

    pub fn forget(&mut self, path: &str) {
        self.indexed.remove(path);
        self.marked.remove(path);
    }

    /// Close a pass; a fully successful pass clears the global flag.
    pub fn finish_pass(&mut self, complete: bool) {
        if complete {
            self.all_dirty = false;
        }
    }
}
