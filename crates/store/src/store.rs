use crate::error::{Result, StoreError};
use memory_chunker::MemoryChunk;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const STORE_SCHEMA_VERSION: u32 = 1;

/// What the stored embeddings were produced with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub provider: String,
    pub model: String,
    pub chunk_tokens: usize,
    pub chunk_overlap: usize,
}

/// Last indexed state of one memory document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub path: String,
    /// SHA-256 of the indexed content; empty once invalidated
    pub digest: String,
    pub mtime_ms: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: String,
    pub path: String,
    pub ordinal: usize,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    pub tokens: usize,
    pub digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl StoredChunk {
    #[must_use]
    pub fn from_chunk(chunk: MemoryChunk, embedding: Option<Vec<f32>>) -> Self {
        Self {
            id: chunk.id(),
            path: chunk.path,
            ordinal: chunk.ordinal,
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            text: chunk.text,
            tokens: chunk.tokens,
            digest: chunk.digest,
            embedding,
        }
    }
}

/// Result of reconciling the stored meta with the active configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaChange {
    Unchanged,
    /// First open of an empty store
    Initialized,
    /// Chunking changed; documents must be re-chunked but embeddings stay reusable
    Rechunk,
    /// Provider or model changed; every embedding was dropped
    Reembed,
}

impl MetaChange {
    #[must_use]
    pub const fn requires_full_reindex(self) -> bool {
        matches!(self, Self::Rechunk | Self::Reembed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreFile {
    schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<StoreMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dimension: Option<usize>,
    #[serde(default)]
    documents: BTreeMap<String, DocumentRecord>,
    #[serde(default)]
    chunks: BTreeMap<String, StoredChunk>,
}

impl Default for StoreFile {
    fn default() -> Self {
        Self {
            schema_version: STORE_SCHEMA_VERSION,
            meta: None,
            dimension: None,
            documents: BTreeMap::new(),
            chunks: BTreeMap::new(),
        }
    }
}

/// JSON-backed memory index
///
/// Documents are the unit of replacement: a document's chunk set is swapped as a
/// whole, so readers never see a mix of old and new chunks for one path.
#[derive(Debug)]
pub struct MemoryStore {
    path: PathBuf,
    file: StoreFile,
}

impl MemoryStore {
    /// Empty store that will be written to `path` on save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: StoreFile::default(),
        }
    }

    /// Load the store at `path`, or start empty when the file does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !tokio::fs::try_exists(&path).await? {
            log::debug!("No memory store at {}, starting empty", path.display());
            return Ok(Self::new(path));
        }

        let bytes = tokio::fs::read(&path).await?;
        let file: StoreFile = serde_json::from_slice(&bytes)?;
        if file.schema_version > STORE_SCHEMA_VERSION {
            return Err(StoreError::SchemaVersion(file.schema_version));
        }
        log::debug!(
            "Loaded memory store {} ({} documents, {} chunks)",
            path.display(),
            file.documents.len(),
            file.chunks.len()
        );
        Ok(Self { path, file })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn meta(&self) -> Option<&StoreMeta> {
        self.file.meta.as_ref()
    }

    #[must_use]
    pub const fn dimension(&self) -> Option<usize> {
        self.file.dimension
    }

    /// Adopt `meta`, invalidating whatever it makes stale.
    pub fn ensure_meta(&mut self, meta: StoreMeta) -> MetaChange {
        let change = match &self.file.meta {
            Some(current) if *current == meta => MetaChange::Unchanged,
            None if self.file.documents.is_empty() => MetaChange::Initialized,
            Some(current) if current.provider == meta.provider && current.model == meta.model => {
                MetaChange::Rechunk
            }
            _ => MetaChange::Reembed,
        };
        match change {
            MetaChange::Rechunk => self.invalidate_documents(),
            MetaChange::Reembed => self.reset_embeddings(&meta.model),
            MetaChange::Unchanged | MetaChange::Initialized => {}
        }
        if change != MetaChange::Unchanged {
            log::info!(
                "Memory store {} meta {:?}: {}/{} tokens={} overlap={}",
                self.path.display(),
                change,
                meta.provider,
                meta.model,
                meta.chunk_tokens,
                meta.chunk_overlap
            );
        }
        self.file.meta = Some(meta);
        change
    }

    /// Drop every embedding and document digest; the next sync reindexes everything.
    pub fn reset_embeddings(&mut self, model: &str) {
        for chunk in self.file.chunks.values_mut() {
            chunk.embedding = None;
        }
        self.file.dimension = None;
        self.invalidate_documents();
        if let Some(meta) = self.file.meta.as_mut() {
            meta.model = model.to_string();
        }
    }

    fn invalidate_documents(&mut self) {
        for record in self.file.documents.values_mut() {
            record.digest.clear();
        }
    }

    /// Swap the whole chunk set of `record.path` in one step.
    ///
    /// Nothing changes when validation fails.
    pub fn replace_document(
        &mut self,
        record: DocumentRecord,
        chunks: Vec<StoredChunk>,
    ) -> Result<()> {
        let mut dimension = self.file.dimension;
        for chunk in &chunks {
            if chunk.path != record.path {
                return Err(StoreError::ForeignChunk {
                    chunk_id: chunk.id.clone(),
                    path: record.path.clone(),
                });
            }
            let Some(embedding) = &chunk.embedding else {
                continue;
            };
            match dimension {
                Some(expected) if expected != embedding.len() => {
                    return Err(StoreError::DimensionMismatch {
                        chunk_id: chunk.id.clone(),
                        expected,
                        got: embedding.len(),
                    });
                }
                Some(_) => {}
                None => dimension = Some(embedding.len()),
            }
        }

        self.drop_chunks(&record.path);
        for chunk in chunks {
            self.file.chunks.insert(chunk.id.clone(), chunk);
        }
        self.file.dimension = dimension;
        self.file.documents.insert(record.path.clone(), record);
        Ok(())
    }

    /// Refresh the stat fields of a document whose content did not change.
    pub fn touch_document(&mut self, path: &str, mtime_ms: u64, size: u64) -> bool {
        let Some(record) = self.file.documents.get_mut(path) else {
            return false;
        };
        record.mtime_ms = mtime_ms;
        record.size = size;
        true
    }

    /// Remove a document and its chunks. Returns whether it was indexed.
    pub fn remove_document(&mut self, path: &str) -> bool {
        let removed_chunks = self.drop_chunks(path);
        self.file.documents.remove(path).is_some() || removed_chunks > 0
    }

    fn drop_chunks(&mut self, path: &str) -> usize {
        let before = self.file.chunks.len();
        self.file.chunks.retain(|_, chunk| chunk.path != path);
        before - self.file.chunks.len()
    }

    #[must_use]
    pub fn document(&self, path: &str) -> Option<&DocumentRecord> {
        self.file.documents.get(path)
    }

    pub fn documents(&self) -> impl Iterator<Item = &DocumentRecord> {
        self.file.documents.values()
    }

    #[must_use]
    pub fn document_count(&self) -> usize {
        self.file.documents.len()
    }

    #[must_use]
    pub fn chunk(&self, id: &str) -> Option<&StoredChunk> {
        self.file.chunks.get(id)
    }

    pub fn chunks(&self) -> impl Iterator<Item = &StoredChunk> {
        self.file.chunks.values()
    }

    pub fn chunks_for<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a StoredChunk> + 'a {
        self.file.chunks.values().filter(move |chunk| chunk.path == path)
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.file.chunks.len()
    }

    #[must_use]
    pub fn embedded_count(&self) -> usize {
        self.file
            .chunks
            .values()
            .filter(|chunk| chunk.embedding.is_some())
            .count()
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.file)?)
    }

    /// Write the store through a temp file and rename it into place.
    pub async fn save(&self) -> Result<()> {
        let bytes = self.to_json()?;
        write_atomic(&self.path, &bytes).await?;
        log::debug!(
            "Saved memory store {} ({} documents, {} chunks)",
            self.path.display(),
            self.document_count(),
            self.chunk_count()
        );
        Ok(())
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut tmp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "memory-store".into());
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
