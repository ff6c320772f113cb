use crate::error::{ExtractError, Result};
use crate::model::{CodeModel, ModelBackend, ModelFacts};
use async_trait::async_trait;
use dashmap::DashMap;
use depshift_core::{ArtifactSnapshot, CallGraph, CodeModelExtractor};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

/// Relations of one snapshot, shared between callers.
#[derive(Debug, Clone)]
pub struct CachedModel {
    pub declarations: Arc<HashSet<String>>,
    pub call_graph: Arc<CallGraph>,
}

impl From<CodeModel> for CachedModel {
    fn from(model: CodeModel) -> Self {
        Self {
            declarations: Arc::new(model.declarations),
            call_graph: Arc::new(model.call_graph),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    extractions: AtomicU64,
    discarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub extractions: u64,
    /// Corrupt disk entries thrown away.
    pub discarded: u64,
}

/// Memoizing [`CodeModelExtractor`] over a [`ModelBackend`].
///
/// Models are keyed by snapshot identity: the coordinate plus the archive's
/// size and modification time, hashed with SHA-256. With a cache directory,
/// models also persist across runs as `<key>.json`.
pub struct CachedExtractor {
    backend: Arc<dyn ModelBackend>,
    cache_dir: Option<PathBuf>,
    memory: DashMap<String, CachedModel>,
    counters: Counters,
}

impl CachedExtractor {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            backend,
            cache_dir: None,
            memory: DashMap::new(),
            counters: Counters::default(),
        }
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.counters.disk_hits.load(Ordering::Relaxed),
            extractions: self.counters.extractions.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }

    /// Stable key for the snapshot's current contents.
    pub async fn snapshot_key(snapshot: &ArtifactSnapshot) -> String {
        let mut hasher = Sha256::new();
        hasher.update(snapshot.coordinate.to_string().as_bytes());
        if let Ok(meta) = tokio::fs::metadata(&snapshot.path).await {
            hasher.update(meta.len().to_le_bytes());
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos())
                .unwrap_or_default();
            hasher.update(modified.to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    fn entry_path(&self, key: &str) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", key)))
    }

    async fn read_entry(&self, path: &Path) -> Result<Option<CodeModel>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<ModelFacts>(&bytes) {
            Ok(facts) => Ok(Some(CodeModel::from(facts))),
            Err(_) => Err(ExtractError::CorruptCache(path.to_path_buf())),
        }
    }

    async fn write_entry(&self, path: &Path, model: &CodeModel) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec(&ModelFacts::from(model))?;
        let partial = path.with_extension("json.part");
        tokio::fs::write(&partial, json).await?;
        tokio::fs::rename(&partial, path).await?;
        Ok(())
    }

    /// Both relations of `snapshot`, from memory, disk or the backend.
    pub async fn model(&self, snapshot: &ArtifactSnapshot) -> Result<CachedModel> {
        let key = Self::snapshot_key(snapshot).await;
        if let Some(model) = self.memory.get(&key) {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(model.clone());
        }

        let entry = self.entry_path(&key);
        if let Some(path) = &entry {
            match self.read_entry(path).await {
                Ok(Some(model)) => {
                    self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(artifact = %snapshot.coordinate, "Model loaded from cache");
                    let model = CachedModel::from(model);
                    self.memory.insert(key, model.clone());
                    return Ok(model);
                }
                Ok(None) => {}
                Err(e) => {
                    self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                    warn!(artifact = %snapshot.coordinate, "Discarding cache entry: {}", e);
                    let _ = tokio::fs::remove_file(path).await;
                }
            }
        }

        let model = self.backend.extract(&snapshot.path).await?;
        self.counters.extractions.fetch_add(1, Ordering::Relaxed);
        if let Some(path) = &entry {
            if let Err(e) = self.write_entry(path, &model).await {
                warn!(artifact = %snapshot.coordinate, "Could not persist model: {}", e);
            }
        }

        let model = CachedModel::from(model);
        self.memory.insert(key, model.clone());
        Ok(model)
    }
}

#[async_trait]
impl CodeModelExtractor for CachedExtractor {
    async fn declarations(
        &self,
        snapshot: &ArtifactSnapshot,
    ) -> depshift_core::Result<Arc<HashSet<String>>> {
        Ok(self.model(snapshot).await?.declarations)
    }

    async fn call_graph(&self, snapshot: &ArtifactSnapshot) -> depshift_core::Result<Arc<CallGraph>> {
        Ok(self.model(snapshot).await?.call_graph)
    }
}
