//! Persistence interface
//!
//! The store is memory-only unless a backend is installed, and nothing is
//! ever persisted implicitly. A backend stores whole graphs keyed by root
//! version.
//!
//! Two implementations ship with the crate: an in-memory backend for tests
//! and a JSON-per-graph directory backend for inspection and debugging.
//! Neither constitutes a mandated on-disk format.

use parking_lot::Mutex;
use provenant_core::{EntityGraph, Error, Result, VersionId};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Storage backend for whole entity graphs
pub trait PersistenceBackend: Send + Sync {
    /// Save one graph, keyed by its root version
    fn save(&self, graph: &EntityGraph) -> Result<()>;
    /// Load the graph stored at a root version
    fn load(&self, root_version_id: VersionId) -> Result<EntityGraph>;
    /// Roots this backend holds
    fn list_roots(&self) -> Result<Vec<VersionId>>;
}

/// In-memory backend
#[derive(Default)]
pub struct MemoryBackend {
    graphs: Mutex<HashMap<VersionId, EntityGraph>>,
}

impl MemoryBackend {
    /// Create an empty in-memory backend
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceBackend for MemoryBackend {
    fn save(&self, graph: &EntityGraph) -> Result<()> {
        self.graphs
            .lock()
            .insert(graph.root_version_id(), graph.clone());
        Ok(())
    }

    fn load(&self, root_version_id: VersionId) -> Result<EntityGraph> {
        self.graphs
            .lock()
            .get(&root_version_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("persisted graph {}", root_version_id)))
    }

    fn list_roots(&self) -> Result<Vec<VersionId>> {
        Ok(self.graphs.lock().keys().copied().collect())
    }
}

/// Directory backend writing one pretty-printed JSON file per graph
pub struct JsonDirBackend {
    dir: PathBuf,
}

impl JsonDirBackend {
    /// Create a backend rooted at a directory, creating it if needed
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| Error::Persistence(format!("create {}: {}", dir.display(), e)))?;
        Ok(JsonDirBackend { dir })
    }

    fn path_for(&self, root_version_id: VersionId) -> PathBuf {
        self.dir.join(format!("{}.json", root_version_id))
    }
}

impl PersistenceBackend for JsonDirBackend {
    fn save(&self, graph: &EntityGraph) -> Result<()> {
        let path = self.path_for(graph.root_version_id());
        let json = serde_json::to_string_pretty(graph)
            .map_err(|e| Error::Persistence(format!("encode graph: {}", e)))?;
        fs::write(&path, json)
            .map_err(|e| Error::Persistence(format!("write {}: {}", path.display(), e)))
    }

    fn load(&self, root_version_id: VersionId) -> Result<EntityGraph> {
        let path = self.path_for(root_version_id);
        let json = fs::read_to_string(&path)
            .map_err(|_| Error::NotFound(format!("persisted graph {}", root_version_id)))?;
        serde_json::from_str(&json)
            .map_err(|e| Error::Persistence(format!("decode {}: {}", path.display(), e)))
    }

    fn list_roots(&self) -> Result<Vec<VersionId>> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| Error::Persistence(format!("read {}: {}", self.dir.display(), e)))?;
        let mut roots = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| Error::Persistence(format!("read dir entry: {}", e)))?;
            let name = entry.file_name();
            let Some(stem) = Path::new(&name).file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(vid) = VersionId::parse(stem) {
                roots.push(vid);
            }
        }
        Ok(roots)
    }
}
