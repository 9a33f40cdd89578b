//! Pipeline-definition document layer for the gantry validation engine.
//!
//! Documents are opaque YAML files; the engine only reads the narrow fields
//! each validation level inspects, and patches two field families in place
//! during auto-remediation. [`DocumentSet`] is a cheap-clone handle: cloning
//! yields another handle to the **same** underlying documents, so the
//! executor can hand it to concurrently running checks while the remediation
//! engine, which runs strictly between executions, takes the write side.

pub mod document;

use std::path::Path;
use std::sync::Arc;

use gantry_types::{GantryError, Result};

pub use document::{
    JobView, ManifestDoc, TriggerView, DEFAULT_CPU_LIMIT, DEFAULT_MEMORY_LIMIT,
    REQUIRED_TOP_LEVEL_FIELDS, VALID_PERMISSION_VALUES, VALID_TRIGGER_TYPES,
};

/// The set of pipeline-definition documents under validation.
#[derive(Debug, Clone)]
pub struct DocumentSet {
    inner: Arc<tokio::sync::RwLock<Vec<ManifestDoc>>>,
}

impl DocumentSet {
    /// Load every `*.yml`/`*.yaml` file directly under `dir`, in filename
    /// order. An empty directory is a configuration error; a document that
    /// fails to parse is retained (the syntax level classifies it).
    pub fn load(dir: &Path) -> Result<Self> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yml") | Some("yaml")
                )
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(GantryError::EmptyDocumentSet(dir.display().to_string()));
        }

        let mut docs = Vec::with_capacity(paths.len());
        for path in &paths {
            docs.push(ManifestDoc::from_path(path)?);
        }
        tracing::debug!(dir = %dir.display(), count = docs.len(), "Loaded document set");
        Ok(Self::from_docs(docs))
    }

    pub fn from_docs(docs: Vec<ManifestDoc>) -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(docs)),
        }
    }

    /// Clones of all documents, in load order. Checks work on snapshots so a
    /// read never observes a half-applied patch.
    pub async fn snapshot(&self) -> Vec<ManifestDoc> {
        self.inner.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn names(&self) -> Vec<String> {
        self.inner
            .read()
            .await
            .iter()
            .map(|d| d.name().to_string())
            .collect()
    }

    /// Apply a patch closure to one document under the write lock. When the
    /// closure reports a change the document is saved back to disk before the
    /// lock is released.
    pub async fn update<F>(&self, name: &str, patch: F) -> Result<bool>
    where
        F: FnOnce(&mut ManifestDoc) -> bool,
    {
        let mut docs = self.inner.write().await;
        let doc = docs
            .iter_mut()
            .find(|d| d.name() == name)
            .ok_or_else(|| GantryError::Document {
                path: name.to_string(),
                message: "no such document in the set".into(),
            })?;
        let changed = patch(doc);
        if changed {
            doc.save()?;
        }
        Ok(changed)
    }
}
