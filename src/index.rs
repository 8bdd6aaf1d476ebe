//! Index persistence and the lock-guarded write path every orchestrator
//! shares.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use doc_intake_core::index::memory::InMemoryIndex;
use doc_intake_core::index::EmbeddingIndex;
use doc_intake_core::models::{upload_hash, Document, Node};
use doc_intake_core::store::DocumentStore;

/// In-memory index that writes a JSON snapshot of all nodes on `persist`
/// and reloads it on open.
pub struct FileIndex {
    nodes: InMemoryIndex,
    path: PathBuf,
}

impl FileIndex {
    /// Open the snapshot at `<root>/index/nodes.json`, empty if absent.
    pub async fn open(root: &Path) -> Result<Self> {
        let path = root.join("index").join("nodes.json");
        let nodes = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Vec<Node>>(&bytes)
                .with_context(|| format!("Corrupt index snapshot: {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e).context("Failed to read index snapshot"),
        };
        debug!(path = %path.display(), nodes = nodes.len(), "index snapshot loaded");
        Ok(Self {
            nodes: InMemoryIndex::with_nodes(nodes),
            path,
        })
    }
}

#[async_trait]
impl EmbeddingIndex for FileIndex {
    async fn insert(&self, nodes: Vec<Node>) -> Result<()> {
        self.nodes.insert(nodes).await
    }

    async fn delete(&self, doc_id: &str) -> Result<usize> {
        self.nodes.delete(doc_id).await
    }

    async fn persist(&self) -> Result<()> {
        let snapshot = self.nodes.snapshot()?;
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&snapshot)?).await?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        self.nodes.persist().await
    }

    async fn node_count(&self) -> Result<usize> {
        self.nodes.node_count().await
    }

    async fn nodes_for(&self, doc_id: &str) -> Result<Vec<Node>> {
        self.nodes.nodes_for(doc_id).await
    }
}

/// Index plus document store behind one async lock. Insert, delete and
/// persist from every orchestrator built on the same `SharedIndex` are
/// serialized through it.
#[derive(Clone)]
pub struct SharedIndex {
    index: Arc<dyn EmbeddingIndex>,
    documents: Arc<dyn DocumentStore>,
    lock: Arc<Mutex<()>>,
}

impl SharedIndex {
    pub fn new(index: Arc<dyn EmbeddingIndex>, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            index,
            documents,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn index(&self) -> &Arc<dyn EmbeddingIndex> {
        &self.index
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    /// Insert `nodes` in batches of `batch_size`, record one hash per
    /// document id covering every page parsed under it, then persist. Returns the number of nodes inserted.
    pub async fn save(&self, docs: &[Document], mut nodes: Vec<Node>, batch_size: usize) -> Result<usize> {
        let total = nodes.len();
        let _guard = self.lock.lock().await;

        while !nodes.is_empty() {
            let rest = nodes.split_off(batch_size.max(1).min(nodes.len()));
            self.index.insert(std::mem::replace(&mut nodes, rest)).await?;
        }
        let mut uploads: Vec<(&str, Vec<&Document>)> = Vec::new();
        for doc in docs {
            match uploads.iter_mut().find(|(id, _)| *id == doc.id) {
                Some((_, pages)) => pages.push(doc),
                None => uploads.push((doc.id.as_str(), vec![doc])),
            }
        }
        for (doc_id, pages) in uploads {
            self.documents
                .set_document_hash(doc_id, &upload_hash(pages))
                .await
                .with_context(|| format!("Failed to record hash for {}", doc_id))?;
        }
        self.index.persist().await.context("Failed to persist index")?;

        debug!(docs = docs.len(), nodes = total, "index write committed");
        Ok(total)
    }

    /// Remove a document's nodes and its store record, then persist.
    pub async fn delete(&self, doc_id: &str) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let removed = self.index.delete(doc_id).await?;
        self.documents.delete(doc_id).await?;
        self.index.persist().await?;
        info!(doc_id, nodes = removed, "document deleted");
        Ok(removed)
    }
}
