//! In-memory [`EmbeddingIndex`] backed by a `Vec<Node>` behind an `RwLock`.
//!
//! `persist` does no I/O; it only bumps a counter so callers can observe
//! how many flushes reached the index.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::Node;

use super::EmbeddingIndex;

#[derive(Default)]
pub struct InMemoryIndex {
    nodes: RwLock<Vec<Node>>,
    persists: AtomicUsize,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index pre-populated with `nodes`, e.g. from a snapshot on disk.
    pub fn with_nodes(nodes: Vec<Node>) -> Self {
        Self {
            nodes: RwLock::new(nodes),
            persists: AtomicUsize::new(0),
        }
    }

    /// Copy of every node currently held.
    pub fn snapshot(&self) -> Result<Vec<Node>> {
        Ok(self.read()?.clone())
    }

    /// Number of completed `persist` calls.
    pub fn persist_count(&self) -> usize {
        self.persists.load(Ordering::SeqCst)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<Node>>> {
        self.nodes.read().map_err(|_| anyhow!("index lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<Node>>> {
        self.nodes.write().map_err(|_| anyhow!("index lock poisoned"))
    }
}

#[async_trait]
impl EmbeddingIndex for InMemoryIndex {
    async fn insert(&self, nodes: Vec<Node>) -> Result<()> {
        self.write()?.extend(nodes);
        Ok(())
    }

    async fn delete(&self, doc_id: &str) -> Result<usize> {
        let mut nodes = self.write()?;
        let before = nodes.len();
        nodes.retain(|n| n.doc_id != doc_id);
        Ok(before - nodes.len())
    }

    async fn persist(&self) -> Result<()> {
        self.persists.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn node_count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    async fn nodes_for(&self, doc_id: &str) -> Result<Vec<Node>> {
        Ok(self
            .read()?
            .iter()
            .filter(|n| n.doc_id == doc_id)
            .cloned()
            .collect())
    }
}
