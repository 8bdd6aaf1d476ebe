//! Vector index abstraction.
//!
//! The index only stores nodes; similarity search is the business of
//! whatever reads the index. Writers serialize insert, delete and persist
//! through an external lock, so implementations only need to be safe for
//! concurrent readers.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Node;

/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](EmbeddingIndex::insert) | Add nodes |
/// | [`delete`](EmbeddingIndex::delete) | Remove every node of a document |
/// | [`persist`](EmbeddingIndex::persist) | Make prior writes durable |
/// | [`node_count`](EmbeddingIndex::node_count) | Total nodes held |
/// | [`nodes_for`](EmbeddingIndex::nodes_for) | Nodes of one document |
#[async_trait]
pub trait EmbeddingIndex: Send + Sync {
    async fn insert(&self, nodes: Vec<Node>) -> Result<()>;

    /// Returns the number of nodes removed.
    async fn delete(&self, doc_id: &str) -> Result<usize>;

    async fn persist(&self) -> Result<()>;

    async fn node_count(&self) -> Result<usize>;

    async fn nodes_for(&self, doc_id: &str) -> Result<Vec<Node>>;
}
