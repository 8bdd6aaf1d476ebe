//! Embedding traits and the chunk-then-embed node transformer.
//!
//! [`Embedder`] is the model boundary: texts in, vectors out.
//! [`NodeTransformer`] is what the orchestrators actually call; the stock
//! implementation, [`EmbeddingTransformer`], splits each document with
//! [`split_text`](crate::chunk::split_text), embeds the pieces in batches
//! and wraps each one in a [`Node`] that owns a copy of the document's
//! metadata.
//!
//! Network-backed embedders live in the `doc-intake` app crate. The
//! [`HashEmbedder`] here is deterministic and offline.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::chunk::{split_text, text_hash};
use crate::models::{Document, Node};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality.
    fn dims(&self) -> usize;
    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Turns documents into index-ready nodes.
#[async_trait]
pub trait NodeTransformer: Send + Sync {
    async fn transform(&self, docs: &[Document]) -> Result<Vec<Node>>;
}

/// Feature-hashing embedder: each lowercase token is hashed into one of
/// `dims` buckets with a sign bit, and the result is L2-normalized.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dims;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

pub struct EmbeddingTransformer {
    embedder: Arc<dyn Embedder>,
    max_tokens: usize,
    batch_size: usize,
}

impl EmbeddingTransformer {
    pub fn new(embedder: Arc<dyn Embedder>, max_tokens: usize, batch_size: usize) -> Self {
        Self {
            embedder,
            max_tokens,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl NodeTransformer for EmbeddingTransformer {
    async fn transform(&self, docs: &[Document]) -> Result<Vec<Node>> {
        let mut pending = Vec::new();
        for doc in docs {
            for (chunk_index, text) in split_text(&doc.text, self.max_tokens)
                .into_iter()
                .enumerate()
            {
                pending.push(Node {
                    id: Uuid::new_v4().to_string(),
                    doc_id: doc.id.clone(),
                    chunk_index,
                    hash: text_hash(&text),
                    text,
                    embedding: Vec::new(),
                    metadata: doc.metadata.clone(),
                });
            }
        }

        for batch in pending.chunks_mut(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|n| n.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                bail!(
                    "embedder '{}' returned {} vectors for {} texts",
                    self.embedder.model_name(),
                    vectors.len(),
                    batch.len()
                );
            }
            for (node, vector) in batch.iter_mut().zip(vectors) {
                node.embedding = vector;
            }
        }

        Ok(pending)
    }
}
