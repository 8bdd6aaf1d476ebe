//! Document store: original uploads and per-document content hashes.
//!
//! Originals are append-only. `delete` drops the document record (its hash)
//! so the document no longer counts as indexed, but leaves the uploaded
//! bytes in place for audit and re-ingestion.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Keep the uploaded bytes of `file_name` under `doc_id`.
    async fn store_original(&self, doc_id: &str, file_name: &str, bytes: &[u8]) -> Result<()>;

    /// Bytes and file name previously stored under `doc_id`.
    async fn load_original(&self, doc_id: &str) -> Result<Option<(String, Vec<u8>)>>;

    /// Record the content hash of an indexed document.
    async fn set_document_hash(&self, doc_id: &str, hash: &str) -> Result<()>;

    async fn document_hash(&self, doc_id: &str) -> Result<Option<String>>;

    /// Remove the document record. Returns whether one existed.
    async fn delete(&self, doc_id: &str) -> Result<bool>;
}
