use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::DocumentStore;

/// [`DocumentStore`] kept entirely in process memory.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    originals: RwLock<HashMap<String, (String, Vec<u8>)>>,
    hashes: RwLock<HashMap<String, String>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("document store lock poisoned")
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn store_original(&self, doc_id: &str, file_name: &str, bytes: &[u8]) -> Result<()> {
        self.originals
            .write()
            .map_err(poisoned)?
            .insert(doc_id.to_string(), (file_name.to_string(), bytes.to_vec()));
        Ok(())
    }

    async fn load_original(&self, doc_id: &str) -> Result<Option<(String, Vec<u8>)>> {
        Ok(self.originals.read().map_err(poisoned)?.get(doc_id).cloned())
    }

    async fn set_document_hash(&self, doc_id: &str, hash: &str) -> Result<()> {
        self.hashes
            .write()
            .map_err(poisoned)?
            .insert(doc_id.to_string(), hash.to_string());
        Ok(())
    }

    async fn document_hash(&self, doc_id: &str) -> Result<Option<String>> {
        Ok(self.hashes.read().map_err(poisoned)?.get(doc_id).cloned())
    }

    async fn delete(&self, doc_id: &str) -> Result<bool> {
        Ok(self.hashes.write().map_err(poisoned)?.remove(doc_id).is_some())
    }
}
