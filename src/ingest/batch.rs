use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use doc_intake_core::models::Document;

use super::{new_doc_id, parse_file, save_documents, Components, Ingest, IngestSettings};

/// Synchronous ingestion. Bulk uploads are parsed concurrently, at most
/// `count_workers` at a time, and indexed with a single write.
pub struct BatchIngestor {
    components: Components,
    settings: IngestSettings,
}

impl BatchIngestor {
    pub fn new(components: Components, settings: IngestSettings) -> Self {
        Self {
            components,
            settings,
        }
    }
}

#[async_trait]
impl Ingest for BatchIngestor {
    async fn ingest(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<Document>> {
        let docs = parse_file(&self.components.parser, file_name, bytes.to_vec(), &new_doc_id()).await?;
        save_documents(&self.components, &docs, self.settings.embed_batch_size).await?;
        Ok(docs)
    }

    async fn bulk_ingest(&self, files: Vec<(String, Vec<u8>)>) -> Result<Vec<Document>> {
        let permits = Arc::new(Semaphore::new(self.settings.count_workers.max(1)));
        let parsers = files.into_iter().map(|(file_name, bytes)| {
            let permits = permits.clone();
            async move {
                let _permit = permits.acquire().await.ok();
                let parsed = parse_file(&self.components.parser, &file_name, bytes, &new_doc_id()).await;
                (file_name, parsed)
            }
        });

        let mut docs = Vec::new();
        for (file_name, parsed) in join_all(parsers).await {
            match parsed {
                Ok(parsed) => docs.extend(parsed),
                Err(e) => warn!(file_name = %file_name, error = %e, "skipping file"),
            }
        }

        if !docs.is_empty() {
            let nodes = save_documents(&self.components, &docs, self.settings.embed_batch_size).await?;
            info!(documents = docs.len(), nodes, "batch indexed");
        }
        Ok(docs)
    }

    async fn delete(&self, doc_id: &str) -> Result<()> {
        self.components.index.delete(doc_id).await.map(|_| ())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
