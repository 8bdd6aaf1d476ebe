use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use doc_intake_core::models::Document;

use super::{new_doc_id, parse_file, save_documents, BackgroundRunner, Components, Ingest, IngestSettings};

/// Background ingestion with structured extraction for single uploads;
/// sequential parse-and-save without extraction for bulk uploads.
pub struct SimpleIngestor {
    components: Components,
    settings: IngestSettings,
    runner: BackgroundRunner,
}

impl SimpleIngestor {
    pub fn new(components: Components, settings: IngestSettings) -> Self {
        let runner = BackgroundRunner::new(components.clone(), settings.clone());
        Self {
            components,
            settings,
            runner,
        }
    }
}

#[async_trait]
impl Ingest for SimpleIngestor {
    async fn ingest(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<Document>> {
        Ok(vec![self.runner.submit(file_name, bytes).await?])
    }

    async fn bulk_ingest(&self, files: Vec<(String, Vec<u8>)>) -> Result<Vec<Document>> {
        let total = files.len();
        let mut ingested = Vec::new();
        for (file_name, bytes) in files {
            let doc_id = new_doc_id();
            let docs = match parse_file(&self.components.parser, &file_name, bytes, &doc_id).await {
                Ok(docs) => docs,
                Err(e) => {
                    warn!(file_name = %file_name, error = %e, "skipping file");
                    continue;
                }
            };
            match save_documents(&self.components, &docs, self.settings.embed_batch_size).await {
                Ok(_) => ingested.extend(docs),
                Err(e) => warn!(file_name = %file_name, error = %e, "failed to index file"),
            }
        }
        info!(files = total, documents = ingested.len(), "bulk ingest finished");
        Ok(ingested)
    }

    async fn delete(&self, doc_id: &str) -> Result<()> {
        self.components.index.delete(doc_id).await.map(|_| ())
    }

    async fn wait_idle(&self) {
        self.runner.wait_idle().await
    }

    async fn shutdown(&self) -> Result<()> {
        self.runner.shutdown().await;
        Ok(())
    }
}
