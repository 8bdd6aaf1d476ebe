use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use doc_intake_core::models::Document;

use super::{new_doc_id, parse_file, Components, Ingest, IngestSettings, StagedPipeline};

/// Ingestion through the [`StagedPipeline`]. Calls return after a flush
/// barrier, so returned documents are indexed unless the flush failed.
pub struct StagedIngestor {
    components: Components,
    pipeline: StagedPipeline,
}

impl StagedIngestor {
    pub fn new(components: Components, settings: IngestSettings) -> Self {
        let pipeline = StagedPipeline::new(
            components.transformer.clone(),
            components.index.clone(),
            settings.pipeline(),
        );
        Self {
            components,
            pipeline,
        }
    }

    pub fn pipeline(&self) -> &StagedPipeline {
        &self.pipeline
    }
}

#[async_trait]
impl Ingest for StagedIngestor {
    async fn ingest(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<Document>> {
        let docs = parse_file(&self.components.parser, file_name, bytes.to_vec(), &new_doc_id()).await?;
        self.pipeline.enqueue(file_name, docs.clone()).await?;
        self.pipeline.flush().await?;
        Ok(docs)
    }

    async fn bulk_ingest(&self, files: Vec<(String, Vec<u8>)>) -> Result<Vec<Document>> {
        let total = files.len();
        let mut queued = Vec::new();
        for (file_name, bytes) in files {
            match parse_file(&self.components.parser, &file_name, bytes, &new_doc_id()).await {
                Ok(docs) => {
                    self.pipeline.enqueue(&file_name, docs.clone()).await?;
                    queued.extend(docs);
                }
                Err(e) => warn!(file_name = %file_name, error = %e, "skipping file"),
            }
        }
        self.pipeline.flush().await?;
        info!(files = total, documents = queued.len(), "staged bulk ingest flushed");
        Ok(queued)
    }

    async fn delete(&self, doc_id: &str) -> Result<()> {
        self.components.index.delete(doc_id).await.map(|_| ())
    }

    async fn shutdown(&self) -> Result<()> {
        self.pipeline.shutdown().await
    }
}
