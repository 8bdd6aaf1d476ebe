use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use doc_intake_core::models::Document;

use super::{new_doc_id, parse_file, save_documents, BackgroundRunner, Components, Ingest, IngestSettings};

/// With extraction enabled, every upload goes through the background state
/// machine. Without it, parsing runs on a worker pool of `count_workers`
/// and bulk uploads fan out across that pool.
pub struct ParallelIngestor {
    components: Components,
    settings: IngestSettings,
    runner: BackgroundRunner,
    workers: Arc<Semaphore>,
}

impl ParallelIngestor {
    pub fn new(components: Components, settings: IngestSettings) -> Self {
        let runner = BackgroundRunner::new(components.clone(), settings.clone());
        let workers = Arc::new(Semaphore::new(settings.count_workers.max(1)));
        Self {
            components,
            settings,
            runner,
            workers,
        }
    }

    async fn ingest_now(&self, file_name: &str, bytes: Vec<u8>) -> Result<Vec<Document>> {
        let docs = {
            let _permit = self.workers.acquire().await?;
            parse_file(&self.components.parser, file_name, bytes, &new_doc_id()).await?
        };
        save_documents(&self.components, &docs, self.settings.embed_batch_size).await?;
        Ok(docs)
    }
}

#[async_trait]
impl Ingest for ParallelIngestor {
    async fn ingest(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<Document>> {
        if self.settings.extraction {
            Ok(vec![self.runner.submit(file_name, bytes).await?])
        } else {
            self.ingest_now(file_name, bytes.to_vec()).await
        }
    }

    async fn bulk_ingest(&self, files: Vec<(String, Vec<u8>)>) -> Result<Vec<Document>> {
        let total = files.len();
        let mut ingested = Vec::new();

        if self.settings.extraction {
            for (file_name, bytes) in files {
                match self.runner.submit(&file_name, &bytes).await {
                    Ok(stub) => ingested.push(stub),
                    Err(e) => warn!(file_name = %file_name, error = %e, "submission failed"),
                }
            }
        } else {
            let runs = files.into_iter().map(|(file_name, bytes)| async move {
                let outcome = self.ingest_now(&file_name, bytes).await;
                (file_name, outcome)
            });
            // join_all keeps input order.
            for (file_name, outcome) in join_all(runs).await {
                match outcome {
                    Ok(docs) => ingested.extend(docs),
                    Err(e) => warn!(file_name = %file_name, error = %e, "skipping file"),
                }
            }
        }

        info!(files = total, documents = ingested.len(), "parallel bulk ingest finished");
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
        self.workers.close();
        Ok(())
    }
}
