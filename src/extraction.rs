//! Structured extraction: the gateway in front of the backend and the
//! on-disk store for its results.
//!
//! Layout under the storage root:
//!
//! ```text
//! extraction_results/<doc_id>/chunks.json   {chunks, document_type, file_name}
//! extraction_results/<doc_id>/result.json   ExtractionResult
//! ```
//!
//! The chunk archive is written before the backend is called, so the input
//! is kept even when extraction fails. Failed attempts are returned to the
//! caller with `status = error` and are not persisted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use doc_intake_core::gateway::{agent_for_document_type, ExtractionBackend, ExtractionChunk};
use doc_intake_core::models::{Document, ExtractionResult};
use doc_intake_core::schema::Schema;
use doc_intake_core::IngestError;

use crate::docstore::safe_component;

/// Parser metadata keys carried into extraction chunks.
const CHUNK_METADATA_KEYS: [&str; 3] = ["page", "bbox", "chunk_type"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkArchive {
    pub chunks: Vec<ExtractionChunk>,
    pub document_type: String,
    pub file_name: String,
}

pub struct ExtractionStore {
    root: PathBuf,
}

impl ExtractionStore {
    pub fn new(storage_root: &Path) -> Self {
        Self {
            root: storage_root.join("extraction_results"),
        }
    }

    fn dir(&self, doc_id: &str) -> PathBuf {
        self.root.join(safe_component(doc_id))
    }

    async fn write_json<T: Serialize>(&self, doc_id: &str, name: &str, value: &T) -> Result<()> {
        let dir = self.dir(doc_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(name);
        tokio::fs::write(&path, serde_json::to_vec_pretty(value)?)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(&self, path: &Path) -> Result<Option<T>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(
                serde_json::from_slice(&bytes)
                    .with_context(|| format!("Corrupt record: {}", path.display()))?,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save_chunks(&self, doc_id: &str, archive: &ChunkArchive) -> Result<()> {
        self.write_json(doc_id, "chunks.json", archive).await
    }

    pub async fn load_chunks(&self, doc_id: &str) -> Result<Option<ChunkArchive>> {
        self.read_json(&self.dir(doc_id).join("chunks.json")).await
    }

    pub async fn save_result(&self, doc_id: &str, result: &ExtractionResult) -> Result<()> {
        self.write_json(doc_id, "result.json", result).await
    }

    pub async fn load_result(&self, doc_id: &str) -> Result<Option<ExtractionResult>> {
        self.read_json(&self.dir(doc_id).join("result.json")).await
    }

    /// All stored results, optionally of one document type, oldest first.
    pub async fn list_results(&self, document_type: Option<&str>) -> Result<Vec<ExtractionResult>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut results = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path().join("result.json");
            match self.read_json::<ExtractionResult>(&path).await {
                Ok(Some(r)) if document_type.map_or(true, |t| r.document_type == t) => results.push(r),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable extraction result"),
            }
        }
        results.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(results)
    }
}

/// Runs the extraction backend for a document and records the outcome.
pub struct ExtractionGateway {
    backend: Arc<dyn ExtractionBackend>,
    store: Arc<ExtractionStore>,
    schema: Schema,
}

impl ExtractionGateway {
    pub fn new(backend: Arc<dyn ExtractionBackend>, store: Arc<ExtractionStore>, schema: Schema) -> Self {
        Self {
            backend,
            store,
            schema,
        }
    }

    pub fn store(&self) -> &Arc<ExtractionStore> {
        &self.store
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Extract a structured record from `docs`.
    ///
    /// Never fails: backend faults come back as a result with
    /// `status = error`. Every call mints a new extraction id.
    pub async fn extract_document(
        &self,
        docs: &[Document],
        document_type: &str,
        file_name: &str,
        doc_id: &str,
    ) -> ExtractionResult {
        let archive = ChunkArchive {
            chunks: docs.iter().map(to_chunk).collect(),
            document_type: document_type.to_string(),
            file_name: file_name.to_string(),
        };
        if let Err(e) = self.store.save_chunks(doc_id, &archive).await {
            warn!(doc_id, error = %e, "failed to archive extraction chunks");
        }

        let agent = agent_for_document_type(document_type);
        match self.backend.extract(agent, &archive.chunks, &self.schema).await {
            Ok(record) => {
                let result = ExtractionResult::completed(doc_id, document_type, file_name, record);
                if let Err(e) = self.store.save_result(doc_id, &result).await {
                    warn!(doc_id, error = %e, "failed to persist extraction result");
                }
                info!(doc_id, agent, extraction_id = %result.extraction_id, "extraction completed");
                result
            }
            Err(e) => {
                let err = IngestError::Extraction {
                    doc_id: doc_id.to_string(),
                    reason: format!("{:#}", e),
                };
                warn!(doc_id, agent, error = %err, "extraction failed");
                ExtractionResult::failed(doc_id, document_type, file_name, err)
            }
        }
    }
}

fn to_chunk(doc: &Document) -> ExtractionChunk {
    let metadata: Map<String, Value> = CHUNK_METADATA_KEYS
        .iter()
        .filter_map(|k| doc.metadata.extra.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect();
    ExtractionChunk {
        text: doc.text.clone(),
        metadata,
    }
}
