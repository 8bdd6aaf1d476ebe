//! Ingestion orchestrators.
//!
//! Four strategies share one [`Ingest`] interface and one set of injected
//! collaborators ([`Components`]):
//!
//! | Mode | `ingest` | `bulk_ingest` |
//! |------|----------|---------------|
//! | [`Simple`](SimpleIngestor) | stub handle, background processing with extraction | sequential parse and save |
//! | [`Batch`](BatchIngestor) | parse and save | concurrent parse, one save |
//! | [`Parallel`](ParallelIngestor) | background with extraction, else parse and save | sequential submit, else concurrent ingest |
//! | [`Staged`](StagedIngestor) | parse, enqueue, flush barrier | parse and enqueue each, one flush |
//!
//! Background processing (Simple, Parallel with extraction) moves each
//! document through `parsing`, then `extraction` and `embedding` running
//! concurrently, then `rag`, and finally `completed`. See
//! [`background`] for the failure rules.

pub mod background;
pub mod batch;
pub mod buffer;
pub mod parallel;
pub mod pipeline;
pub mod simple;
pub mod staged;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use doc_intake_core::embedding::{EmbeddingTransformer, NodeTransformer};
use doc_intake_core::gateway::{ExtractionBackend, Parser};
use doc_intake_core::models::Document;
use doc_intake_core::phase::memory::InMemoryPhaseTracker;
use doc_intake_core::phase::PhaseTracker;
use doc_intake_core::reconcile::{RagQueryService, ReconcileConfig, Reconciler};
use doc_intake_core::schema::Schema;
use doc_intake_core::IngestError;

use crate::config::Config;
use crate::docstore::FsDocumentStore;
use crate::embedding::create_embedder;
use crate::extraction::{ExtractionGateway, ExtractionStore};
use crate::index::{FileIndex, SharedIndex};
use crate::parse::FileParser;
use crate::phase::SqlitePhaseTracker;

pub use background::BackgroundRunner;
pub use batch::BatchIngestor;
pub use parallel::ParallelIngestor;
pub use pipeline::{PipelineConfig, StagedPipeline};
pub use simple::SimpleIngestor;
pub use staged::StagedIngestor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    #[default]
    Simple,
    Batch,
    Parallel,
    #[serde(alias = "pipeline")]
    Staged,
}

#[async_trait]
pub trait Ingest: Send + Sync {
    /// Submit one file. Background strategies return a stub handle
    /// immediately; the others return the parsed documents once indexed.
    async fn ingest(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<Document>>;

    /// Submit many files. Per-file failures are logged and skipped.
    async fn bulk_ingest(&self, files: Vec<(String, Vec<u8>)>) -> Result<Vec<Document>>;

    /// Remove a document's nodes and record under the index lock.
    async fn delete(&self, doc_id: &str) -> Result<()>;

    /// Wait for submitted background work without stopping the orchestrator.
    async fn wait_idle(&self) {}

    /// Drain background work and stop worker tasks.
    async fn shutdown(&self) -> Result<()>;
}

/// Collaborators an orchestrator is wired against.
#[derive(Clone)]
pub struct Components {
    pub parser: Arc<dyn Parser>,
    pub transformer: Arc<dyn NodeTransformer>,
    pub index: SharedIndex,
    pub phases: Arc<dyn PhaseTracker>,
    /// Structured extraction. Background runs skip extraction when unset.
    pub extraction: Option<Arc<ExtractionGateway>>,
    /// Gap filling. Reconciliation is skipped when unset.
    pub reconciler: Option<Arc<Reconciler>>,
}

/// Extraction collaborators supplied by the host application.
pub struct ExtractionServices {
    pub backend: Arc<dyn ExtractionBackend>,
    pub schema: Schema,
    /// Enables reconciliation when set.
    pub rag: Option<Arc<dyn RagQueryService>>,
}

impl Components {
    /// Wire the file-backed collaborators under `storage.root`: original
    /// uploads, the index snapshot and extraction results. Phases go to
    /// SQLite when `phase.db_path` is set and stay in memory otherwise.
    pub async fn open(config: &Config, services: Option<ExtractionServices>) -> Result<Self> {
        let root = &config.storage.root;

        let embedder = create_embedder(&config.embedding)?;
        let transformer = EmbeddingTransformer::new(
            embedder,
            config.chunking.max_tokens,
            config.embedding.batch_size,
        );
        let index = SharedIndex::new(
            Arc::new(FileIndex::open(root).await?),
            Arc::new(FsDocumentStore::new(root)),
        );
        let phases: Arc<dyn PhaseTracker> = match &config.phase.db_path {
            Some(path) => Arc::new(SqlitePhaseTracker::open(path).await?),
            None => Arc::new(InMemoryPhaseTracker::new()),
        };

        let (extraction, reconciler) = match services {
            Some(services) => {
                let store = Arc::new(ExtractionStore::new(root));
                let gateway = ExtractionGateway::new(services.backend, store, services.schema);
                let reconciler = services.rag.map(|rag| Arc::new(Reconciler::new(rag)));
                (Some(Arc::new(gateway)), reconciler)
            }
            None => (None, None),
        };

        Ok(Self {
            parser: Arc::new(FileParser::new()),
            transformer: Arc::new(transformer),
            index,
            phases,
            extraction,
            reconciler,
        })
    }
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub count_workers: usize,
    pub embed_batch_size: usize,
    pub doc_queue_capacity: usize,
    pub node_queue_capacity: usize,
    pub node_flush_count: usize,
    pub extraction: bool,
    pub document_type: String,
    pub reconcile: ReconcileConfig,
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub register_on_submit: bool,
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Self {
        let ingestion = &config.ingestion;
        Self {
            count_workers: ingestion.count_workers,
            embed_batch_size: ingestion.embed_batch_size,
            doc_queue_capacity: ingestion.doc_queue_capacity,
            node_queue_capacity: ingestion.node_queue_capacity,
            node_flush_count: ingestion.node_flush_count,
            extraction: ingestion.extraction,
            document_type: config.extraction.document_type.clone(),
            reconcile: config.reconciliation.to_reconcile_config(),
            wait_timeout: Duration::from_millis(config.phase.wait_timeout_ms),
            poll_interval: Duration::from_millis(config.phase.poll_interval_ms),
            register_on_submit: config.phase.register_on_submit,
        }
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            count_workers: self.count_workers,
            doc_queue_capacity: self.doc_queue_capacity,
            node_queue_capacity: self.node_queue_capacity,
            node_flush_count: self.node_flush_count,
            embed_batch_size: self.embed_batch_size,
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub enum Ingestor {
    Simple(SimpleIngestor),
    Batch(BatchIngestor),
    Parallel(ParallelIngestor),
    Staged(StagedIngestor),
}

/// Build the orchestrator for `mode`. Staged mode spawns its queue tasks,
/// so this must run inside a tokio runtime.
pub fn create_ingestor(mode: IngestMode, settings: IngestSettings, components: Components) -> Ingestor {
    match mode {
        IngestMode::Simple => Ingestor::Simple(SimpleIngestor::new(components, settings)),
        IngestMode::Batch => Ingestor::Batch(BatchIngestor::new(components, settings)),
        IngestMode::Parallel => Ingestor::Parallel(ParallelIngestor::new(components, settings)),
        IngestMode::Staged => Ingestor::Staged(StagedIngestor::new(components, settings)),
    }
}

/// [`create_ingestor`] with mode and settings taken from `config`.
pub fn create_ingestor_from_config(config: &Config, components: Components) -> Ingestor {
    create_ingestor(
        config.ingestion.mode,
        IngestSettings::from_config(config),
        components,
    )
}

impl Ingestor {
    pub fn mode(&self) -> IngestMode {
        match self {
            Ingestor::Simple(_) => IngestMode::Simple,
            Ingestor::Batch(_) => IngestMode::Batch,
            Ingestor::Parallel(_) => IngestMode::Parallel,
            Ingestor::Staged(_) => IngestMode::Staged,
        }
    }

    fn inner(&self) -> &dyn Ingest {
        match self {
            Ingestor::Simple(i) => i,
            Ingestor::Batch(i) => i,
            Ingestor::Parallel(i) => i,
            Ingestor::Staged(i) => i,
        }
    }
}

#[async_trait]
impl Ingest for Ingestor {
    async fn ingest(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<Document>> {
        self.inner().ingest(file_name, bytes).await
    }

    async fn bulk_ingest(&self, files: Vec<(String, Vec<u8>)>) -> Result<Vec<Document>> {
        self.inner().bulk_ingest(files).await
    }

    async fn delete(&self, doc_id: &str) -> Result<()> {
        self.inner().delete(doc_id).await
    }

    async fn wait_idle(&self) {
        self.inner().wait_idle().await
    }

    async fn shutdown(&self) -> Result<()> {
        self.inner().shutdown().await
    }
}

pub(crate) fn new_doc_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Parse on the blocking pool and bind every resulting document to `doc_id`.
pub(crate) async fn parse_file(
    parser: &Arc<dyn Parser>,
    file_name: &str,
    bytes: Vec<u8>,
    doc_id: &str,
) -> std::result::Result<Vec<Document>, IngestError> {
    let parser = parser.clone();
    let name = file_name.to_string();
    let mut docs = tokio::task::spawn_blocking(move || parser.parse(&name, &bytes))
        .await
        .map_err(|e| IngestError::parse(file_name, format!("parser task failed: {}", e)))??;

    for doc in &mut docs {
        doc.assign_id(doc_id);
        doc.metadata.file_name = file_name.to_string();
    }
    Ok(docs)
}

/// Transform documents into nodes, then write them under the index lock.
pub(crate) async fn save_documents(
    components: &Components,
    docs: &[Document],
    batch_size: usize,
) -> Result<usize> {
    let nodes = components.transformer.transform(docs).await?;
    components.index.save(docs, nodes, batch_size).await
}
