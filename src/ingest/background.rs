//! Per-document background state machine.
//!
//! ```text
//! submit -> parsing -> {extraction, embedding} -> rag -> completed
//!                  \-> error -> completed
//! ```
//!
//! Extraction and embedding run as two spawned tasks joined before the
//! `rag` phase; a failure in one is logged and does not touch the other.
//! A parse failure writes `error`, and the document is then marked
//! `completed` regardless, so observers always see a terminal phase and
//! must read the extraction result status to learn about failures.
//! Reconciliation is best-effort and serialized across documents.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use doc_intake_core::models::{Document, ExtractionResult, Phase};
use doc_intake_core::IngestError;

use super::{new_doc_id, parse_file, save_documents, Components, IngestSettings};
use crate::phase::{wait_for_entry, PhaseReporter};

struct StageContext {
    components: Components,
    settings: IngestSettings,
    reporter: PhaseReporter,
    rag_lock: tokio::sync::Mutex<()>,
}

#[derive(Default)]
struct InFlightState {
    running: usize,
    closed: bool,
}

/// Accepted submissions that have not finished. Admission and `close`
/// share one lock, so nothing is admitted after a shutdown has started
/// waiting. Tasks are detached: a dropped runner or a cancelled waiter
/// never aborts a document mid-way.
#[derive(Default)]
struct InFlight {
    state: Mutex<InFlightState>,
    idle: Notify,
}

impl InFlight {
    fn admit(self: &Arc<Self>) -> Result<Admission> {
        let mut state = self.state.lock().map_err(|_| anyhow!("in-flight lock poisoned"))?;
        if state.closed {
            bail!("ingestor is shut down");
        }
        state.running += 1;
        Ok(Admission {
            inflight: self.clone(),
        })
    }

    fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
    }

    fn running(&self) -> usize {
        self.state.lock().map(|s| s.running).unwrap_or(0)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.running() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Slot held by one submission from admission until its task ends.
struct Admission {
    inflight: Arc<InFlight>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        let idle = match self.inflight.state.lock() {
            Ok(mut state) => {
                state.running = state.running.saturating_sub(1);
                state.running == 0
            }
            Err(_) => true,
        };
        if idle {
            self.inflight.idle.notify_waiters();
        }
    }
}

/// Accepts submissions and runs them to completion on spawned tasks.
pub struct BackgroundRunner {
    ctx: Arc<StageContext>,
    inflight: Arc<InFlight>,
}

impl BackgroundRunner {
    pub fn new(components: Components, settings: IngestSettings) -> Self {
        let reporter = PhaseReporter::new(components.phases.clone());
        Self {
            ctx: Arc::new(StageContext {
                components,
                settings,
                reporter,
                rag_lock: tokio::sync::Mutex::new(()),
            }),
            inflight: Arc::new(InFlight::default()),
        }
    }

    /// Store the original, allocate a document id and start background
    /// processing. Returns a stub with the new id and no text.
    pub async fn submit(&self, file_name: &str, bytes: &[u8]) -> Result<Document> {
        // Held across the awaits below so a concurrent shutdown waits for
        // this submission too.
        let admission = self.inflight.admit()?;

        let doc_id = new_doc_id();
        let ctx = &self.ctx;
        ctx.components
            .index
            .documents()
            .store_original(&doc_id, file_name, bytes)
            .await
            .with_context(|| format!("Failed to store original for {}", file_name))?;

        if ctx.settings.register_on_submit {
            ctx.components
                .phases
                .register(&doc_id, file_name, Some(&ctx.settings.document_type))
                .await
                .context("Failed to register phase entry")?;
        }

        let (task_ctx, task_id, task_name) = (ctx.clone(), doc_id.clone(), file_name.to_string());
        tokio::spawn(async move {
            let _admission = admission;
            let run = tokio::spawn(process_document(task_ctx.clone(), task_id.clone(), task_name));
            if let Err(e) = run.await {
                error!(doc_id = %task_id, error = %e, "background ingestion task panicked");
                task_ctx.reporter.set(&task_id, Phase::Error).await;
                task_ctx.reporter.set(&task_id, Phase::Completed).await;
            }
        });

        info!(doc_id = %doc_id, file_name, "document submitted");
        Ok(Document::stub(&doc_id, file_name))
    }

    /// Wait until every submitted document has finished processing.
    /// Cancelling the wait leaves the documents running.
    pub async fn wait_idle(&self) {
        self.inflight.wait_idle().await
    }

    /// Refuse new submissions and drain outstanding ones.
    pub async fn shutdown(&self) {
        self.inflight.close();
        self.wait_idle().await;
    }
}

async fn process_document(ctx: Arc<StageContext>, doc_id: String, file_name: String) {
    let settings = &ctx.settings;
    if let Err(e) = wait_for_entry(
        ctx.reporter.tracker().as_ref(),
        &doc_id,
        settings.wait_timeout,
        settings.poll_interval,
    )
    .await
    {
        warn!(doc_id = %doc_id, error = %e, "continuing without phase entry");
    }

    if let Err(e) = run_stages(&ctx, &doc_id, &file_name).await {
        error!(doc_id = %doc_id, file_name = %file_name, error = %e, "background ingestion failed");
        ctx.reporter.set(&doc_id, Phase::Error).await;
    }

    // Terminal even after an error.
    ctx.reporter.set(&doc_id, Phase::Completed).await;
    debug!(doc_id = %doc_id, "background processing finished");
}

/// Read the stored upload back. A missing or unreadable original is a
/// parse failure of that document.
async fn load_original(
    ctx: &StageContext,
    doc_id: &str,
    file_name: &str,
) -> std::result::Result<Vec<u8>, IngestError> {
    match ctx.components.index.documents().load_original(doc_id).await {
        Ok(Some((_, bytes))) => Ok(bytes),
        Ok(None) => Err(IngestError::parse(file_name, "stored original not found")),
        Err(e) => Err(IngestError::parse(file_name, format!("failed to load stored original: {:#}", e))),
    }
}

async fn run_stages(
    ctx: &Arc<StageContext>,
    doc_id: &str,
    file_name: &str,
) -> std::result::Result<(), IngestError> {
    ctx.reporter.set(doc_id, Phase::Parsing).await;
    let bytes = load_original(ctx, doc_id, file_name).await?;
    let docs = Arc::new(parse_file(&ctx.components.parser, file_name, bytes, doc_id).await?);

    let extraction = ctx.components.extraction.clone().map(|gateway| {
        let (ctx, docs) = (ctx.clone(), docs.clone());
        let (doc_id, file_name) = (doc_id.to_string(), file_name.to_string());
        tokio::spawn(async move {
            ctx.reporter.set(&doc_id, Phase::Extraction).await;
            gateway
                .extract_document(&docs, &ctx.settings.document_type, &file_name, &doc_id)
                .await
        })
    });

    let embedding = {
        let (ctx, docs) = (ctx.clone(), docs.clone());
        let doc_id = doc_id.to_string();
        tokio::spawn(async move {
            ctx.reporter.set(&doc_id, Phase::Embedding).await;
            save_documents(&ctx.components, &docs, ctx.settings.embed_batch_size).await
        })
    };

    let extraction = async move {
        match extraction {
            Some(task) => Some(task.await),
            None => None,
        }
    };
    let (extracted, embedded) = tokio::join!(extraction, embedding);

    match embedded {
        Ok(Ok(nodes)) => info!(doc_id, nodes, "document embedded"),
        Ok(Err(e)) => error!(doc_id, file_name, error = %e, "embedding failed"),
        Err(e) => error!(doc_id, file_name, error = %e, "embedding task panicked"),
    }

    let result: Option<ExtractionResult> = match extracted {
        Some(Ok(result)) => Some(result),
        Some(Err(e)) => {
            error!(doc_id, error = %e, "extraction task panicked");
            None
        }
        None => None,
    };

    let mut docs = Arc::try_unwrap(docs).unwrap_or_else(|shared| (*shared).clone());
    if let Some(result) = result.as_ref().filter(|r| r.is_completed()) {
        docs.iter_mut().for_each(|d| d.apply_extraction(result));
    }

    let _serial = ctx.rag_lock.lock().await;
    ctx.reporter.set(doc_id, Phase::Rag).await;
    if let Err(e) = reconcile_document(ctx, doc_id, &docs).await {
        warn!(doc_id, error = %e, "reconciliation skipped after failure");
    }
    Ok(())
}

/// Fill gaps in the stored extraction record, if there is one worth
/// filling, and write the merged record back.
async fn reconcile_document(
    ctx: &StageContext,
    doc_id: &str,
    docs: &[Document],
) -> std::result::Result<(), IngestError> {
    let (Some(gateway), Some(reconciler)) = (&ctx.components.extraction, &ctx.components.reconciler) else {
        return Ok(());
    };
    if docs.first().and_then(|d| d.metadata.document_type.as_ref()).is_none() {
        debug!(doc_id, "no extraction applied, nothing to reconcile");
        return Ok(());
    }

    let store = gateway.store();
    let stored = store
        .load_result(doc_id)
        .await
        .map_err(|e| IngestError::reconciliation(doc_id, e))?;
    let Some(mut result) = stored.filter(|r| r.is_completed() && r.has_content()) else {
        debug!(doc_id, "no usable extraction result, nothing to reconcile");
        return Ok(());
    };

    let merged = reconciler
        .fill_gaps(doc_id, result.result.clone(), gateway.schema(), &ctx.settings.reconcile)
        .await?;
    if merged == result.result {
        return Ok(());
    }

    result.result = merged;
    store
        .save_result(doc_id, &result)
        .await
        .map_err(|e| IngestError::reconciliation(doc_id, e))?;
    info!(doc_id, "extraction result reconciled");
    Ok(())
}
