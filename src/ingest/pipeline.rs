//! Two-queue staged pipeline.
//!
//! ```text
//! enqueue ──doc_q──▶ dispatcher ──spawn (≤ count_workers)──▶ embed ──node_q──▶ writer ──▶ index
//! ```
//!
//! The dispatcher takes a semaphore permit before spawning each embedding
//! unit and the unit gives it back after handing its nodes to `node_q`.
//! When every permit is out the dispatcher stops receiving, `doc_q` fills
//! up and `enqueue` blocks.
//!
//! `Flush` and `Quit` travel the same path as work: the dispatcher waits
//! for in-flight units before forwarding them, so the writer sees every
//! node enqueued before the command.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use doc_intake_core::embedding::NodeTransformer;
use doc_intake_core::models::{Document, Node};
use doc_intake_core::IngestError;

use super::buffer::{WriteBatch, WriteBuffer};
use crate::index::SharedIndex;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub count_workers: usize,
    pub doc_queue_capacity: usize,
    pub node_queue_capacity: usize,
    pub node_flush_count: usize,
    pub embed_batch_size: usize,
}

#[derive(Debug)]
pub enum DocCommand {
    Process { file_name: String, docs: Vec<Document> },
    Flush(oneshot::Sender<()>),
    Quit,
}

#[derive(Debug)]
pub enum NodeCommand {
    Process {
        file_name: String,
        docs: Vec<Document>,
        nodes: Vec<Node>,
    },
    Flush(oneshot::Sender<()>),
    Quit,
}

pub struct StagedPipeline {
    doc_tx: mpsc::Sender<DocCommand>,
    tasks: tokio::sync::Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl StagedPipeline {
    /// Spawn the dispatcher and writer tasks. Requires a tokio runtime.
    pub fn new(transformer: Arc<dyn NodeTransformer>, index: SharedIndex, config: PipelineConfig) -> Self {
        let (doc_tx, doc_rx) = mpsc::channel(config.doc_queue_capacity.max(1));
        let (node_tx, node_rx) = mpsc::channel(config.node_queue_capacity.max(1));
        let permits = Arc::new(Semaphore::new(config.count_workers.max(1)));

        let dispatcher = tokio::spawn(dispatch(doc_rx, node_tx, transformer, permits));
        let writer = tokio::spawn(write(
            node_rx,
            index,
            WriteBuffer::new(config.node_flush_count),
            config.embed_batch_size,
        ));

        info!(
            workers = config.count_workers,
            doc_queue = config.doc_queue_capacity,
            node_queue = config.node_queue_capacity,
            flush_at = config.node_flush_count,
            "staged pipeline started"
        );
        Self {
            doc_tx,
            tasks: tokio::sync::Mutex::new(Some((dispatcher, writer))),
        }
    }

    /// Queue one file's documents for embedding. Waits while `doc_q` is full.
    pub async fn enqueue(&self, file_name: &str, docs: Vec<Document>) -> Result<()> {
        self.doc_tx
            .send(DocCommand::Process {
                file_name: file_name.to_string(),
                docs,
            })
            .await
            .map_err(|_| anyhow!("staged pipeline is shut down"))
    }

    /// Returns once everything enqueued before the call has been written
    /// (or its write has failed and been logged).
    pub async fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.doc_tx
            .send(DocCommand::Flush(ack_tx))
            .await
            .map_err(|_| anyhow!("staged pipeline is shut down"))?;
        ack_rx
            .await
            .map_err(|_| anyhow!("staged pipeline stopped before acknowledging flush"))
    }

    /// Flush remaining work and join both tasks. Later calls are no-ops.
    pub async fn shutdown(&self) -> Result<()> {
        let Some((dispatcher, writer)) = self.tasks.lock().await.take() else {
            return Ok(());
        };
        if self.doc_tx.send(DocCommand::Quit).await.is_err() {
            debug!("dispatcher already gone");
        }
        dispatcher.await?;
        writer.await?;
        info!("staged pipeline stopped");
        Ok(())
    }
}

async fn dispatch(
    mut doc_rx: mpsc::Receiver<DocCommand>,
    node_tx: mpsc::Sender<NodeCommand>,
    transformer: Arc<dyn NodeTransformer>,
    permits: Arc<Semaphore>,
) {
    let mut workers = JoinSet::new();

    while let Some(command) = doc_rx.recv().await {
        match command {
            DocCommand::Process { file_name, docs } => {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let transformer = transformer.clone();
                let node_tx = node_tx.clone();
                workers.spawn(async move {
                    match transformer.transform(&docs).await {
                        Ok(nodes) => {
                            debug!(file_name = %file_name, nodes = nodes.len(), "file embedded");
                            let sent = node_tx
                                .send(NodeCommand::Process {
                                    file_name,
                                    docs,
                                    nodes,
                                })
                                .await;
                            if sent.is_err() {
                                warn!("writer gone, embedded nodes dropped");
                            }
                        }
                        Err(e) => error!(file_name = %file_name, error = %e, "embedding failed, file dropped"),
                    }
                    drop(permit);
                });
                while let Some(done) = workers.try_join_next() {
                    log_worker(done);
                }
            }
            DocCommand::Flush(ack) => {
                drain(&mut workers).await;
                if node_tx.send(NodeCommand::Flush(ack)).await.is_err() {
                    warn!("writer gone, flush not forwarded");
                }
            }
            DocCommand::Quit => {
                drain(&mut workers).await;
                let _ = node_tx.send(NodeCommand::Quit).await;
                break;
            }
        }
    }

    drain(&mut workers).await;
}

async fn drain(workers: &mut JoinSet<()>) {
    while let Some(done) = workers.join_next().await {
        log_worker(done);
    }
}

fn log_worker(done: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = done {
        error!(error = %e, "embedding worker panicked");
    }
}

async fn write(
    mut node_rx: mpsc::Receiver<NodeCommand>,
    index: SharedIndex,
    mut buffer: WriteBuffer,
    batch_size: usize,
) {
    while let Some(command) = node_rx.recv().await {
        match command {
            NodeCommand::Process {
                file_name,
                docs,
                nodes,
            } => {
                if let Some(batch) = buffer.accumulate(file_name, docs, nodes) {
                    flush_batch(&index, batch, batch_size).await;
                }
            }
            NodeCommand::Flush(ack) => {
                if let Some(batch) = buffer.take() {
                    flush_batch(&index, batch, batch_size).await;
                }
                let _ = ack.send(());
            }
            NodeCommand::Quit => break,
        }
    }

    if let Some(batch) = buffer.take() {
        flush_batch(&index, batch, batch_size).await;
    }
}

/// Write one batch. Failures are logged with the affected files and the
/// batch is dropped.
async fn flush_batch(index: &SharedIndex, batch: WriteBatch, batch_size: usize) {
    let WriteBatch {
        files,
        documents,
        nodes,
    } = batch;
    let count = nodes.len();
    match index.save(&documents, nodes, batch_size).await {
        Ok(_) => info!(files = files.len(), nodes = count, "flushed batch"),
        Err(e) => {
            let err = IngestError::Flush {
                files,
                reason: format!("{:#}", e),
            };
            error!(error = %err, "batch discarded");
        }
    }
}
