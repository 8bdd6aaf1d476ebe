//! Backpressure, flush threshold and flush failure behaviour of the
//! staged pipeline, driven directly through `StagedPipeline`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use doc_intake::index::SharedIndex;
use doc_intake::ingest::{PipelineConfig, StagedPipeline};
use doc_intake_core::embedding::NodeTransformer;
use doc_intake_core::index::memory::InMemoryIndex;
use doc_intake_core::index::EmbeddingIndex;
use doc_intake_core::models::{Document, Node};
use doc_intake_core::store::memory::InMemoryDocumentStore;
use tokio::sync::Semaphore;
use tokio::time::timeout;

// ─── Fakes ──────────────────────────────────────────────────────────

/// One node per document. Each call waits for a permit on `gate` first,
/// so a test can hold every embedding unit in flight.
struct GatedTransformer {
    gate: Arc<Semaphore>,
    started: AtomicUsize,
}

impl GatedTransformer {
    fn open() -> Self {
        Self::closed_with(Semaphore::MAX_PERMITS)
    }

    fn closed_with(permits: usize) -> Self {
        Self {
            gate: Arc::new(Semaphore::new(permits)),
            started: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl NodeTransformer for GatedTransformer {
    async fn transform(&self, docs: &[Document]) -> Result<Vec<Node>> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let _pass = self.gate.acquire().await?;
        if docs.iter().any(|d| d.file_name().starts_with("bad")) {
            return Err(anyhow!("embedding model rejected input"));
        }
        Ok(docs
            .iter()
            .map(|d| Node {
                id: uuid::Uuid::new_v4().to_string(),
                doc_id: d.id.clone(),
                chunk_index: 0,
                text: d.text.clone(),
                hash: String::new(),
                embedding: vec![1.0, 0.0],
                metadata: d.metadata.clone(),
            })
            .collect())
    }
}

/// Index whose inserts always fail. Records the size of every attempt.
#[derive(Default)]
struct FailingIndex {
    attempts: Mutex<Vec<usize>>,
}

#[async_trait]
impl EmbeddingIndex for FailingIndex {
    async fn insert(&self, nodes: Vec<Node>) -> Result<()> {
        self.attempts.lock().unwrap().push(nodes.len());
        Err(anyhow!("index volume is read-only"))
    }

    async fn delete(&self, _doc_id: &str) -> Result<usize> {
        Ok(0)
    }

    async fn persist(&self) -> Result<()> {
        Ok(())
    }

    async fn node_count(&self) -> Result<usize> {
        Ok(0)
    }

    async fn nodes_for(&self, _doc_id: &str) -> Result<Vec<Node>> {
        Ok(Vec::new())
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn config(workers: usize, doc_queue: usize, flush_at: usize) -> PipelineConfig {
    PipelineConfig {
        count_workers: workers,
        doc_queue_capacity: doc_queue,
        node_queue_capacity: 40,
        node_flush_count: flush_at,
        embed_batch_size: 16,
    }
}

fn doc(file_name: &str) -> Vec<Document> {
    let mut doc = Document::new(file_name, format!("contents of {}", file_name));
    doc.assign_id(&uuid::Uuid::new_v4().to_string());
    vec![doc]
}

fn shared(index: Arc<dyn EmbeddingIndex>) -> SharedIndex {
    SharedIndex::new(index, Arc::new(InMemoryDocumentStore::new()))
}

async fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    done()
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn full_worker_pool_blocks_senders() {
    let transformer = Arc::new(GatedTransformer::closed_with(0));
    let index = Arc::new(InMemoryIndex::new());
    let pipeline = StagedPipeline::new(transformer.clone(), shared(index.clone()), config(2, 20, 1000));

    // Two units hold the permits, the dispatcher holds a third item while
    // it waits for one, and twenty more fill the queue.
    for i in 0..23 {
        let name = format!("f{}.txt", i);
        timeout(Duration::from_secs(2), pipeline.enqueue(&name, doc(&name)))
            .await
            .expect("send within admission limit should not block")
            .unwrap();
    }
    assert!(wait_until(|| transformer.started.load(Ordering::SeqCst) == 2).await);

    let blocked = timeout(Duration::from_millis(200), pipeline.enqueue("f23.txt", doc("f23.txt"))).await;
    assert!(blocked.is_err(), "24th send must wait for a free worker");
    assert_eq!(transformer.started.load(Ordering::SeqCst), 2);

    transformer.gate.add_permits(1000);
    timeout(Duration::from_secs(2), pipeline.enqueue("f23.txt", doc("f23.txt")))
        .await
        .expect("send after release should complete")
        .unwrap();
    pipeline.flush().await.unwrap();

    assert_eq!(index.node_count().await.unwrap(), 24);
    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn threshold_triggers_flush_without_barrier() {
    let index = Arc::new(InMemoryIndex::new());
    let pipeline = StagedPipeline::new(Arc::new(GatedTransformer::open()), shared(index.clone()), config(2, 20, 3));

    for name in ["a.txt", "b.txt", "c.txt"] {
        pipeline.enqueue(name, doc(name)).await.unwrap();
    }
    assert!(wait_until(|| index.persist_count() == 1).await);
    assert_eq!(index.node_count().await.unwrap(), 3);

    for name in ["d.txt", "e.txt"] {
        pipeline.enqueue(name, doc(name)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(index.persist_count(), 1, "two nodes stay below the threshold");

    pipeline.flush().await.unwrap();
    assert_eq!(index.persist_count(), 2);
    assert_eq!(index.node_count().await.unwrap(), 5);

    // Nothing pending: the barrier acks without another write.
    pipeline.flush().await.unwrap();
    assert_eq!(index.persist_count(), 2);
    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_flush_discards_batch() {
    let index = Arc::new(FailingIndex::default());
    let pipeline = StagedPipeline::new(Arc::new(GatedTransformer::open()), shared(index.clone()), config(2, 20, 2));

    pipeline.enqueue("a.txt", doc("a.txt")).await.unwrap();
    pipeline.enqueue("b.txt", doc("b.txt")).await.unwrap();
    pipeline.flush().await.unwrap();
    assert_eq!(*index.attempts.lock().unwrap(), vec![2]);

    // The failed nodes are not offered again with the next batch.
    pipeline.enqueue("c.txt", doc("c.txt")).await.unwrap();
    pipeline.flush().await.unwrap();
    assert_eq!(*index.attempts.lock().unwrap(), vec![2, 1]);
    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_embedding_unit_is_dropped() {
    let index = Arc::new(InMemoryIndex::new());
    let pipeline = StagedPipeline::new(Arc::new(GatedTransformer::open()), shared(index.clone()), config(1, 4, 100));

    let good = doc("good.txt");
    let good_id = good[0].id.clone();
    pipeline.enqueue("bad.txt", doc("bad.txt")).await.unwrap();
    pipeline.enqueue("good.txt", good).await.unwrap();
    pipeline.flush().await.unwrap();

    assert_eq!(index.node_count().await.unwrap(), 1);
    assert_eq!(index.nodes_for(&good_id).await.unwrap().len(), 1);
    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_flushes_remainder_and_closes() {
    let index = Arc::new(InMemoryIndex::new());
    let pipeline = StagedPipeline::new(Arc::new(GatedTransformer::open()), shared(index.clone()), config(2, 20, 100));

    pipeline.enqueue("a.txt", doc("a.txt")).await.unwrap();
    pipeline.enqueue("b.txt", doc("b.txt")).await.unwrap();
    pipeline.shutdown().await.unwrap();

    assert_eq!(index.node_count().await.unwrap(), 2);
    assert_eq!(index.persist_count(), 1);

    pipeline.shutdown().await.unwrap();
    assert!(pipeline.enqueue("late.txt", doc("late.txt")).await.is_err());
    assert!(pipeline.flush().await.is_err());
}
