//! Write-side accumulation for the staged pipeline.

use doc_intake_core::models::{Document, Node};

/// Everything one index write needs, plus the files it came from for
/// error reporting.
#[derive(Debug, Default)]
pub struct WriteBatch {
    pub files: Vec<String>,
    pub documents: Vec<Document>,
    pub nodes: Vec<Node>,
}

/// Collects embedded files until the node count reaches `threshold`.
///
/// Handing out a batch always empties the buffer, so whatever happens to
/// the write, no node is offered twice.
#[derive(Debug)]
pub struct WriteBuffer {
    threshold: usize,
    pending: WriteBatch,
}

impl WriteBuffer {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            pending: WriteBatch::default(),
        }
    }

    /// Add one file's output. Returns the batch to write once the node
    /// count reaches the threshold.
    pub fn accumulate(&mut self, file_name: String, documents: Vec<Document>, nodes: Vec<Node>) -> Option<WriteBatch> {
        self.pending.files.push(file_name);
        self.pending.documents.extend(documents);
        self.pending.nodes.extend(nodes);
        if self.pending.nodes.len() >= self.threshold {
            self.take()
        } else {
            None
        }
    }

    /// Take whatever is pending. `None` when nothing was accumulated.
    pub fn take(&mut self) -> Option<WriteBatch> {
        if self.pending.files.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }

    pub fn pending_nodes(&self) -> usize {
        self.pending.nodes.len()
    }
}
