//! Per-document lifecycle tracking.
//!
//! An entry is created by whoever registers the document (the submitter
//! or an outside registrar) and is never deleted. Updates to an id that
//! has no entry are write misses: they are reported, not errors.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Phase, PhaseEntry};

#[async_trait]
pub trait PhaseTracker: Send + Sync {
    /// Create the entry for `doc_id` if it does not exist yet.
    async fn register(
        &self,
        doc_id: &str,
        file_name: &str,
        document_type: Option<&str>,
    ) -> Result<()>;

    /// Set the current phase. Returns `false` when no entry exists.
    async fn update_phase(&self, doc_id: &str, phase: Phase) -> Result<bool>;

    async fn get_phase(&self, doc_id: &str) -> Result<Option<Phase>>;

    async fn load_all(&self) -> Result<Vec<PhaseEntry>>;
}
