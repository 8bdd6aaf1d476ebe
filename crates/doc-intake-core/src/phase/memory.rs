//! In-memory [`PhaseTracker`] that also records every transition, so tests
//! can assert on the full sequence a document went through.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{Phase, PhaseEntry};

use super::PhaseTracker;

#[derive(Default)]
struct Inner {
    /// Registration order.
    order: Vec<String>,
    entries: HashMap<String, PhaseEntry>,
    history: HashMap<String, Vec<Phase>>,
}

#[derive(Default)]
pub struct InMemoryPhaseTracker {
    inner: RwLock<Inner>,
}

impl InMemoryPhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every phase written for `doc_id`, oldest first.
    pub fn history(&self, doc_id: &str) -> Vec<Phase> {
        self.read()
            .ok()
            .and_then(|inner| inner.history.get(doc_id).cloned())
            .unwrap_or_default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| anyhow!("phase tracker lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| anyhow!("phase tracker lock poisoned"))
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[async_trait]
impl PhaseTracker for InMemoryPhaseTracker {
    async fn register(
        &self,
        doc_id: &str,
        file_name: &str,
        document_type: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.write()?;
        if inner.entries.contains_key(doc_id) {
            return Ok(());
        }
        inner.order.push(doc_id.to_string());
        inner.entries.insert(
            doc_id.to_string(),
            PhaseEntry {
                id: doc_id.to_string(),
                file_name: file_name.to_string(),
                document_type: document_type.map(str::to_string),
                phase: None,
                updated_at: now(),
            },
        );
        Ok(())
    }

    async fn update_phase(&self, doc_id: &str, phase: Phase) -> Result<bool> {
        let mut inner = self.write()?;
        let Some(entry) = inner.entries.get_mut(doc_id) else {
            return Ok(false);
        };
        entry.phase = Some(phase);
        entry.updated_at = now();
        inner
            .history
            .entry(doc_id.to_string())
            .or_default()
            .push(phase);
        Ok(true)
    }

    async fn get_phase(&self, doc_id: &str) -> Result<Option<Phase>> {
        Ok(self.read()?.entries.get(doc_id).and_then(|e| e.phase))
    }

    async fn load_all(&self) -> Result<Vec<PhaseEntry>> {
        let inner = self.read()?;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_id_is_a_write_miss() {
        let tracker = InMemoryPhaseTracker::new();
        assert!(!tracker.update_phase("nope", Phase::Parsing).await.unwrap());
        assert!(tracker.history("nope").is_empty());
        assert!(tracker.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_records_each_write() {
        let tracker = InMemoryPhaseTracker::new();
        tracker.register("d1", "a.pdf", Some("Benefit")).await.unwrap();
        tracker.register("d1", "ignored.pdf", None).await.unwrap();
        for phase in [Phase::Parsing, Phase::Error, Phase::Completed] {
            assert!(tracker.update_phase("d1", phase).await.unwrap());
        }

        assert_eq!(
            tracker.history("d1"),
            vec![Phase::Parsing, Phase::Error, Phase::Completed]
        );
        assert_eq!(tracker.get_phase("d1").await.unwrap(), Some(Phase::Completed));
        let all = tracker.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].file_name, "a.pdf");
        assert_eq!(all[0].document_type.as_deref(), Some("Benefit"));
    }
}
