//! Phase tracking: the SQLite-backed tracker, the bounded wait for a phase
//! entry to appear, and the never-failing reporter the background state
//! machine writes through.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use doc_intake_core::models::{Phase, PhaseEntry};
use doc_intake_core::phase::PhaseTracker;
use doc_intake_core::IngestError;

use crate::{db, migrate};

/// [`PhaseTracker`] persisted in SQLite, with an append-only history table.
pub struct SqlitePhaseTracker {
    pool: SqlitePool,
}

impl SqlitePhaseTracker {
    /// Open the database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path)
            .await
            .with_context(|| format!("Failed to open phase database: {}", path.display()))?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Every phase written for `doc_id`, oldest first.
    pub async fn history(&self, doc_id: &str) -> Result<Vec<Phase>> {
        let rows = sqlx::query("SELECT phase FROM phase_history WHERE doc_id = ? ORDER BY seq")
            .bind(doc_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let raw: String = row.get("phase");
                raw.parse::<Phase>().map_err(anyhow::Error::msg)
            })
            .collect()
    }
}

fn parse_phase(raw: Option<String>) -> Result<Option<Phase>> {
    raw.map(|s| s.parse::<Phase>().map_err(anyhow::Error::msg))
        .transpose()
}

#[async_trait]
impl PhaseTracker for SqlitePhaseTracker {
    async fn register(
        &self,
        doc_id: &str,
        file_name: &str,
        document_type: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO phases (id, file_name, document_type, phase, registered_at, updated_at)
            VALUES (?, ?, ?, NULL, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(doc_id)
        .bind(file_name)
        .bind(document_type)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_phase(&self, doc_id: &str, phase: Phase) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE phases SET phase = ?, updated_at = ? WHERE id = ?")
            .bind(phase.as_str())
            .bind(&now)
            .bind(doc_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("INSERT INTO phase_history (doc_id, phase, written_at) VALUES (?, ?, ?)")
            .bind(doc_id)
            .bind(phase.as_str())
            .bind(&now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn get_phase(&self, doc_id: &str) -> Result<Option<Phase>> {
        let raw: Option<Option<String>> =
            sqlx::query_scalar("SELECT phase FROM phases WHERE id = ?")
                .bind(doc_id)
                .fetch_optional(&self.pool)
                .await?;
        parse_phase(raw.flatten())
    }

    async fn load_all(&self) -> Result<Vec<PhaseEntry>> {
        let rows = sqlx::query(
            "SELECT id, file_name, document_type, phase, updated_at FROM phases ORDER BY registered_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<PhaseEntry> {
                Ok(PhaseEntry {
                    id: row.get("id"),
                    file_name: row.get("file_name"),
                    document_type: row.get("document_type"),
                    phase: parse_phase(row.get("phase"))?,
                    updated_at: row.get("updated_at"),
                })
            })
            .collect()
    }
}

/// Poll `load_all` until an entry for `doc_id` shows up.
///
/// Tracker faults during the wait are logged and polling continues.
pub async fn wait_for_entry(
    tracker: &dyn PhaseTracker,
    doc_id: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<(), IngestError> {
    let started = Instant::now();
    loop {
        match tracker.load_all().await {
            Ok(entries) if entries.iter().any(|e| e.id == doc_id) => return Ok(()),
            Ok(_) => {}
            Err(e) => warn!(doc_id, error = %e, "phase lookup failed while waiting for entry"),
        }

        let waited = started.elapsed();
        if waited >= timeout {
            return Err(IngestError::AdmissionTimeout {
                doc_id: doc_id.to_string(),
                waited_ms: waited.as_millis() as u64,
            });
        }
        tokio::time::sleep(interval.min(timeout - waited)).await;
    }
}

/// Best-effort phase writer. Write misses and tracker faults are logged,
/// never returned.
#[derive(Clone)]
pub struct PhaseReporter {
    tracker: Arc<dyn PhaseTracker>,
}

impl PhaseReporter {
    pub fn new(tracker: Arc<dyn PhaseTracker>) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &Arc<dyn PhaseTracker> {
        &self.tracker
    }

    pub async fn set(&self, doc_id: &str, phase: Phase) {
        match self.tracker.update_phase(doc_id, phase).await {
            Ok(true) => debug!(doc_id, %phase, "phase updated"),
            Ok(false) => warn!(doc_id, %phase, "phase write missed: no entry for document"),
            Err(e) => warn!(doc_id, %phase, error = %e, "phase update failed"),
        }
    }
}
