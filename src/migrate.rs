use anyhow::Result;
use sqlx::SqlitePool;

/// Create the phase tracking tables if they do not exist.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS phases (
            id TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            document_type TEXT,
            phase TEXT,
            registered_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only log of every phase write
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS phase_history (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            doc_id TEXT NOT NULL,
            phase TEXT NOT NULL,
            written_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_phase_history_doc ON phase_history(doc_id)")
        .execute(pool)
        .await?;

    Ok(())
}
