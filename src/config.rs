use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use doc_intake_core::reconcile::ReconcileConfig;

use crate::ingest::IngestMode;

/// Top-level configuration, read from a TOML file by [`load_config`].
///
/// Every section is optional; an empty file yields a working in-process
/// setup with the offline hash embedder.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub phase: PhaseConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct PhaseConfig {
    /// SQLite file for the phase tracker. In-memory tracking when unset.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Register the phase entry before `ingest` returns its handle.
    #[serde(default = "default_true")]
    pub register_on_submit: bool,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            wait_timeout_ms: default_wait_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            register_on_submit: true,
        }
    }
}

fn default_wait_timeout_ms() -> u64 {
    10_000
}
fn default_poll_interval_ms() -> u64 {
    200
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    #[serde(default)]
    pub mode: IngestMode,
    #[serde(default = "default_count_workers")]
    pub count_workers: usize,
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    #[serde(default = "default_doc_queue_capacity")]
    pub doc_queue_capacity: usize,
    #[serde(default = "default_node_queue_capacity")]
    pub node_queue_capacity: usize,
    #[serde(default = "default_node_flush_count")]
    pub node_flush_count: usize,
    /// Parallel mode only: run structured extraction in the background.
    #[serde(default = "default_true")]
    pub extraction: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            mode: IngestMode::default(),
            count_workers: default_count_workers(),
            embed_batch_size: default_embed_batch_size(),
            doc_queue_capacity: default_doc_queue_capacity(),
            node_queue_capacity: default_node_queue_capacity(),
            node_flush_count: default_node_flush_count(),
            extraction: true,
        }
    }
}

fn default_count_workers() -> usize {
    2
}
fn default_embed_batch_size() -> usize {
    32
}
fn default_doc_queue_capacity() -> usize {
    20
}
fn default_node_queue_capacity() -> usize {
    40
}
fn default_node_flush_count() -> usize {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_document_type")]
    pub document_type: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            document_type: default_document_type(),
        }
    }
}

fn default_document_type() -> String {
    "Benefit".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReconciliationConfig {
    #[serde(default = "default_reconcile_batch")]
    pub batch_size: usize,
    #[serde(default = "default_profile")]
    pub profile: String,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_reconcile_batch(),
            profile: default_profile(),
        }
    }
}

impl ReconciliationConfig {
    pub fn to_reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            batch_size: self.batch_size,
            profile: self.profile.clone(),
        }
    }
}

fn default_reconcile_batch() -> usize {
    10
}
fn default_profile() -> String {
    "general".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    256
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let ingestion = &config.ingestion;
    if ingestion.count_workers == 0 {
        anyhow::bail!("ingestion.count_workers must be > 0");
    }
    if ingestion.embed_batch_size == 0 {
        anyhow::bail!("ingestion.embed_batch_size must be > 0");
    }
    if ingestion.node_flush_count == 0 {
        anyhow::bail!("ingestion.node_flush_count must be > 0");
    }
    if ingestion.doc_queue_capacity == 0 || ingestion.node_queue_capacity == 0 {
        anyhow::bail!("ingestion queue capacities must be > 0");
    }

    if config.reconciliation.batch_size == 0 {
        anyhow::bail!("reconciliation.batch_size must be > 0");
    }
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.phase.poll_interval_ms == 0 {
        anyhow::bail!("phase.poll_interval_ms must be > 0");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    match config.embedding.provider.as_str() {
        "hash" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.ingestion.mode, IngestMode::Simple);
        assert_eq!(config.ingestion.count_workers, 2);
        assert_eq!(config.ingestion.embed_batch_size, 32);
        assert_eq!(config.ingestion.doc_queue_capacity, 20);
        assert_eq!(config.ingestion.node_queue_capacity, 40);
        assert_eq!(config.ingestion.node_flush_count, 5000);
        assert!(config.ingestion.extraction);
        assert_eq!(config.phase.wait_timeout_ms, 10_000);
        assert_eq!(config.phase.poll_interval_ms, 200);
        assert!(config.phase.register_on_submit);
        assert!(config.phase.db_path.is_none());
        assert_eq!(config.extraction.document_type, "Benefit");
        assert_eq!(config.reconciliation.batch_size, 10);
        assert_eq!(config.reconciliation.profile, "general");
        assert_eq!(config.chunking.max_tokens, 700);
        assert_eq!(config.embedding.provider, "hash");
    }

    #[test]
    fn pipeline_mode_parses() {
        let config = parse_config(
            r#"
            [ingestion]
            mode = "pipeline"
            count_workers = 4
            node_flush_count = 100
            "#,
        )
        .unwrap();
        assert_eq!(config.ingestion.mode, IngestMode::Staged);
        assert_eq!(config.ingestion.count_workers, 4);
        assert_eq!(config.ingestion.node_flush_count, 100);
    }

    #[test]
    fn rejects_zero_values() {
        for (toml, needle) in [
            ("[ingestion]\ncount_workers = 0", "count_workers"),
            ("[ingestion]\nnode_flush_count = 0", "node_flush_count"),
            ("[ingestion]\nembed_batch_size = 0", "embed_batch_size"),
            ("[reconciliation]\nbatch_size = 0", "reconciliation.batch_size"),
        ] {
            let err = parse_config(toml).unwrap_err();
            assert!(err.to_string().contains(needle), "{}: {}", toml, err);
        }
    }

    #[test]
    fn rejects_unknown_provider_and_mode() {
        assert!(parse_config("[embedding]\nprovider = \"local\"").is_err());
        assert!(parse_config("[ingestion]\nmode = \"turbo\"").is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("intake.toml");
        std::fs::write(&path, "[storage]\nroot = \"/tmp/intake\"\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.storage.root, PathBuf::from("/tmp/intake"));
        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }
}
