//! # doc-intake
//!
//! Concurrent document ingestion: uploads are parsed, run through
//! structured extraction and embedding in parallel, and the extracted
//! records are completed by a gap-filling reconciliation pass.
//!
//! ## Architecture
//!
//! ```text
//!               ┌──────────────┐
//!  upload ────▶ │  Ingestor    │── phases ──▶ SQLite (phases, phase_history)
//!               │ simple/batch │
//!               │ parallel/    │──▶ extraction ──▶ extraction_results/<doc_id>/
//!               │ staged       │
//!               └──────┬───────┘──▶ embedding ──▶ index/nodes.json
//!                      │
//!                      ▼
//!               reconciliation (missing fields ──▶ RAG queries ──▶ deep merge)
//! ```
//!
//! Domain types, collaborator traits, schema gap detection and the merge
//! rules live in [`doc_intake_core`]; this crate supplies file-backed and
//! SQLite-backed implementations plus the orchestrators.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Phase table migrations |
//! | [`phase`] | SQLite phase tracker and admission wait |
//! | [`parse`] | Multi-format text extraction (PDF, DOCX, PPTX, XLSX, text) |
//! | [`embedding`] | Embedding providers |
//! | [`docstore`] | Original uploads and document records on disk |
//! | [`index`] | Persisted node index and the shared index lock |
//! | [`extraction`] | Extraction gateway and result archive |
//! | [`ingest`] | Ingestion orchestrators and the staged pipeline |

pub mod config;
pub mod db;
pub mod docstore;
pub mod embedding;
pub mod extraction;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod parse;
pub mod phase;

pub use doc_intake_core::IngestError;
