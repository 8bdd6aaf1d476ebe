//! # doc-intake core
//!
//! Runtime-agnostic building blocks for the doc-intake ingestion pipeline:
//! data models, paragraph chunking, the collaborator traits the
//! orchestrators are wired against, and the reconciliation logic that fills
//! gaps in structured extraction output.
//!
//! This crate has no tokio, sqlx, or filesystem dependencies. The in-memory
//! collaborator implementations ([`index::memory`], [`store::memory`],
//! [`phase::memory`]) exist for tests and embedding applications that keep
//! everything in process.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | `Document`, `Node`, `Phase`, `ExtractionResult` |
//! | [`error`] | `IngestError` taxonomy |
//! | [`chunk`] | Paragraph-boundary chunker |
//! | [`embedding`] | `Embedder` and `NodeTransformer` traits |
//! | [`gateway`] | `Parser` and `ExtractionBackend` traits |
//! | [`schema`] | Extraction schema and missing-field detection |
//! | [`merge`] | Asymmetric deep merge of JSON records |
//! | [`reconcile`] | Batched retrieval-augmented gap filling |
//! | [`index`] | `EmbeddingIndex` trait |
//! | [`store`] | `DocumentStore` trait |
//! | [`phase`] | `PhaseTracker` trait |

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod gateway;
pub mod index;
pub mod merge;
pub mod models;
pub mod phase;
pub mod reconcile;
pub mod schema;
pub mod store;

pub use error::{IngestError, Result};
