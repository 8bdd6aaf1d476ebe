//! Collaborator boundaries on either side of a document's text: the
//! [`Parser`] that produces it and the [`ExtractionBackend`] that turns it
//! into a structured record.

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::models::Document;
use crate::schema::Schema;

/// Converts raw file bytes into one or more text documents.
///
/// Parsing is synchronous and CPU bound; callers run it off the async
/// executor. Returned documents carry `file_name` metadata but no id.
pub trait Parser: Send + Sync {
    fn parse(&self, file_name: &str, bytes: &[u8]) -> Result<Vec<Document>>;
}

/// Text chunk sent to an extraction backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionChunk {
    pub text: String,
    pub metadata: Map<String, Value>,
}

#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Fill `schema` from `chunks` using the named agent.
    async fn extract(
        &self,
        agent: &str,
        chunks: &[ExtractionChunk],
        schema: &Schema,
    ) -> AnyResult<Value>;
}

/// Backend agent responsible for a document type.
pub fn agent_for_document_type(document_type: &str) -> &'static str {
    match document_type {
        "Insurance" => "insurance-parser",
        "Contract" => "contract-parser",
        "Invoice" => "invoice-parser",
        "Benefit" => "benefit-summary-parser",
        _ => "default-parser",
    }
}
