//! Data models that flow through the ingestion pipeline.
//!
//! A [`Document`] is the unit handed out to callers and passed between
//! stages. A [`Node`] is one embedded chunk of a document, the unit inserted
//! into the vector index. [`Phase`] is the externally visible lifecycle state,
//! and [`ExtractionResult`] is the persisted outcome of structured extraction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Metadata carried by every document and copied onto each of its nodes.
///
/// `extra` holds whatever the parser attached (page number, chunk type,
/// bounding box and so on) and is flattened into the same JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub file_name: String,
    pub doc_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(file_name: &str, text: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            text: text.into(),
            metadata: DocumentMetadata {
                file_name: file_name.to_string(),
                ..Default::default()
            },
        }
    }

    /// Placeholder handed back by asynchronous submission: fixed id, no text.
    pub fn stub(doc_id: &str, file_name: &str) -> Self {
        let mut doc = Self::new(file_name, "");
        doc.assign_id(doc_id);
        doc
    }

    /// Bind this document to a document id, in both `id` and metadata.
    pub fn assign_id(&mut self, doc_id: &str) {
        self.id = doc_id.to_string();
        self.metadata.doc_id = doc_id.to_string();
    }

    pub fn file_name(&self) -> &str {
        &self.metadata.file_name
    }

    /// Attach a structured extraction snapshot to this document.
    pub fn apply_extraction(&mut self, result: &ExtractionResult) {
        self.metadata.document_type = Some(result.document_type.clone());
        self.metadata.extraction_id = Some(result.extraction_id.clone());
        self.metadata.extraction = Some(result.result.clone());
    }

    /// SHA-256 over identity metadata and text, hex encoded.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.metadata.file_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.text.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Hash of every document parsed from one upload, in parse order. A
/// single document hashes the same as [`Document::hash`].
pub fn upload_hash<'a>(docs: impl IntoIterator<Item = &'a Document>) -> String {
    let hashes: Vec<String> = docs.into_iter().map(Document::hash).collect();
    if let [single] = hashes.as_slice() {
        return single.clone();
    }
    let mut hasher = Sha256::new();
    for hash in &hashes {
        hasher.update(hash.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// An embedded chunk of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub doc_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub hash: String,
    pub embedding: Vec<f32>,
    pub metadata: DocumentMetadata,
}

/// Lifecycle phase of a document's background processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Parsing,
    Extraction,
    Embedding,
    Rag,
    Completed,
    Error,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Parsing => "parsing",
            Phase::Extraction => "extraction",
            Phase::Embedding => "embedding",
            Phase::Rag => "rag",
            Phase::Completed => "completed",
            Phase::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Error)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parsing" => Ok(Phase::Parsing),
            "extraction" => Ok(Phase::Extraction),
            "embedding" => Ok(Phase::Embedding),
            "rag" => Ok(Phase::Rag),
            "completed" => Ok(Phase::Completed),
            "error" => Ok(Phase::Error),
            other => Err(format!("unknown phase '{}'", other)),
        }
    }
}

/// One row of the phase tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseEntry {
    pub id: String,
    pub file_name: String,
    pub document_type: Option<String>,
    pub phase: Option<Phase>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Completed,
    Error,
}

/// Outcome of one structured-extraction attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub extraction_id: String,
    pub doc_id: String,
    pub document_type: String,
    pub file_name: String,
    pub status: ExtractionStatus,
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

impl ExtractionResult {
    pub fn completed(doc_id: &str, document_type: &str, file_name: &str, result: Value) -> Self {
        Self {
            extraction_id: uuid::Uuid::new_v4().to_string(),
            doc_id: doc_id.to_string(),
            document_type: document_type.to_string(),
            file_name: file_name.to_string(),
            status: ExtractionStatus::Completed,
            result,
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn failed(doc_id: &str, document_type: &str, file_name: &str, error: impl ToString) -> Self {
        Self {
            status: ExtractionStatus::Error,
            result: Value::Object(Map::new()),
            error: Some(error.to_string()),
            ..Self::completed(doc_id, document_type, file_name, Value::Null)
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ExtractionStatus::Completed
    }

    /// True when `result` is a mapping with at least one key.
    pub fn has_content(&self) -> bool {
        self.result.as_object().is_some_and(|m| !m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stub_has_id_and_no_text() {
        let doc = Document::stub("abc", "policy.pdf");
        assert_eq!(doc.id, "abc");
        assert_eq!(doc.metadata.doc_id, "abc");
        assert_eq!(doc.file_name(), "policy.pdf");
        assert!(doc.text.is_empty());
    }

    #[test]
    fn metadata_flattens_parser_keys() {
        let mut doc = Document::new("a.pdf", "hello");
        doc.assign_id("d1");
        doc.metadata.extra.insert("page".into(), json!(3));
        let value = serde_json::to_value(&doc.metadata).unwrap();
        assert_eq!(value["page"], json!(3));
        assert_eq!(value["doc_id"], json!("d1"));
        assert!(value.get("extraction").is_none());
    }

    #[test]
    fn hash_tracks_text() {
        let a = Document::new("a.txt", "one");
        let b = Document::new("a.txt", "two");
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), a.clone().hash());
    }

    #[test]
    fn upload_hash_covers_every_page() {
        let mut first = Document::new("deck.pdf", "page one");
        let mut second = Document::new("deck.pdf", "page two");
        first.assign_id("d1");
        second.assign_id("d1");

        assert_eq!(upload_hash([&first]), first.hash());
        let both = upload_hash([&first, &second]);
        assert_ne!(both, second.hash());
        assert_ne!(both, upload_hash([&second, &first]));
    }

    #[test]
    fn phase_string_forms() {
        for phase in [
            Phase::Parsing,
            Phase::Extraction,
            Phase::Embedding,
            Phase::Rag,
            Phase::Completed,
            Phase::Error,
        ] {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
        assert!("submitted".parse::<Phase>().is_err());
    }

    #[test]
    fn failed_result_has_empty_mapping() {
        let r = ExtractionResult::failed("d1", "Benefit", "x.pdf", "backend down");
        assert!(!r.is_completed());
        assert!(!r.has_content());
        assert_eq!(r.error.as_deref(), Some("backend down"));
    }

    #[test]
    fn apply_extraction_snapshots_record() {
        let r = ExtractionResult::completed("d1", "Invoice", "x.pdf", json!({"total": 12}));
        let mut doc = Document::stub("d1", "x.pdf");
        doc.apply_extraction(&r);
        assert_eq!(doc.metadata.document_type.as_deref(), Some("Invoice"));
        assert_eq!(doc.metadata.extraction_id.as_deref(), Some(r.extraction_id.as_str()));
        assert_eq!(doc.metadata.extraction, Some(json!({"total": 12})));
    }
}
