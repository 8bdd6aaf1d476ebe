//! Error taxonomy for the ingestion pipeline.
//!
//! Every variant maps to a failure domain with its own propagation policy:
//! parse failures skip a file, extraction failures are captured into an
//! error result, reconciliation failures are logged, flush failures drop
//! the batch, and admission timeouts degrade to best-effort phase updates.
//! None of them abort another document's processing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Unreadable or corrupt input file.
    #[error("failed to parse '{file_name}': {reason}")]
    Parse { file_name: String, reason: String },

    /// Structured-extraction backend fault.
    #[error("extraction failed for document {doc_id}: {reason}")]
    Extraction { doc_id: String, reason: String },

    /// Fault while detecting or filling missing fields.
    #[error("reconciliation failed for document {doc_id}: {reason}")]
    Reconciliation { doc_id: String, reason: String },

    /// Index write fault. The batch is discarded.
    #[error("flush of {} file(s) failed ({files:?}): {reason}", files.len())]
    Flush { files: Vec<String>, reason: String },

    /// The phase entry for a document never appeared.
    #[error("phase entry for document {doc_id} did not appear within {waited_ms} ms")]
    AdmissionTimeout { doc_id: String, waited_ms: u64 },
}

impl IngestError {
    pub fn parse(file_name: &str, reason: impl ToString) -> Self {
        IngestError::Parse {
            file_name: file_name.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn reconciliation(doc_id: &str, reason: impl ToString) -> Self {
        IngestError::Reconciliation {
            doc_id: doc_id.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_error_lists_files() {
        let err = IngestError::Flush {
            files: vec!["a.pdf".into(), "b.pdf".into()],
            reason: "disk full".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("2 file(s)"));
        assert!(msg.contains("a.pdf"));
        assert!(msg.contains("disk full"));
    }
}
