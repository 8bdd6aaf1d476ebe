//! Filesystem [`DocumentStore`].
//!
//! Layout under the storage root:
//!
//! ```text
//! originals/<doc_id>/<file name>   uploaded bytes (append-only)
//! documents/<doc_id>.json          {doc_id, hash, updated_at}
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use doc_intake_core::store::DocumentStore;

pub struct FsDocumentStore {
    root: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct DocumentRecord {
    doc_id: String,
    hash: String,
    updated_at: String,
}

/// Keep a path component to `[A-Za-z0-9._-]`, never `.` or `..`.
pub(crate) fn safe_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        _ => cleaned,
    }
}

impl FsDocumentStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn original_dir(&self, doc_id: &str) -> PathBuf {
        self.root.join("originals").join(safe_component(doc_id))
    }

    fn record_path(&self, doc_id: &str) -> PathBuf {
        self.root
            .join("documents")
            .join(format!("{}.json", safe_component(doc_id)))
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn store_original(&self, doc_id: &str, file_name: &str, bytes: &[u8]) -> Result<()> {
        let dir = self.original_dir(doc_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(safe_component(file_name));
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to store original: {}", path.display()))
    }

    async fn load_original(&self, doc_id: &str) -> Result<Option<(String, Vec<u8>)>> {
        let dir = self.original_dir(doc_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                let name = entry.file_name().to_string_lossy().into_owned();
                let bytes = tokio::fs::read(entry.path()).await?;
                return Ok(Some((name, bytes)));
            }
        }
        Ok(None)
    }

    async fn set_document_hash(&self, doc_id: &str, hash: &str) -> Result<()> {
        let path = self.record_path(doc_id);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let record = DocumentRecord {
            doc_id: doc_id.to_string(),
            hash: hash.to_string(),
            updated_at: chrono::Utc::now().to_rfc3339(),
        };
        tokio::fs::write(&path, serde_json::to_vec_pretty(&record)?).await?;
        Ok(())
    }

    async fn document_hash(&self, doc_id: &str) -> Result<Option<String>> {
        match tokio::fs::read(self.record_path(doc_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice::<DocumentRecord>(&bytes)?.hash)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, doc_id: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.record_path(doc_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_cannot_escape_the_root() {
        assert_eq!(safe_component("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(safe_component(".."), "_");
        assert_eq!(safe_component("policy 2024.pdf"), "policy_2024.pdf");
    }

    #[tokio::test]
    async fn originals_outlive_record_deletion() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FsDocumentStore::new(dir.path());

        assert_eq!(store.load_original("d1").await.unwrap(), None);
        store.store_original("d1", "policy.pdf", b"%PDF-1.4").await.unwrap();
        store.set_document_hash("d1", "h1").await.unwrap();
        assert_eq!(store.document_hash("d1").await.unwrap().as_deref(), Some("h1"));

        assert!(store.delete("d1").await.unwrap());
        assert!(!store.delete("d1").await.unwrap());
        assert_eq!(store.document_hash("d1").await.unwrap(), None);
        assert_eq!(
            store.load_original("d1").await.unwrap(),
            Some(("policy.pdf".to_string(), b"%PDF-1.4".to_vec()))
        );
    }
}
