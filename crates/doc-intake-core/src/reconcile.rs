//! Retrieval-augmented gap filling for extraction records.
//!
//! The [`Reconciler`] asks a [`RagQueryService`] for the fields extraction
//! left empty, a bounded batch at a time, and folds every answer into one
//! record with [`deep_merge`]. Only requested paths with non-empty answers
//! survive, so a service that echoes extra keys or blanks cannot clobber
//! data on write-back.

use std::sync::Arc;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::merge::deep_merge;
use crate::schema::{detect_missing, is_empty_value, FieldPath, Schema};

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileConfig {
    /// Maximum number of fields per query.
    pub batch_size: usize,
    /// Retrieval profile name forwarded to the query service.
    pub profile: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            profile: "general".to_string(),
        }
    }
}

/// Answers targeted questions about one document from its indexed chunks.
///
/// The returned value is a nested mapping shaped like the record. Fields the
/// service cannot answer may be omitted.
#[async_trait]
pub trait RagQueryService: Send + Sync {
    async fn query_fields(
        &self,
        doc_id: &str,
        fields: &[FieldPath],
        config: &ReconcileConfig,
    ) -> AnyResult<Value>;
}

pub struct Reconciler {
    service: Arc<dyn RagQueryService>,
}

impl Reconciler {
    pub fn new(service: Arc<dyn RagQueryService>) -> Self {
        Self { service }
    }

    /// Query `missing` in batches and return the merged answers.
    pub async fn reconcile(
        &self,
        doc_id: &str,
        missing: &[FieldPath],
        config: &ReconcileConfig,
    ) -> Result<Value> {
        let mut filled = Value::Object(Map::new());
        for (i, batch) in missing.chunks(config.batch_size.max(1)).enumerate() {
            let answer = self
                .service
                .query_fields(doc_id, batch, config)
                .await
                .map_err(|e| IngestError::reconciliation(doc_id, format!("batch {}: {:#}", i, e)))?;
            let kept = select_answered(&answer, batch);
            debug!(doc_id, batch = i, asked = batch.len(), answered = kept.len(), "reconcile batch");
            filled = deep_merge(filled, &Value::Object(kept));
        }
        Ok(filled)
    }

    /// Detect gaps in `record`, fill what the service can, and return the
    /// merged record. Returns the record unchanged when nothing is missing.
    pub async fn fill_gaps(
        &self,
        doc_id: &str,
        record: Value,
        schema: &Schema,
        config: &ReconcileConfig,
    ) -> Result<Value> {
        let missing = detect_missing(&record, schema);
        if missing.is_empty() {
            return Ok(record);
        }
        let filled = self.reconcile(doc_id, &missing, config).await?;
        Ok(deep_merge(record, &filled))
    }
}

/// Nested mapping holding only the requested, non-empty answers.
fn select_answered(answer: &Value, requested: &[FieldPath]) -> Map<String, Value> {
    let mut out = Value::Object(Map::new());
    for path in requested {
        let found = path.lookup(answer);
        if is_empty_value(found) {
            continue;
        }
        if let Some(v) = found {
            insert_at(&mut out, path.segments(), v.clone());
        }
    }
    match out {
        Value::Object(m) => m,
        _ => Map::new(),
    }
}

fn insert_at(node: &mut Value, segments: &[String], leaf: Value) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        if rest.is_empty() {
            map.insert(head.clone(), leaf);
        } else {
            let child = map
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            insert_at(child, rest, leaf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Answers every requested field with `"<path>-value"` and records calls.
    #[derive(Default)]
    struct EchoService {
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl RagQueryService for EchoService {
        async fn query_fields(
            &self,
            _doc_id: &str,
            fields: &[FieldPath],
            _config: &ReconcileConfig,
        ) -> AnyResult<Value> {
            self.calls
                .lock()
                .unwrap()
                .push(fields.iter().map(|f| f.to_string()).collect());
            let mut out = Value::Object(Map::new());
            for f in fields {
                insert_at(&mut out, f.segments(), json!(format!("{}-value", f)));
            }
            Ok(out)
        }
    }

    fn paths(n: usize) -> Vec<FieldPath> {
        (0..n)
            .map(|i| FieldPath::from(format!("section{}.field{}", i % 3, i).as_str()))
            .collect()
    }

    #[tokio::test]
    async fn twenty_five_fields_take_three_batches() {
        let service = Arc::new(EchoService::default());
        let reconciler = Reconciler::new(service.clone());
        let missing = paths(25);

        let filled = reconciler
            .reconcile("doc", &missing, &ReconcileConfig::default())
            .await
            .unwrap();

        let calls = service.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![10, 10, 5]
        );
        for path in &missing {
            assert_eq!(
                path.lookup(&filled),
                Some(&json!(format!("{}-value", path))),
                "missing {}",
                path
            );
        }
    }

    struct PartialService;

    #[async_trait]
    impl RagQueryService for PartialService {
        async fn query_fields(
            &self,
            _doc_id: &str,
            _fields: &[FieldPath],
            _config: &ReconcileConfig,
        ) -> AnyResult<Value> {
            Ok(json!({"plan_name": "Gold", "copay": "", "unrequested": 1}))
        }
    }

    #[tokio::test]
    async fn only_requested_non_empty_answers_are_kept() {
        let reconciler = Reconciler::new(Arc::new(PartialService));
        let missing = vec![FieldPath::from("plan_name"), FieldPath::from("copay")];
        let filled = reconciler
            .reconcile("doc", &missing, &ReconcileConfig::default())
            .await
            .unwrap();
        assert_eq!(filled, json!({"plan_name": "Gold"}));
    }

    #[tokio::test]
    async fn fill_gaps_merges_into_record() {
        let reconciler = Reconciler::new(Arc::new(PartialService));
        let schema = Schema::new().field("plan_name").field("copay").field("network");
        let record = json!({"plan_name": null, "copay": "", "network": "PPO"});
        let out = reconciler
            .fill_gaps("doc", record, &schema, &ReconcileConfig::default())
            .await
            .unwrap();
        assert_eq!(out, json!({"plan_name": "Gold", "copay": "", "network": "PPO"}));
    }

    struct FailingService;

    #[async_trait]
    impl RagQueryService for FailingService {
        async fn query_fields(
            &self,
            _doc_id: &str,
            _fields: &[FieldPath],
            _config: &ReconcileConfig,
        ) -> AnyResult<Value> {
            anyhow::bail!("index unavailable")
        }
    }

    #[tokio::test]
    async fn service_failure_maps_to_reconciliation_error() {
        let reconciler = Reconciler::new(Arc::new(FailingService));
        let err = reconciler
            .reconcile("doc-9", &[FieldPath::from("a")], &ReconcileConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Reconciliation { ref doc_id, .. } if doc_id == "doc-9"));
    }
}
