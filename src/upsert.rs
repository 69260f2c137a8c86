//! Record → upsert-operation conversion and bulk submission.
//!
//! Every record is keyed by its string-coerced `code`. Records without a
//! usable code are logged and skipped; the rest become one bulk write
//! against the [`DocumentStore`]. The stored `code` is normalized to the
//! string key so later runs match the same document.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::models::{record_key, Record, UpsertOperation, UpsertReport, KEY_FIELD};
use crate::store::DocumentStore;

/// What happened to one batch of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub operations: usize,
    pub skipped: usize,
    pub report: UpsertReport,
}

/// Turn records into keyed operations, returning the skip count alongside.
pub fn build_operations(records: &[Record]) -> (Vec<UpsertOperation>, usize) {
    let mut ops = Vec::with_capacity(records.len());
    let mut skipped = 0;

    for record in records {
        let Some(key) = record_key(record) else {
            warn!(record = %serde_json::Value::Object(record.clone()), "Skipping product with no usable 'code'");
            skipped += 1;
            continue;
        };

        let mut document = record.clone();
        document.insert(KEY_FIELD.to_string(), Value::String(key.clone()));
        ops.push(UpsertOperation { key, document });
    }

    (ops, skipped)
}

/// Upsert a batch of records as one bulk write.
///
/// An empty batch, or one in which every record was skipped, never reaches
/// the store.
pub async fn upsert_records(store: &dyn DocumentStore, records: &[Record]) -> Result<UpsertOutcome> {
    if records.is_empty() {
        return Ok(UpsertOutcome::default());
    }

    let (ops, skipped) = build_operations(records);
    if ops.is_empty() {
        info!(skipped, "No valid products to upsert");
        return Ok(UpsertOutcome {
            operations: 0,
            skipped,
            report: UpsertReport::default(),
        });
    }

    let report = store
        .bulk_upsert(&ops)
        .await
        .with_context(|| format!("Bulk upsert of {} operation(s) failed", ops.len()))?;

    info!(
        matched = report.matched,
        modified = report.modified,
        upserted = report.upserted,
        "Upsert operation complete"
    );

    Ok(UpsertOutcome {
        operations: ops.len(),
        skipped,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryDocumentStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn records(v: Value) -> Vec<Record> {
        v.as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect()
    }

    /// Counts calls and refuses to write.
    struct RefusingStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DocumentStore for RefusingStore {
        async fn bulk_upsert(&self, _ops: &[UpsertOperation]) -> Result<UpsertReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("connection refused")
        }
        async fn get(&self, _key: &str) -> Result<Option<Record>> {
            Ok(None)
        }
        async fn all_documents(&self) -> Result<Vec<Record>> {
            Ok(vec![])
        }
        async fn count(&self) -> Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn test_record_without_code_is_skipped() {
        let batch = records(json!([
            {"code": "1", "name": "a"},
            {"name": "x"},
            {"code": 2, "name": "b"},
        ]));
        let (ops, skipped) = build_operations(&batch);
        assert_eq!(ops.len(), 2);
        assert_eq!(skipped, 1);
        assert_eq!(ops[0].key, "1");
        assert_eq!(ops[1].key, "2");
        // Numeric codes are stored as their string key
        assert_eq!(ops[1].document["code"], json!("2"));
    }

    #[tokio::test]
    async fn test_empty_batch_never_touches_store() {
        let store = RefusingStore {
            calls: AtomicUsize::new(0),
        };
        let outcome = upsert_records(&store, &[]).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::default());
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_invalid_never_touches_store() {
        let store = RefusingStore {
            calls: AtomicUsize::new(0),
        };
        let outcome = upsert_records(&store, &records(json!([{"name": "x"}, {"code": ""}])))
            .await
            .unwrap();
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.operations, 0);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_failure_fails_batch() {
        let store = RefusingStore {
            calls: AtomicUsize::new(0),
        };
        let err = upsert_records(&store, &records(json!([{"code": "1"}])))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("connection refused"));
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upsert_twice_is_idempotent() {
        let store = InMemoryDocumentStore::new();
        let batch = records(json!([
            {"code": "1", "name": "a"},
            {"code": "2", "name": "b"},
        ]));

        let first = upsert_records(&store, &batch).await.unwrap();
        assert_eq!(first.report.upserted, 2);

        let snapshot = store.all_documents().await.unwrap();
        let second = upsert_records(&store, &batch).await.unwrap();
        assert_eq!(second.report.upserted, 0);
        assert_eq!(second.report.matched, 2);
        assert_eq!(second.report.modified, 0);
        assert_eq!(store.all_documents().await.unwrap(), snapshot);
    }
}
