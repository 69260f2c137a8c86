//! Snapshot the document store to object storage.
//!
//! Produces one `openfoodfacts_export_<YYYYMMDD>_<HHMMSS>.json` artifact
//! holding every stored document as a JSON array, ordered by `code`. The
//! warehouse loader later picks the newest of these from the stage.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::artifact::artifact_name;
use crate::models::ExportReport;
use crate::object_store::{normalize_prefix, ObjectStore};
use crate::store::DocumentStore;

/// Write the current store content as a timestamped artifact under `prefix`.
///
/// `prefix` is normalized the same way the warehouse stage URL is, so
/// `"snapshots"` and `"snapshots/"` land in the same folder. An empty store
/// is exported as `[]`.
pub async fn export_snapshot(
    store: &dyn DocumentStore,
    objects: &dyn ObjectStore,
    prefix: &str,
    now: DateTime<Utc>,
) -> Result<ExportReport> {
    let documents = store
        .all_documents()
        .await
        .context("Failed to read documents for export")?;
    info!(documents = documents.len(), "Fetched documents for export");

    let body = serde_json::to_vec_pretty(&documents)?;
    let key = format!("{}{}", normalize_prefix(prefix), artifact_name(now));
    let bytes = body.len();

    objects
        .put_object(&key, body, "application/json")
        .await
        .with_context(|| format!("Failed to upload snapshot '{}'", key))?;

    info!(key = %key, documents = documents.len(), bytes, "Exported snapshot");
    Ok(ExportReport {
        key,
        documents: documents.len(),
        bytes,
    })
}

pub fn print_report(report: &ExportReport) {
    println!("export {}", report.key);
    println!("  documents: {}", report.documents);
    println!("  bytes: {}", report.bytes);
    println!("ok");
}
