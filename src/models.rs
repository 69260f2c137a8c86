//! Core data models used throughout catalog-sync.
//!
//! These types represent the records, write operations, and run reports that
//! flow through the ingestion and load pipeline.

use serde::Serialize;
use serde_json::{Map, Value};

/// One catalog item as returned by the API.
///
/// Field order is preserved as received so exported snapshots keep the
/// upstream layout.
pub type Record = Map<String, Value>;

/// Records returned by a single fetch. Empty means the term is exhausted.
pub type Page = Vec<Record>;

/// Field holding the natural key of every record.
pub const KEY_FIELD: &str = "code";

/// Derive the natural key of a record.
///
/// Strings are used as-is, numbers by their decimal rendering and booleans
/// as `true`/`false`. Missing, null, empty, array and object values are not
/// usable keys.
pub fn record_key(record: &Record) -> Option<String> {
    let key = match record.get(KEY_FIELD)? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

/// A keyed replace-or-insert write.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOperation {
    pub key: String,
    pub document: Record,
}

/// Outcome of one bulk upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    /// Operations whose key already existed.
    pub matched: u64,
    /// Matched documents whose stored content changed.
    pub modified: u64,
    /// Operations that inserted a new document.
    pub upserted: u64,
}

impl UpsertReport {
    pub fn absorb(&mut self, other: &UpsertReport) {
        self.matched += other.matched;
        self.modified += other.modified;
        self.upserted += other.upserted;
    }
}

/// Per-term totals for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TermReport {
    pub term: String,
    /// Non-empty pages fetched.
    pub pages: u32,
    /// Records received from the API.
    pub records: u64,
    /// Records dropped for lacking a usable key.
    pub skipped: u64,
    pub writes: UpsertReport,
}

/// Totals for a whole ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub run_id: String,
    pub terms: Vec<TermReport>,
}

impl IngestReport {
    pub fn total_records(&self) -> u64 {
        self.terms.iter().map(|t| t.records).sum()
    }

    pub fn total_writes(&self) -> UpsertReport {
        let mut total = UpsertReport::default();
        for term in &self.terms {
            total.absorb(&term.writes);
        }
        total
    }
}

/// Result of writing a snapshot artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportReport {
    pub key: String,
    pub documents: usize,
    pub bytes: usize,
}

/// Result of a warehouse load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub artifact: String,
    pub table: String,
    pub rows: u64,
}
