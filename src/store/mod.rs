//! Document store abstraction.
//!
//! The [`DocumentStore`] trait is the only view the pipeline has of the
//! store: keyed bulk upsert on `code`, plus the reads needed by the snapshot
//! exporter. Two backends ship with the crate:
//!
//! - [`sqlite::SqliteDocumentStore`]: SQLite through sqlx, one connection
//!   and one transaction per bulk write.
//! - [`memory::InMemoryDocumentStore`]: `BTreeMap` behind a `RwLock`, for
//!   tests and dry runs.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Record, UpsertOperation, UpsertReport};

/// Abstract keyed document storage.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`bulk_upsert`](DocumentStore::bulk_upsert) | Apply a batch of keyed upserts |
/// | [`get`](DocumentStore::get) | Fetch one document by key |
/// | [`all_documents`](DocumentStore::all_documents) | Every document, ordered by key |
/// | [`count`](DocumentStore::count) | Number of stored documents |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Apply every operation in order as a single bulk write.
    ///
    /// Either the whole batch is applied or an error is returned; callers
    /// treat an error as "nothing applied" and may resubmit the batch.
    async fn bulk_upsert(&self, ops: &[UpsertOperation]) -> Result<UpsertReport>;

    async fn get(&self, key: &str) -> Result<Option<Record>>;

    async fn all_documents(&self) -> Result<Vec<Record>>;

    async fn count(&self) -> Result<u64>;
}

/// Field-level replace: every top-level field of `replacement` overwrites
/// the stored value, fields it does not mention are kept.
pub fn merge_document(existing: &Record, replacement: &Record) -> Record {
    let mut merged = existing.clone();
    for (field, value) in replacement {
        merged.insert(field.clone(), value.clone());
    }
    merged
}
