//! In-memory [`DocumentStore`] implementation for testing and dry runs.
//!
//! Uses a `BTreeMap` keyed by `code` behind `std::sync::RwLock`, so reads
//! come back in key order like the SQLite backend.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{Record, UpsertOperation, UpsertReport};

use super::{merge_document, DocumentStore};

/// In-memory store for tests and dry runs.
pub struct InMemoryDocumentStore {
    docs: RwLock<BTreeMap<String, Record>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn bulk_upsert(&self, ops: &[UpsertOperation]) -> Result<UpsertReport> {
        let mut docs = self
            .docs
            .write()
            .map_err(|_| anyhow!("document store lock poisoned"))?;

        let mut report = UpsertReport::default();
        for op in ops {
            match docs.get_mut(&op.key) {
                Some(current) => {
                    report.matched += 1;
                    let merged = merge_document(current, &op.document);
                    if merged != *current {
                        *current = merged;
                        report.modified += 1;
                    }
                }
                None => {
                    docs.insert(op.key.clone(), op.document.clone());
                    report.upserted += 1;
                }
            }
        }
        Ok(report)
    }

    async fn get(&self, key: &str) -> Result<Option<Record>> {
        let docs = self
            .docs
            .read()
            .map_err(|_| anyhow!("document store lock poisoned"))?;
        Ok(docs.get(key).cloned())
    }

    async fn all_documents(&self) -> Result<Vec<Record>> {
        let docs = self
            .docs
            .read()
            .map_err(|_| anyhow!("document store lock poisoned"))?;
        Ok(docs.values().cloned().collect())
    }

    async fn count(&self) -> Result<u64> {
        let docs = self
            .docs
            .read()
            .map_err(|_| anyhow!("document store lock poisoned"))?;
        Ok(docs.len() as u64)
    }
}
