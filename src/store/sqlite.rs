//! SQLite-backed [`DocumentStore`] implementation.
//!
//! Documents live in a single `documents` table keyed by `code`, with the
//! full record stored as JSON text (see [`crate::migrate`]). Every call
//! opens its own connection and closes it before returning; a bulk upsert
//! runs inside one transaction, so a failed batch leaves nothing behind.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{Connection, Row};

use crate::config::StoreConfig;
use crate::db;
use crate::models::{Record, UpsertOperation, UpsertReport};

use super::{merge_document, DocumentStore};

/// SQLite implementation of the [`DocumentStore`] trait.
pub struct SqliteDocumentStore {
    options: SqliteConnectOptions,
}

impl SqliteDocumentStore {
    pub fn new(options: SqliteConnectOptions) -> Self {
        Self { options }
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        Ok(Self::new(db::connect_options(&config.path)?))
    }

    async fn connect(&self) -> Result<SqliteConnection> {
        SqliteConnection::connect_with(&self.options)
            .await
            .context("Failed to open document store")
    }
}

fn parse_body(code: &str, body: &str) -> Result<Record> {
    serde_json::from_str(body)
        .with_context(|| format!("Stored document '{}' is not a JSON object", code))
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn bulk_upsert(&self, ops: &[UpsertOperation]) -> Result<UpsertReport> {
        let mut conn = self.connect().await?;
        let now = chrono::Utc::now().timestamp();
        let mut report = UpsertReport::default();

        let mut tx = conn.begin().await?;

        for op in ops {
            let existing: Option<String> =
                sqlx::query_scalar("SELECT body FROM documents WHERE code = ?")
                    .bind(&op.key)
                    .fetch_optional(&mut *tx)
                    .await?;

            match existing {
                Some(body) => {
                    report.matched += 1;
                    let current = parse_body(&op.key, &body)?;
                    let merged = merge_document(&current, &op.document);
                    if merged != current {
                        sqlx::query("UPDATE documents SET body = ?, updated_at = ? WHERE code = ?")
                            .bind(serde_json::to_string(&merged)?)
                            .bind(now)
                            .bind(&op.key)
                            .execute(&mut *tx)
                            .await?;
                        report.modified += 1;
                    }
                }
                None => {
                    sqlx::query(
                        "INSERT INTO documents (code, body, created_at, updated_at) VALUES (?, ?, ?, ?)",
                    )
                    .bind(&op.key)
                    .bind(serde_json::to_string(&op.document)?)
                    .bind(now)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                    report.upserted += 1;
                }
            }
        }

        tx.commit().await.context("Bulk upsert commit failed")?;
        conn.close().await?;
        Ok(report)
    }

    async fn get(&self, key: &str) -> Result<Option<Record>> {
        let mut conn = self.connect().await?;
        let body: Option<String> = sqlx::query_scalar("SELECT body FROM documents WHERE code = ?")
            .bind(key)
            .fetch_optional(&mut conn)
            .await?;
        conn.close().await?;

        body.map(|b| parse_body(key, &b)).transpose()
    }

    async fn all_documents(&self) -> Result<Vec<Record>> {
        let mut conn = self.connect().await?;
        let rows = sqlx::query("SELECT code, body FROM documents ORDER BY code")
            .fetch_all(&mut conn)
            .await?;
        conn.close().await?;

        rows.iter()
            .map(|row| {
                let code: String = row.get("code");
                let body: String = row.get("body");
                parse_body(&code, &body)
            })
            .collect()
    }

    async fn count(&self) -> Result<u64> {
        let mut conn = self.connect().await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&mut conn)
            .await?;
        conn.close().await?;
        Ok(count as u64)
    }
}
