//! Warehouse access.
//!
//! The loader talks to a [`Warehouse`]: something that runs one SQL
//! statement at a time and returns rows of optional strings.
//! [`SnowflakeWarehouse`] implements it over the Snowflake SQL API v2:
//!
//! - `POST /api/v2/statements` submits a statement with a bearer token
//! - a `200` response carries the first result partition
//! - a `202` response means the statement is still running; its handle is
//!   polled with `GET /api/v2/statements/<handle>` until it completes or
//!   the statement timeout elapses
//! - remaining partitions are fetched with `?partition=<n>`
//!
//! The token is read from `SNOWFLAKE_TOKEN` and sent with the
//! `X-Snowflake-Authorization-Token-Type` header from `warehouse.token_type`.

use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::WarehouseConfig;

/// Result rows; every cell is the warehouse's string rendering or NULL.
pub type Rows = Vec<Vec<Option<String>>>;

/// A SQL endpoint executing one statement at a time.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Run a statement and return its result rows.
    async fn query(&self, sql: &str) -> Result<Rows>;

    /// Run a statement for its side effect.
    async fn execute(&self, sql: &str) -> Result<()> {
        self.query(sql).await.map(|_| ())
    }
}

#[derive(Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    warehouse: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    statement_handle: Option<String>,
    #[serde(default)]
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Rows,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    partition_info: Vec<serde_json::Value>,
}

/// Snowflake reached through the SQL API.
pub struct SnowflakeWarehouse {
    client: reqwest::Client,
    base_url: String,
    token: String,
    token_type: String,
    warehouse: String,
    role: Option<String>,
    statement_timeout: Duration,
    poll_interval: Duration,
}

impl std::fmt::Debug for SnowflakeWarehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnowflakeWarehouse")
            .field("base_url", &self.base_url)
            .field("warehouse", &self.warehouse)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl SnowflakeWarehouse {
    /// Build a client from config, reading the token from `SNOWFLAKE_TOKEN`.
    pub fn from_config(config: &WarehouseConfig) -> Result<Self> {
        let token = std::env::var("SNOWFLAKE_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .context("SNOWFLAKE_TOKEN environment variable not set")?;
        Self::new(config, token)
    }

    pub fn new(config: &WarehouseConfig, token: String) -> Result<Self> {
        let base_url = match (&config.base_url, &config.account) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, Some(account)) if !account.is_empty() => {
                format!("https://{}.snowflakecomputing.com", account)
            }
            _ => bail!("warehouse.account is not set (config file or SNOWFLAKE_ACCOUNT)"),
        };

        let client = reqwest::Client::builder()
            .user_agent(format!("catalog-sync/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url,
            token,
            token_type: config.token_type.clone(),
            warehouse: config.warehouse.clone(),
            role: config.role.clone(),
            statement_timeout: Duration::from_secs(config.statement_timeout_secs),
            poll_interval: Duration::from_secs(1),
        })
    }

    /// Change how often a running statement is polled.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.bearer_auth(&self.token)
            .header("X-Snowflake-Authorization-Token-Type", &self.token_type)
            .header("Accept", "application/json")
    }

    async fn submit(&self, sql: &str) -> Result<(StatusCode, StatementResponse)> {
        let url = format!("{}/api/v2/statements", self.base_url);
        let body = StatementRequest {
            statement: sql,
            timeout: self.statement_timeout.as_secs(),
            warehouse: &self.warehouse,
            role: self.role.as_deref(),
        };
        let request_id = Uuid::new_v4().to_string();

        let resp = self
            .authorized(self.client.post(&url))
            .query(&[("requestId", request_id.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to submit statement to {}: {}", url, e))?;

        read_response(resp).await
    }

    async fn status(&self, handle: &str, partition: Option<usize>) -> Result<(StatusCode, StatementResponse)> {
        let url = format!("{}/api/v2/statements/{}", self.base_url, handle);
        let mut req = self.authorized(self.client.get(&url));
        if let Some(p) = partition {
            req = req.query(&[("partition", p.to_string())]);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| anyhow!("Failed to poll statement {}: {}", handle, e))?;

        read_response(resp).await
    }
}

async fn read_response(resp: reqwest::Response) -> Result<(StatusCode, StatementResponse)> {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    let parsed = if text.trim().is_empty() {
        StatementResponse::default()
    } else {
        match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => StatementResponse {
                message: Some(text.chars().take(500).collect()),
                ..StatementResponse::default()
            },
            Err(e) => return Err(anyhow!("Malformed SQL API response (HTTP {}): {}", status, e)),
        }
    };
    Ok((status, parsed))
}

fn statement_error(sql: &str, status: StatusCode, resp: &StatementResponse) -> anyhow::Error {
    anyhow!(
        "Statement failed (HTTP {}, code {}): {} [{}]",
        status,
        resp.code.as_deref().unwrap_or("-"),
        resp.message.as_deref().unwrap_or("no message"),
        preview(sql)
    )
}

fn preview(sql: &str) -> String {
    let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > 120 {
        format!("{}...", flat.chars().take(120).collect::<String>())
    } else {
        flat
    }
}

#[async_trait]
impl Warehouse for SnowflakeWarehouse {
    async fn query(&self, sql: &str) -> Result<Rows> {
        debug!(statement = %preview(sql), "Submitting statement");
        let (mut status, mut resp) = self.submit(sql).await?;

        let deadline = Instant::now() + self.statement_timeout + self.poll_interval;
        while status == StatusCode::ACCEPTED {
            let handle = resp
                .statement_handle
                .clone()
                .ok_or_else(|| anyhow!("Running statement has no handle [{}]", preview(sql)))?;
            if Instant::now() >= deadline {
                bail!(
                    "Statement {} still running after {}s [{}]",
                    handle,
                    self.statement_timeout.as_secs(),
                    preview(sql)
                );
            }
            debug!(handle = %handle, "Statement running, polling");
            tokio::time::sleep(self.poll_interval).await;
            (status, resp) = self.status(&handle, None).await?;
        }

        if status != StatusCode::OK {
            return Err(statement_error(sql, status, &resp));
        }

        let partitions = resp
            .result_set_meta_data
            .as_ref()
            .map(|m| m.partition_info.len())
            .unwrap_or(0);
        let mut rows = std::mem::take(&mut resp.data);

        if partitions > 1 {
            let handle = resp
                .statement_handle
                .clone()
                .ok_or_else(|| anyhow!("Partitioned result has no handle [{}]", preview(sql)))?;
            for partition in 1..partitions {
                let (status, part) = self.status(&handle, Some(partition)).await?;
                if status != StatusCode::OK {
                    return Err(statement_error(sql, status, &part));
                }
                rows.extend(part.data);
            }
        }

        debug!(rows = rows.len(), partitions, "Statement complete");
        Ok(rows)
    }
}
