//! Catalog API client with bounded retry.
//!
//! [`CatalogClient::fetch`] retrieves one page of search results from the
//! Open Food Facts `cgi/search.pl` endpoint. Every failure of an attempt is
//! treated as transient and retried:
//!
//! - network errors and timeouts
//! - non-2xx HTTP statuses
//! - bodies that are not valid JSON
//!
//! Attempt `n` (counting retries from 1) is preceded by a sleep of
//! `(2^n + U[0,1)) × backoff_unit`, so with the default one-second unit the
//! waits are roughly 2s, 4s, 8s, … with up to one extra second of jitter.
//!
//! An empty page is a normal result (the term is exhausted). Running out of
//! retries is a [`FetchError::RetriesExhausted`] carrying the last
//! underlying error; the two are never conflated.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::CatalogConfig;
use crate::models::{Page, Record};

/// Why a single attempt failed.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("response body is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Outcome of a fetch that did not produce a page.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request was rejected before touching the network.
    #[error("invalid fetch request: {0}")]
    InvalidRequest(String),
    /// Every attempt failed; `source` is the last failure.
    #[error("giving up on '{term}' page {page} after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        term: String,
        page: u32,
        attempts: u32,
        #[source]
        source: AttemptError,
    },
}

/// A source of catalog pages.
///
/// The ingestion loop only depends on this trait, so it can be driven by
/// the HTTP client or by any scripted page sequence.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_page(&self, term: &str, page: u32, page_size: u32) -> Result<Page, FetchError>;
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    products: Vec<serde_json::Value>,
}

/// HTTP client for the catalog search endpoint.
pub struct CatalogClient {
    client: reqwest::Client,
    search_url: String,
    max_retries: u32,
    backoff_unit: Duration,
}

impl CatalogClient {
    pub fn new(config: &CatalogConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            search_url: format!("{}/cgi/search.pl", config.base_url.trim_end_matches('/')),
            max_retries: config.max_retries,
            backoff_unit: config.backoff_unit(),
        })
    }

    /// Fetch one page, retrying up to `max_retries` additional times.
    pub async fn fetch(
        &self,
        term: &str,
        page: u32,
        page_size: u32,
        max_retries: u32,
    ) -> Result<Page, FetchError> {
        if term.trim().is_empty() {
            return Err(FetchError::InvalidRequest(
                "search term must not be empty".to_string(),
            ));
        }
        if page == 0 {
            return Err(FetchError::InvalidRequest("page numbers start at 1".to_string()));
        }
        if page_size == 0 {
            return Err(FetchError::InvalidRequest("page size must be > 0".to_string()));
        }

        let mut attempt: u32 = 0;
        loop {
            match self.attempt(term, page, page_size).await {
                Ok(records) => {
                    debug!(term, page, attempt, records = records.len(), "Fetched page");
                    return Ok(records);
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > max_retries {
                        error!(
                            term,
                            page,
                            attempts = attempt,
                            error = %e,
                            "Max retries exceeded"
                        );
                        return Err(FetchError::RetriesExhausted {
                            term: term.to_string(),
                            page,
                            attempts: attempt,
                            source: e,
                        });
                    }

                    let delay = backoff_delay(attempt, self.backoff_unit, rand::random::<f64>());
                    warn!(
                        term,
                        page,
                        attempt,
                        max_retries,
                        error = %e,
                        delay_secs = delay.as_secs_f64(),
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(&self, term: &str, page: u32, page_size: u32) -> Result<Page, AttemptError> {
        let resp = self
            .client
            .get(&self.search_url)
            .query(&[
                ("search_terms", term.to_string()),
                ("page", page.to_string()),
                ("page_size", page_size.to_string()),
                ("json", "1".to_string()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AttemptError::Status {
                status,
                body: body.chars().take(500).collect(),
            });
        }

        let bytes = resp.bytes().await?;
        let parsed: SearchResponse = serde_json::from_slice(&bytes)?;
        Ok(into_records(parsed.products))
    }
}

#[async_trait]
impl CatalogSource for CatalogClient {
    async fn fetch_page(&self, term: &str, page: u32, page_size: u32) -> Result<Page, FetchError> {
        self.fetch(term, page, page_size, self.max_retries).await
    }
}

/// Keep the object entries of a `products` array.
fn into_records(products: Vec<serde_json::Value>) -> Vec<Record> {
    products
        .into_iter()
        .filter_map(|p| match p {
            serde_json::Value::Object(map) => Some(map),
            other => {
                warn!(entry = %other, "Ignoring non-object product entry");
                None
            }
        })
        .collect()
}

/// Delay before retry `attempt` (1-based): `(2^attempt + jitter) × unit`.
///
/// `jitter` is expected in `[0, 1)`.
pub fn backoff_delay(attempt: u32, unit: Duration, jitter: f64) -> Duration {
    let exp = 2f64.powi(attempt.min(30) as i32);
    unit.mul_f64(exp + jitter.clamp(0.0, 1.0))
}
