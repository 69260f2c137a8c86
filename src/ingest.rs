//! Ingestion orchestration.
//!
//! Drives the fetch → upsert loop: for every search term, pages are fetched
//! from 1 upward and each non-empty page is upserted immediately. A term is
//! finished at the first empty page (or at `max_pages_per_term` when set).
//! A randomized pacing delay follows every non-empty page.
//!
//! A fetch that exhausts its retries, or a failed bulk write, aborts the
//! whole run. Terms processed before the failure stay committed in the
//! store; the error names them so the operator knows what already landed.

use anyhow::{anyhow, Result};
use rand::Rng;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::CatalogConfig;
use crate::fetch::CatalogSource;
use crate::models::{IngestReport, TermReport};
use crate::store::DocumentStore;
use crate::upsert::upsert_records;

/// Politeness delay between page fetches, uniform in `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub min: Duration,
    pub max: Duration,
}

impl Pacing {
    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn next_delay(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let ms = rand::thread_rng().gen_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(ms as u64)
    }
}

/// Loop settings for one ingestion run.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOptions {
    pub terms: Vec<String>,
    pub page_size: u32,
    pub max_pages_per_term: Option<u32>,
    pub pacing: Pacing,
}

impl IngestOptions {
    pub fn from_config(config: &CatalogConfig) -> Self {
        Self {
            terms: config.search_terms.clone(),
            page_size: config.page_size,
            max_pages_per_term: config.max_pages_per_term,
            pacing: Pacing {
                min: Duration::from_millis(config.pacing_min_ms),
                max: Duration::from_millis(config.pacing_max_ms),
            },
        }
    }
}

/// Run the fetch/upsert loop over every configured term.
pub async fn run_ingest(
    options: &IngestOptions,
    source: &dyn CatalogSource,
    store: &dyn DocumentStore,
) -> Result<IngestReport> {
    let run_id = Uuid::new_v4().to_string();
    info!(
        run_id = %run_id,
        terms = ?options.terms,
        page_size = options.page_size,
        max_pages_per_term = ?options.max_pages_per_term,
        "Starting ingestion"
    );

    let mut report = IngestReport {
        run_id,
        terms: Vec::with_capacity(options.terms.len()),
    };

    for term in &options.terms {
        let term_report = ingest_term(options, term, source, store)
            .await
            .map_err(|e| {
                let committed: Vec<&str> = report.terms.iter().map(|t| t.term.as_str()).collect();
                error!(
                    term = %term,
                    committed_terms = ?committed,
                    committed_records = report.total_records(),
                    error = %format!("{:#}", e),
                    "Ingestion aborted"
                );
                e.context(format!(
                    "ingestion aborted at term '{}'; {} earlier term(s) already committed: [{}]",
                    term,
                    committed.len(),
                    committed.join(", ")
                ))
            })?;

        report.terms.push(term_report);
    }

    info!(
        run_id = %report.run_id,
        total_records = report.total_records(),
        "All search terms processed"
    );
    Ok(report)
}

async fn ingest_term(
    options: &IngestOptions,
    term: &str,
    source: &dyn CatalogSource,
    store: &dyn DocumentStore,
) -> Result<TermReport> {
    info!(term, "Processing search term");
    let mut tr = TermReport {
        term: term.to_string(),
        ..TermReport::default()
    };

    let mut page: u32 = 1;
    loop {
        if let Some(max) = options.max_pages_per_term {
            if page > max {
                info!(term, max_pages = max, "Page limit reached");
                break;
            }
        }

        info!(term, page, "Fetching page");
        let records = source
            .fetch_page(term, page, options.page_size)
            .await
            .map_err(|e| anyhow!(e).context(format!("fetch failed for '{}' page {}", term, page)))?;

        if records.is_empty() {
            info!(term, page, "No products returned, stopping early for this term");
            break;
        }

        let outcome = upsert_records(store, &records).await.map_err(|e| {
            e.context(format!("upsert failed for '{}' page {}", term, page))
        })?;

        tr.pages += 1;
        tr.records += records.len() as u64;
        tr.skipped += outcome.skipped as u64;
        tr.writes.absorb(&outcome.report);

        let nap = options.pacing.next_delay();
        info!(
            term,
            page,
            records = records.len(),
            sleep_secs = nap.as_secs_f64(),
            "Fetched page, pacing"
        );
        tokio::time::sleep(nap).await;

        page += 1;
    }

    info!(term, records = tr.records, pages = tr.pages, "Done with term");
    Ok(tr)
}

/// Print a run summary in the CLI's plain-text format.
pub fn print_report(report: &IngestReport) {
    println!("ingest {}", report.run_id);
    for t in &report.terms {
        println!(
            "  {}: pages={} records={} skipped={} upserted={} matched={} modified={}",
            t.term,
            t.pages,
            t.records,
            t.skipped,
            t.writes.upserted,
            t.writes.matched,
            t.writes.modified
        );
    }
    let totals = report.total_writes();
    println!("  total records: {}", report.total_records());
    println!("  total upserted: {}", totals.upserted);
    println!("  total matched: {}", totals.matched);
    println!("  total modified: {}", totals.modified);
    println!("ok");
}
