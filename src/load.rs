//! Warehouse load of the newest snapshot artifact.
//!
//! [`load_latest`] runs a fixed sequence of statements against a
//! [`Warehouse`]:
//!
//! 1. create the compute warehouse, database and schema if missing
//! 2. create the raw table (`RAW VARIANT`) if missing
//! 3. truncate it, so only the loaded artifact remains afterwards
//! 4. create the external stage over the snapshot bucket if missing
//! 5. list the stage and pick the newest artifact
//! 6. `COPY INTO` the table from that one file, aborting on any bad row
//! 7. count the rows now in the table
//!
//! Nothing is retried; the first failing statement ends the load. Object
//! names are interpolated into SQL, so they are validated at config time.

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::artifact::{select_latest, ARTIFACT_PATTERN};
use crate::config::{ObjectStoreConfig, WarehouseConfig};
use crate::models::LoadReport;
use crate::object_store::{normalize_prefix, AwsCredentials};
use crate::warehouse::Warehouse;

/// External location the stage points at.
#[derive(Debug, Clone)]
pub struct StageSource {
    pub url: String,
    pub credentials: AwsCredentials,
}

impl StageSource {
    pub fn from_config(config: &ObjectStoreConfig, credentials: AwsCredentials) -> Result<Self> {
        Ok(Self {
            url: stage_url(config.bucket()?, &config.prefix),
            credentials,
        })
    }
}

/// `s3://<bucket>/<prefix>` over the same folder the exporter writes to.
pub fn stage_url(bucket: &str, prefix: &str) -> String {
    format!("s3://{}/{}", bucket, normalize_prefix(prefix))
}

/// Escape a value for a single-quoted SQL literal.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn qualified(config: &WarehouseConfig, name: &str) -> String {
    format!("{}.{}.{}", config.database, config.schema, name)
}

pub fn create_warehouse_sql(config: &WarehouseConfig) -> String {
    format!(
        "CREATE WAREHOUSE IF NOT EXISTS {} \
         WAREHOUSE_SIZE = 'XSMALL' AUTO_SUSPEND = 10 AUTO_RESUME = TRUE INITIALLY_SUSPENDED = TRUE",
        config.warehouse
    )
}

pub fn create_database_sql(config: &WarehouseConfig) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {}", config.database)
}

pub fn create_schema_sql(config: &WarehouseConfig) -> String {
    format!(
        "CREATE SCHEMA IF NOT EXISTS {}.{}",
        config.database, config.schema
    )
}

pub fn create_table_sql(config: &WarehouseConfig) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (RAW VARIANT)",
        qualified(config, &config.table)
    )
}

pub fn truncate_sql(config: &WarehouseConfig) -> String {
    format!("TRUNCATE TABLE {}", qualified(config, &config.table))
}

pub fn create_stage_sql(config: &WarehouseConfig, source: &StageSource) -> String {
    let creds = &source.credentials;
    let mut credentials = format!(
        "aws_key_id = {} aws_secret_key = {}",
        quote(&creds.access_key_id),
        quote(&creds.secret_access_key)
    );
    if let Some(token) = &creds.session_token {
        credentials.push_str(&format!(" aws_token = {}", quote(token)));
    }

    format!(
        "CREATE STAGE IF NOT EXISTS {} URL = {} CREDENTIALS = ({}) \
         FILE_FORMAT = (TYPE = JSON STRIP_OUTER_ARRAY = TRUE)",
        qualified(config, &config.stage),
        quote(&source.url),
        credentials
    )
}

pub fn list_stage_sql(config: &WarehouseConfig) -> String {
    format!("LIST @{}", qualified(config, &config.stage))
}

pub fn copy_sql(config: &WarehouseConfig, artifact: &str) -> String {
    format!(
        "COPY INTO {} FROM @{}/{} ON_ERROR = 'ABORT_STATEMENT'",
        qualified(config, &config.table),
        qualified(config, &config.stage),
        artifact
    )
}

pub fn count_sql(config: &WarehouseConfig) -> String {
    format!("SELECT COUNT(*) FROM {}", qualified(config, &config.table))
}

/// Replace the raw table's content with the newest artifact in the stage.
pub async fn load_latest(
    warehouse: &dyn Warehouse,
    config: &WarehouseConfig,
    source: &StageSource,
) -> Result<LoadReport> {
    let table = qualified(config, &config.table);
    let stage = qualified(config, &config.stage);

    warehouse
        .execute(&create_warehouse_sql(config))
        .await
        .with_context(|| format!("Failed to create warehouse {}", config.warehouse))?;
    warehouse
        .execute(&create_database_sql(config))
        .await
        .with_context(|| format!("Failed to create database {}", config.database))?;
    warehouse
        .execute(&create_schema_sql(config))
        .await
        .with_context(|| format!("Failed to create schema {}.{}", config.database, config.schema))?;
    info!(warehouse = %config.warehouse, database = %config.database, schema = %config.schema, "Warehouse objects ready");

    warehouse
        .execute(&create_table_sql(config))
        .await
        .with_context(|| format!("Failed to create table {}", table))?;
    warehouse
        .execute(&truncate_sql(config))
        .await
        .with_context(|| format!("Failed to truncate table {}", table))?;
    info!(table = %table, "Truncated old data, only the new artifact will remain");

    warehouse
        .execute(&create_stage_sql(config, source))
        .await
        .with_context(|| format!("Failed to create stage {}", stage))?;

    let listing = warehouse
        .query(&list_stage_sql(config))
        .await
        .with_context(|| format!("Failed to list stage {}", stage))?;
    let names: Vec<&str> = listing
        .iter()
        .filter_map(|row| row.first().and_then(|c| c.as_deref()))
        .collect();
    let artifact = select_latest(&names).with_context(|| {
        format!(
            "No files to copy from stage {} (pattern {})",
            stage, ARTIFACT_PATTERN
        )
    })?;
    info!(artifact = %artifact, stage = %stage, "Latest artifact determined");

    warehouse
        .execute(&copy_sql(config, &artifact))
        .await
        .with_context(|| format!("Failed to copy '{}' into {}", artifact, table))?;
    info!(artifact = %artifact, table = %table, "Copied artifact into table");

    let rows = warehouse
        .query(&count_sql(config))
        .await
        .with_context(|| format!("Failed to count rows in {}", table))?;
    let count = parse_count(&rows).with_context(|| format!("Unexpected row count result for {}", table))?;
    info!(table = %table, rows = count, "Load complete");

    Ok(LoadReport {
        artifact,
        table,
        rows: count,
    })
}

fn parse_count(rows: &[Vec<Option<String>>]) -> Result<u64> {
    match rows.first().and_then(|r| r.first()) {
        Some(Some(v)) => v
            .trim()
            .parse()
            .with_context(|| format!("count is not an integer: '{}'", v)),
        _ => bail!("count query returned no value"),
    }
}

pub fn print_report(report: &LoadReport) {
    println!("load {}", report.artifact);
    println!("  table: {}", report.table);
    println!("  rows: {}", report.rows);
    println!("ok");
}
