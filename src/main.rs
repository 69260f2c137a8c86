//! # catalog-sync CLI (`csync`)
//!
//! The `csync` binary drives each stage of the pipeline on its own or all
//! of them in sequence.
//!
//! ## Usage
//!
//! ```bash
//! csync --config ./config/catalog-sync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `csync init` | Create the SQLite store and its schema |
//! | `csync ingest` | Fetch every search term and upsert the results |
//! | `csync export` | Write a timestamped snapshot of the store to S3 |
//! | `csync load` | Load the newest snapshot into the warehouse table |
//! | `csync select <names>...` | Show which artifact a load would pick |
//! | `csync transform` | Run `dbt run` then `dbt test` |
//! | `csync run` | ingest, export, load, transform |
//!
//! ## Examples
//!
//! ```bash
//! # One term, two pages, no config file
//! csync ingest --term tea --max-pages 2
//!
//! # Which artifact would be loaded?
//! csync select openfoodfacts_export_20240101_000000.json openfoodfacts_export_20240115_120000.json
//!
//! # Full pipeline with JSON logs
//! csync --log-format json run
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use catalog_sync::artifact::select_latest;
use catalog_sync::config::{self, Config};
use catalog_sync::export::{self, export_snapshot};
use catalog_sync::fetch::CatalogClient;
use catalog_sync::ingest::{self, run_ingest, IngestOptions};
use catalog_sync::load::{self, load_latest, StageSource};
use catalog_sync::logging::{init_logging, LogFormat, LogLevel};
use catalog_sync::migrate;
use catalog_sync::object_store::{AwsCredentials, S3ObjectStore};
use catalog_sync::store::sqlite::SqliteDocumentStore;
use catalog_sync::transform::{self, run_transform};
use catalog_sync::warehouse::SnowflakeWarehouse;

/// catalog-sync: ingest a product catalog, snapshot it, and load it into a
/// warehouse.
///
/// Settings come from a TOML file (`--config`) with environment overrides;
/// credentials come from the environment or a `.env` file.
#[derive(Parser)]
#[command(
    name = "csync",
    about = "Catalog ingestion, snapshot export, and warehouse load pipeline",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/catalog-sync.toml`; built-in defaults are used
    /// when that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level. Overrides `RUST_LOG`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the store schema.
    ///
    /// Creates the SQLite file and the `documents` table. Idempotent.
    Init,

    /// Fetch every search term page by page and upsert the results.
    Ingest {
        /// Search term to process instead of the configured list (repeatable).
        #[arg(long = "term")]
        terms: Vec<String>,

        /// Records per page.
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        page_size: Option<u32>,

        /// Stop each term after this many pages.
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        max_pages: Option<u32>,
    },

    /// Write a timestamped JSON snapshot of the store to object storage.
    Export,

    /// Load the newest snapshot artifact into the warehouse table.
    ///
    /// The table is truncated first, so afterwards it holds exactly the
    /// rows of the loaded artifact.
    Load,

    /// Print the artifact a load would pick from the given names.
    Select {
        /// Candidate names or stage paths.
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Run the dbt project (`dbt run`, then `dbt test`).
    Transform,

    /// Ingest, export, load, and transform in sequence.
    Run,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_level, cli.log_format) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Commands that don't require config
    if let Commands::Select { names } = &cli.command {
        let latest = select_latest(names.as_slice())?;
        println!("selected {}", latest);
        println!("ok");
        return Ok(());
    }

    let cfg = config::resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Store initialized at {}", cfg.store.path.display());
            println!("ok");
        }
        Commands::Ingest {
            terms,
            page_size,
            max_pages,
        } => {
            let mut options = IngestOptions::from_config(&cfg.catalog);
            if !terms.is_empty() {
                if terms.iter().any(|t| t.trim().is_empty()) {
                    bail!("--term must not be blank");
                }
                options.terms = terms;
            }
            if let Some(size) = page_size {
                options.page_size = size;
            }
            if max_pages.is_some() {
                options.max_pages_per_term = max_pages;
            }
            cmd_ingest(&cfg, &options).await?;
        }
        Commands::Export => {
            let creds = AwsCredentials::from_env()?;
            cmd_export(&cfg, creds).await?;
        }
        Commands::Load => {
            let creds = AwsCredentials::from_env()?;
            let warehouse = SnowflakeWarehouse::from_config(&cfg.warehouse)?;
            cmd_load(&cfg, &warehouse, creds).await?;
        }
        Commands::Transform => {
            run_transform(&cfg.transform).await?;
            transform::print_report();
        }
        Commands::Run => {
            // Fail on missing credentials before any work is done
            let creds = AwsCredentials::from_env()?;
            cfg.object_store.bucket()?;
            let warehouse = SnowflakeWarehouse::from_config(&cfg.warehouse)?;

            cmd_ingest(&cfg, &IngestOptions::from_config(&cfg.catalog)).await?;
            cmd_export(&cfg, creds.clone()).await?;
            cmd_load(&cfg, &warehouse, creds).await?;
            run_transform(&cfg.transform).await?;
            transform::print_report();
            info!("Pipeline complete");
        }
        Commands::Select { .. } => {}
    }

    Ok(())
}

async fn open_store(cfg: &Config) -> Result<SqliteDocumentStore> {
    migrate::run_migrations(cfg).await?;
    SqliteDocumentStore::from_config(&cfg.store)
}

async fn cmd_ingest(cfg: &Config, options: &IngestOptions) -> Result<()> {
    let store = open_store(cfg).await?;
    let client = CatalogClient::new(&cfg.catalog)?;
    let report = run_ingest(options, &client, &store).await?;
    ingest::print_report(&report);
    Ok(())
}

async fn cmd_export(cfg: &Config, creds: AwsCredentials) -> Result<()> {
    let objects = S3ObjectStore::new(&cfg.object_store, creds)?;
    let store = open_store(cfg).await?;
    let prefix = cfg.object_store.key_prefix();
    let report = export_snapshot(&store, &objects, &prefix, Utc::now()).await?;
    export::print_report(&report);
    Ok(())
}

async fn cmd_load(cfg: &Config, warehouse: &SnowflakeWarehouse, creds: AwsCredentials) -> Result<()> {
    let source = StageSource::from_config(&cfg.object_store, creds)?;
    let report = load_latest(warehouse, &cfg.warehouse, &source).await?;
    load::print_report(&report);
    Ok(())
}
