//! # catalog-sync
//!
//! Periodic data-sync pipeline for a public product catalog.
//!
//! Records are pulled page by page from the catalog search API, keyed on
//! their `code` and upserted into a local document store. The store is
//! snapshotted to object storage as timestamped JSON artifacts, and the
//! newest artifact is bulk-loaded into a raw warehouse table, replacing
//! whatever was there before. A dbt project then builds on that table.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────┐   ┌──────────┐   ┌────────┐   ┌───────────┐
//! │ Catalog API │──▶│ Fetcher  │──▶│ Upserter │──▶│ SQLite │──▶│  Export   │
//! │ search.pl   │   │ retry    │   │ by code  │   │  store │   │  to S3    │
//! └─────────────┘   └──────────┘   └──────────┘   └────────┘   └─────┬─────┘
//!                                                                    │
//!                         ┌──────────┐   ┌─────────────────────┐     │
//!                         │   dbt    │◀──│ Loader (Snowflake)  │◀────┘
//!                         │ run+test │   │ latest artifact     │
//!                         └──────────┘   └─────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! csync init                    # create the store schema
//! csync ingest --term tea       # fetch and upsert one term
//! csync export                  # snapshot the store to S3
//! csync load                    # load the newest snapshot
//! csync run                     # all of the above, then dbt
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`models`] | Records, write operations, run reports |
//! | [`db`] | SQLite connection setup |
//! | [`migrate`] | Store schema |
//! | [`store`] | Document store trait and backends |
//! | [`fetch`] | Catalog API client with retry and backoff |
//! | [`upsert`] | Record to upsert conversion |
//! | [`ingest`] | Fetch/upsert orchestration over search terms |
//! | [`artifact`] | Artifact naming and latest selection |
//! | [`object_store`] | S3 client and in-memory object store |
//! | [`export`] | Store snapshot to object storage |
//! | [`warehouse`] | Snowflake SQL API client |
//! | [`load`] | Warehouse load of the newest artifact |
//! | [`transform`] | dbt run and test |
//! | [`logging`] | Log subscriber setup |

pub mod artifact;
pub mod config;
pub mod db;
pub mod export;
pub mod fetch;
pub mod ingest;
pub mod load;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod object_store;
pub mod store;
pub mod transform;
pub mod upsert;
pub mod warehouse;
