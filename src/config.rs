//! Configuration parsing and validation.
//!
//! Settings are read from a TOML file in which every section is optional,
//! then selected keys are overridden from the environment (after `.env` has
//! been loaded by the binary). The resulting [`Config`] is built once at
//! startup and passed by reference into every component.
//!
//! ```toml
//! [store]
//! path = "./data/catalog.sqlite"
//!
//! [catalog]
//! search_terms = ["tea", "pasta"]
//! page_size = 50
//! max_retries = 3
//!
//! [object_store]
//! bucket = "nutri-exports"
//! prefix = "snapshots/"
//!
//! [warehouse]
//! account = "xy12345.eu-west-1"
//! database = "NUTRI_DB"
//! schema = "RAW"
//! ```
//!
//! Credentials are never read from the file; see
//! [`AwsCredentials`](crate::object_store::AwsCredentials) and
//! [`SnowflakeWarehouse::from_config`](crate::warehouse::SnowflakeWarehouse::from_config).

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Path tried when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/catalog-sync.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub transform: TransformConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/catalog.sqlite")
}

/// Catalog API and ingestion loop settings.
#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_search_terms")]
    pub search_terms: Vec<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Time unit the retry backoff `2^n + jitter` is expressed in.
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
    #[serde(default = "default_pacing_min_ms")]
    pub pacing_min_ms: u64,
    #[serde(default = "default_pacing_max_ms")]
    pub pacing_max_ms: u64,
    /// Upper bound on pages per term. Unset means "until an empty page".
    #[serde(default)]
    pub max_pages_per_term: Option<u32>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            search_terms: default_search_terms(),
            page_size: default_page_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            backoff_unit_ms: default_backoff_unit_ms(),
            pacing_min_ms: default_pacing_min_ms(),
            pacing_max_ms: default_pacing_max_ms(),
            max_pages_per_term: None,
            user_agent: default_user_agent(),
        }
    }
}

impl CatalogConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }
}

fn default_base_url() -> String {
    "https://world.openfoodfacts.org".to_string()
}
fn default_search_terms() -> Vec<String> {
    [
        "chips",
        "chocolate",
        "biscuits",
        "pizza",
        "milk",
        "beer",
        "cereal",
        "cookies",
        "pasta",
        "tea",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_page_size() -> u32 {
    50
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_backoff_unit_ms() -> u64 {
    1000
}
fn default_pacing_min_ms() -> u64 {
    1000
}
fn default_pacing_max_ms() -> u64 {
    3000
}
fn default_user_agent() -> String {
    format!("catalog-sync/{}", env!("CARGO_PKG_VERSION"))
}

/// Object storage location for snapshot artifacts.
#[derive(Debug, Deserialize, Clone)]
pub struct ObjectStoreConfig {
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            prefix: String::new(),
            region: default_region(),
            endpoint_url: None,
        }
    }
}

impl ObjectStoreConfig {
    pub fn bucket(&self) -> Result<&str> {
        match self.bucket.as_deref() {
            Some(b) if !b.is_empty() => Ok(b),
            _ => bail!("object_store.bucket is not set (config file or S3_BUCKET)"),
        }
    }

    /// `prefix` normalized for use in object keys.
    pub fn key_prefix(&self) -> String {
        crate::object_store::normalize_prefix(&self.prefix)
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct WarehouseConfig {
    #[serde(default)]
    pub account: Option<String>,
    /// Overrides `https://<account>.snowflakecomputing.com`.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_compute")]
    pub warehouse: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_stage")]
    pub stage: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default = "default_statement_timeout_secs")]
    pub statement_timeout_secs: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            account: None,
            base_url: None,
            warehouse: default_compute(),
            database: default_database(),
            schema: default_schema(),
            table: default_table(),
            stage: default_stage(),
            role: None,
            token_type: default_token_type(),
            statement_timeout_secs: default_statement_timeout_secs(),
        }
    }
}

fn default_compute() -> String {
    "COMPUTE_WH".to_string()
}
fn default_database() -> String {
    "NUTRI_DB".to_string()
}
fn default_schema() -> String {
    "RAW".to_string()
}
fn default_table() -> String {
    "RAW_OPENFOODFACTS".to_string()
}
fn default_stage() -> String {
    "STAGE_OPENFOODFACTS".to_string()
}
fn default_token_type() -> String {
    "OAUTH".to_string()
}
fn default_statement_timeout_secs() -> u64 {
    600
}

/// Downstream transformation runner (dbt).
#[derive(Debug, Deserialize, Clone)]
pub struct TransformConfig {
    #[serde(default = "default_dbt_bin")]
    pub dbt_bin: String,
    #[serde(default = "default_dbt_dir")]
    pub project_dir: PathBuf,
    #[serde(default = "default_dbt_dir")]
    pub profiles_dir: PathBuf,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            dbt_bin: default_dbt_bin(),
            project_dir: default_dbt_dir(),
            profiles_dir: default_dbt_dir(),
        }
    }
}

fn default_dbt_bin() -> String {
    "dbt".to_string()
}
fn default_dbt_dir() -> PathBuf {
    Path::new("dbt").join("openfoodfacts_snowflake_dbt")
}

/// Resolve the configuration for a CLI invocation.
///
/// An explicit path must exist. Without one, [`DEFAULT_CONFIG_PATH`] is
/// used when present and built-in defaults otherwise. Environment
/// overrides are applied and the result is validated in both cases.
pub fn resolve_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(p) => read_config_file(p)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                read_config_file(default_path)?
            } else {
                Config::default()
            }
        }
    };

    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Read, parse and validate a config file without environment overrides.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = read_config_file(path)?;
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    Ok(config)
}

impl Config {
    /// Override file settings with the recognized environment variables.
    ///
    /// `lookup` abstracts the environment so callers can supply a map.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DB_PATH") {
            self.store.path = PathBuf::from(v);
        }
        if let Some(v) = get("PAGE_SIZE") {
            self.catalog.page_size = v
                .trim()
                .parse()
                .with_context(|| format!("PAGE_SIZE must be a positive integer, got '{}'", v))?;
        }
        if let Some(v) = get("TOTAL_PAGES_PER_SEARCH") {
            let pages: u32 = v.trim().parse().with_context(|| {
                format!("TOTAL_PAGES_PER_SEARCH must be a positive integer, got '{}'", v)
            })?;
            self.catalog.max_pages_per_term = Some(pages);
        }
        if let Some(v) = get("S3_BUCKET") {
            self.object_store.bucket = Some(v);
        }
        if let Some(v) = get("SNOWFLAKE_ACCOUNT") {
            self.warehouse.account = Some(v);
        }
        if let Some(v) = get("SNOWFLAKE_WAREHOUSE_NAME") {
            self.warehouse.warehouse = v;
        }
        if let Some(v) = get("SNOWFLAKE_DATABASE_NAME") {
            self.warehouse.database = v;
        }
        if let Some(v) = get("SNOWFLAKE_SCHEMA_NAME") {
            self.warehouse.schema = v;
        }
        if let Some(v) = get("SNOWFLAKE_ROLE") {
            self.warehouse.role = Some(v);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        // Validate catalog
        if self.catalog.page_size == 0 {
            bail!("catalog.page_size must be > 0");
        }
        if self.catalog.timeout_secs == 0 {
            bail!("catalog.timeout_secs must be > 0");
        }
        if self.catalog.pacing_min_ms > self.catalog.pacing_max_ms {
            bail!(
                "catalog.pacing_min_ms ({}) must not exceed catalog.pacing_max_ms ({})",
                self.catalog.pacing_min_ms,
                self.catalog.pacing_max_ms
            );
        }
        if self.catalog.max_pages_per_term == Some(0) {
            bail!("catalog.max_pages_per_term must be > 0 when set");
        }
        if self.catalog.search_terms.is_empty() {
            bail!("catalog.search_terms must not be empty");
        }
        if let Some(term) = self
            .catalog
            .search_terms
            .iter()
            .find(|t| t.trim().is_empty())
        {
            bail!("catalog.search_terms contains a blank term: '{}'", term);
        }

        // Warehouse identifiers are interpolated into SQL
        validate_identifier("warehouse.warehouse", &self.warehouse.warehouse)?;
        validate_identifier("warehouse.database", &self.warehouse.database)?;
        validate_identifier("warehouse.schema", &self.warehouse.schema)?;
        validate_identifier("warehouse.table", &self.warehouse.table)?;
        validate_identifier("warehouse.stage", &self.warehouse.stage)?;
        if let Some(role) = &self.warehouse.role {
            validate_identifier("warehouse.role", role)?;
        }

        match self.warehouse.token_type.as_str() {
            "OAUTH" | "KEYPAIR_JWT" | "PROGRAMMATIC_ACCESS_TOKEN" => {}
            other => bail!(
                "Unknown warehouse.token_type: '{}'. Must be OAUTH, KEYPAIR_JWT, or PROGRAMMATIC_ACCESS_TOKEN.",
                other
            ),
        }

        if self.object_store.prefix.contains('\'') {
            bail!("object_store.prefix must not contain quotes");
        }

        Ok(())
    }
}

/// Accept unquoted SQL identifiers only: a letter or `_` followed by
/// letters, digits, `_` or `$`.
pub fn validate_identifier(field: &str, value: &str) -> Result<()> {
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    };
    if !valid {
        bail!("{} is not a valid identifier: '{}'", field, value);
    }
    Ok(())
}
