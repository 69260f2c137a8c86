use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use catalog_sync::config::{ObjectStoreConfig, WarehouseConfig};
use catalog_sync::export::export_snapshot;
use catalog_sync::load::{load_latest, StageSource};
use catalog_sync::models::UpsertOperation;
use catalog_sync::object_store::{AwsCredentials, InMemoryObjectStore, ObjectStore};
use catalog_sync::store::memory::InMemoryDocumentStore;
use catalog_sync::store::DocumentStore;
use catalog_sync::warehouse::{Rows, Warehouse};
use chrono::TimeZone;
use serde_json::json;

const BUCKET_URL: &str = "s3://exports/";

/// A warehouse whose stage is a folder of an object store and whose single
/// table only tracks its row count.
struct SimulatedWarehouse {
    stage: Arc<InMemoryObjectStore>,
    folder: String,
    rows: Mutex<u64>,
}

impl SimulatedWarehouse {
    /// The stage sees only the keys under the folder `source.url` points at.
    fn new(stage: Arc<InMemoryObjectStore>, source: &StageSource) -> Self {
        let folder = source
            .url
            .strip_prefix(BUCKET_URL)
            .unwrap_or_else(|| panic!("stage {} is outside the bucket", source.url))
            .to_string();
        Self {
            stage,
            folder,
            rows: Mutex::new(0),
        }
    }
}

#[async_trait]
impl Warehouse for SimulatedWarehouse {
    async fn query(&self, sql: &str) -> Result<Rows> {
        if sql.starts_with("TRUNCATE") {
            *self.rows.lock().unwrap() = 0;
        } else if sql.starts_with("LIST") {
            let keys = self.stage.list_keys(&self.folder).await?;
            return Ok(keys
                .into_iter()
                .map(|k| vec![Some(format!("{}{}", BUCKET_URL, k)), Some("0".to_string())])
                .collect());
        } else if sql.starts_with("COPY INTO") {
            let file = sql
                .split_whitespace()
                .find(|t| t.starts_with('@'))
                .and_then(|t| t.rsplit('/').next())
                .ok_or_else(|| anyhow!("no stage path in COPY"))?;
            let key = format!("{}{}", self.folder, file);
            let body = self
                .stage
                .get(&key)
                .ok_or_else(|| anyhow!("file {} not in stage", key))?;
            let docs: Vec<serde_json::Value> = serde_json::from_slice(&body)?;
            *self.rows.lock().unwrap() += docs.len() as u64;
        } else if sql.starts_with("SELECT COUNT") {
            let rows = *self.rows.lock().unwrap();
            return Ok(vec![vec![Some(rows.to_string())]]);
        } else if !sql.starts_with("CREATE") {
            bail!("unexpected statement: {}", sql);
        }
        Ok(vec![])
    }
}

fn credentials() -> AwsCredentials {
    AwsCredentials {
        access_key_id: "AKID".to_string(),
        secret_access_key: "secret".to_string(),
        session_token: None,
    }
}

fn source() -> StageSource {
    StageSource {
        url: BUCKET_URL.to_string(),
        credentials: credentials(),
    }
}

async fn add_products(store: &InMemoryDocumentStore, codes: &[&str]) {
    let ops: Vec<UpsertOperation> = codes
        .iter()
        .map(|c| UpsertOperation {
            key: c.to_string(),
            document: json!({"code": c}).as_object().cloned().unwrap(),
        })
        .collect();
    store.bulk_upsert(&ops).await.unwrap();
}

#[tokio::test]
async fn test_second_load_replaces_first() {
    let store = InMemoryDocumentStore::new();
    let stage = Arc::new(InMemoryObjectStore::new());
    let warehouse = SimulatedWarehouse::new(stage.clone(), &source());
    let config = WarehouseConfig::default();

    add_products(&store, &["1", "2", "3"]).await;
    let t1 = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    export_snapshot(&store, &*stage, "", t1).await.unwrap();

    let first = load_latest(&warehouse, &config, &source()).await.unwrap();
    assert_eq!(first.artifact, "openfoodfacts_export_20240101_000000.json");
    assert_eq!(first.rows, 3);

    add_products(&store, &["4", "5"]).await;
    let t2 = chrono::Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
    export_snapshot(&store, &*stage, "", t2).await.unwrap();

    let second = load_latest(&warehouse, &config, &source()).await.unwrap();
    assert_eq!(second.artifact, "openfoodfacts_export_20240115_120000.json");
    // Only the second artifact's rows remain
    assert_eq!(second.rows, 5);
}

#[tokio::test]
async fn test_reloading_same_artifact_is_stable() {
    let store = InMemoryDocumentStore::new();
    let stage = Arc::new(InMemoryObjectStore::new());
    let warehouse = SimulatedWarehouse::new(stage.clone(), &source());
    let config = WarehouseConfig::default();

    add_products(&store, &["1", "2"]).await;
    let t = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
    export_snapshot(&store, &*stage, "", t).await.unwrap();

    for _ in 0..3 {
        let report = load_latest(&warehouse, &config, &source()).await.unwrap();
        assert_eq!(report.rows, 2);
    }
}

#[tokio::test]
async fn test_empty_stage_fails_without_copy() {
    let stage = Arc::new(InMemoryObjectStore::new());
    stage
        .put_object("notes.txt", b"hello".to_vec(), "text/plain")
        .await
        .unwrap();
    let warehouse = SimulatedWarehouse::new(stage, &source());

    let err = load_latest(&warehouse, &WarehouseConfig::default(), &source())
        .await
        .unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.contains("no artifact matching"), "{}", msg);
}

#[tokio::test]
async fn test_export_and_load_agree_on_bare_prefix() {
    let object_store = ObjectStoreConfig {
        bucket: Some("exports".to_string()),
        prefix: "snapshots".to_string(),
        ..Default::default()
    };
    let source = StageSource::from_config(&object_store, credentials()).unwrap();
    assert_eq!(source.url, "s3://exports/snapshots/");

    let store = InMemoryDocumentStore::new();
    let stage = Arc::new(InMemoryObjectStore::new());
    // Outside the stage folder; never listed
    stage
        .put_object(
            "openfoodfacts_export_20300101_000000.json",
            b"[]".to_vec(),
            "application/json",
        )
        .await
        .unwrap();
    let warehouse = SimulatedWarehouse::new(stage.clone(), &source);

    add_products(&store, &["1", "2"]).await;
    let t = chrono::Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
    let export = export_snapshot(&store, &*stage, &object_store.key_prefix(), t)
        .await
        .unwrap();
    assert_eq!(export.key, "snapshots/openfoodfacts_export_20240115_120000.json");

    let report = load_latest(&warehouse, &WarehouseConfig::default(), &source)
        .await
        .unwrap();
    assert_eq!(report.artifact, "openfoodfacts_export_20240115_120000.json");
    assert_eq!(report.rows, 2);
}

#[tokio::test]
async fn test_raw_prefix_passed_to_exporter_still_reaches_stage() {
    let object_store = ObjectStoreConfig {
        bucket: Some("exports".to_string()),
        prefix: "/snapshots".to_string(),
        ..Default::default()
    };
    let source = StageSource::from_config(&object_store, credentials()).unwrap();

    let store = InMemoryDocumentStore::new();
    let stage = Arc::new(InMemoryObjectStore::new());
    let warehouse = SimulatedWarehouse::new(stage.clone(), &source);

    add_products(&store, &["1"]).await;
    let t = chrono::Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
    export_snapshot(&store, &*stage, &object_store.prefix, t)
        .await
        .unwrap();

    let report = load_latest(&warehouse, &WarehouseConfig::default(), &source)
        .await
        .unwrap();
    assert_eq!(report.rows, 1);
}
