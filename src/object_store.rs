//! Object storage for snapshot artifacts.
//!
//! [`ObjectStore`] covers the two operations the pipeline needs: writing a
//! blob by key and listing keys under a prefix. [`S3ObjectStore`] talks to
//! the S3 REST API directly with AWS Signature V4 authentication and
//! supports custom endpoints for S3-compatible services (MinIO,
//! LocalStack). [`InMemoryObjectStore`] backs tests and dry runs.
//!
//! # Configuration
//!
//! ```toml
//! [object_store]
//! bucket = "nutri-exports"
//! prefix = "snapshots/"
//! region = "eu-west-1"
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! ```
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID`: required
//! - `AWS_SECRET_ACCESS_KEY`: required
//! - `AWS_SESSION_TOKEN`: optional (temporary credentials)
//!
//! # Addressing
//!
//! Without `endpoint_url` requests go to
//! `https://<bucket>.s3.<region>.amazonaws.com/<key>` (virtual-hosted
//! style). With a custom endpoint they use path style:
//! `<endpoint>/<bucket>/<key>`.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::ObjectStoreConfig;

/// Blob storage used for snapshot artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `body` under `key`, replacing any existing object.
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;

    /// All keys starting with `prefix`, in lexicographic order.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Canonical key prefix: no leading `/`, and a trailing `/` unless empty.
///
/// Snapshot keys and the warehouse stage URL are both derived from this, so
/// `"snapshots"`, `"/snapshots"` and `"snapshots/"` name the same folder.
pub fn normalize_prefix(prefix: &str) -> String {
    let prefix = prefix.trim_start_matches('/');
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{}/", prefix)
    }
}

// ============ AWS Credentials ============

/// AWS credentials loaded from environment variables.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AwsCredentials {
    /// Load credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// and optionally `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let access_key_id =
            get("AWS_ACCESS_KEY_ID").context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = get("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = get("AWS_SESSION_TOKEN");

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

// ============ S3 ============

type HmacSha256 = Hmac<Sha256>;

/// S3 (or S3-compatible) bucket accessed over the REST API.
pub struct S3ObjectStore {
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3ObjectStore {
    pub fn new(config: &ObjectStoreConfig, creds: AwsCredentials) -> Result<Self> {
        Ok(Self {
            bucket: config.bucket()?.to_string(),
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            creds,
            client: reqwest::Client::new(),
        })
    }

    /// Scheme + authority, and the path prefix objects live under.
    fn base(&self) -> (String, String, String) {
        match &self.endpoint_url {
            Some(endpoint) => {
                let endpoint = endpoint.trim_end_matches('/');
                let (scheme, host) = match endpoint.split_once("://") {
                    Some((s, h)) => (s.to_string(), h.to_string()),
                    None => ("https".to_string(), endpoint.to_string()),
                };
                (scheme, host, format!("/{}", uri_encode(&self.bucket)))
            }
            None => (
                "https".to_string(),
                format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
                String::new(),
            ),
        }
    }

    /// Build SigV4 headers for a request.
    fn sign(
        &self,
        method: &str,
        host: &str,
        canonical_uri: &str,
        canonical_querystring: &str,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> Vec<(String, String)> {
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut headers = vec![
            ("host".to_string(), host.to_string()),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method,
            canonical_uri,
            canonical_querystring,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key =
            derive_signing_key(&self.creds.secret_access_key, &date_stamp, &self.region, "s3");
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        // `host` is set by reqwest from the URL
        let mut out: Vec<(String, String)> =
            headers.into_iter().filter(|(k, _)| k != "host").collect();
        out.push(("authorization".to_string(), authorization));
        out
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let (scheme, host, base_path) = self.base();
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        let canonical_uri = format!("{}/{}", base_path, encoded_key);
        let url = format!("{}://{}{}", scheme, host, canonical_uri);

        let payload_hash = hex_sha256(&body);
        let headers = self.sign("PUT", &host, &canonical_uri, "", &payload_hash, Utc::now());

        let mut req = self
            .client
            .put(&url)
            .header("content-type", content_type)
            .body(body);
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| anyhow!("Failed to put s3://{}/{}: {}", self.bucket, key, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 PutObject failed (HTTP {}) for key '{}': {}",
                status,
                key,
                body.chars().take(500).collect::<String>()
            );
        }

        debug!(bucket = %self.bucket, key, "Object written");
        Ok(())
    }

    /// Uses `ListObjectsV2` with `max-keys=1000` per page and follows
    /// `NextContinuationToken` until the listing is complete.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let (scheme, host, base_path) = self.base();
        let canonical_uri = format!("{}/", base_path);
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query_params = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if !prefix.is_empty() {
                query_params.push(("prefix".to_string(), prefix.to_string()));
            }
            if let Some(ref token) = continuation_token {
                query_params.push(("continuation-token".to_string(), token.clone()));
            }

            // Canonical query string must be sorted
            query_params.sort_by(|a, b| a.0.cmp(&b.0));
            let canonical_querystring: String = query_params
                .iter()
                .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
                .collect::<Vec<_>>()
                .join("&");

            let payload_hash = hex_sha256(b"");
            let headers = self.sign(
                "GET",
                &host,
                &canonical_uri,
                &canonical_querystring,
                &payload_hash,
                Utc::now(),
            );

            let full_url = format!(
                "{}://{}{}?{}",
                scheme, host, canonical_uri, canonical_querystring
            );
            let mut req = self.client.get(&full_url);
            for (k, v) in &headers {
                req = req.header(k.as_str(), v.as_str());
            }

            let resp = req.send().await.map_err(|e| {
                anyhow!(
                    "Failed to list S3 objects in s3://{}/{}: {}",
                    self.bucket,
                    prefix,
                    e
                )
            })?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "S3 ListObjectsV2 failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }

            let xml_body = resp.text().await?;
            let page = parse_list_objects_response(&xml_body)?;
            keys.extend(
                page.contents
                    .into_iter()
                    .map(|o| o.key)
                    .filter(|k| !k.is_empty() && !k.ends_with('/')),
            );

            match (page.is_truncated, page.next_continuation_token) {
                (true, Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }

        Ok(keys)
    }
}

// ============ ListObjectsV2 response ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ListedObject>,
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedObject {
    key: String,
}

fn parse_list_objects_response(xml: &str) -> Result<ListBucketResult> {
    quick_xml::de::from_str(xml).context("Malformed ListObjectsV2 response")
}

// ============ AWS SigV4 Helpers ============

/// Compute the hex-encoded SHA-256 hash of data.
fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute HMAC-SHA256 of data with the given key.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this cannot fail
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a string per RFC 3986, leaving `A-Z a-z 0-9 - _ . ~` as is.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

// ============ In-memory ============

/// Object store kept in process memory.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, (Vec<u8>, String)>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Body of a stored object.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .ok()
            .and_then(|objects| objects.get(key).map(|(body, _)| body.clone()))
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| anyhow!("object store lock poisoned"))?;
        objects.insert(key.to_string(), (body, content_type.to_string()));
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| anyhow!("object store lock poisoned"))?;
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
