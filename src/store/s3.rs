//! S3-compatible basic store (MinIO)
//!
//! Objects are stored path-style at `{endpoint}/{bucket}/{topic}/{ts}.dp`.
//! Requests are signed with AWS Signature Version 4.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode, Url};
use sha2::{Digest, Sha256};
use std::time::Duration;

use super::{BasicStore, StoreError};
use crate::package::PackageId;

type HmacSha256 = Hmac<Sha256>;

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

/// Configuration for the S3 client
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Endpoint URL (e.g., "http://localhost:9000")
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            bucket: "data".to_string(),
            region: "us-east-1".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

/// S3/MinIO client
pub struct S3Store {
    client: Client,
    config: S3Config,
}

impl S3Store {
    pub fn new(config: S3Config) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self { client, config })
    }

    /// Path-style URL for an object key (or the bucket itself when empty)
    fn object_url(&self, key: &str) -> Result<Url, StoreError> {
        let mut path = format!("/{}", encode_segment(&self.config.bucket));
        if !key.is_empty() {
            path.push('/');
            path.push_str(&encode_path(key));
        }

        let raw = format!("{}{}", self.config.endpoint.trim_end_matches('/'), path);
        Url::parse(&raw).map_err(|e| StoreError::InvalidResponse(format!("bad endpoint {raw}: {e}")))
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, StoreError> {
        let url = self.object_url(key)?;
        let signed = sign(&self.config, method.as_str(), &url, Utc::now());

        let mut request = self
            .client
            .request(method, url)
            .header("x-amz-date", &signed.amz_date)
            .header("x-amz-content-sha256", UNSIGNED_PAYLOAD)
            .header(reqwest::header::AUTHORIZATION, signed.authorization);
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Err(StoreError::ApiError {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl BasicStore for S3Store {
    fn name(&self) -> &str {
        "s3"
    }

    async fn probe(&self) -> Result<(), StoreError> {
        self.send(Method::HEAD, "", None).await?;
        Ok(())
    }

    async fn get(&self, id: &PackageId) -> Result<Vec<u8>, StoreError> {
        let response = self.send(Method::GET, &id.to_string(), None).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn put(&self, id: &PackageId, data: Vec<u8>) -> Result<(), StoreError> {
        self.send(Method::PUT, &id.to_string(), Some(data)).await?;
        Ok(())
    }
}

/// Headers produced by signing one request
#[derive(Debug, Clone, PartialEq)]
struct SignedRequest {
    amz_date: String,
    authorization: String,
}

fn sign(config: &S3Config, method: &str, url: &Url, now: DateTime<Utc>) -> SignedRequest {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    };

    let canonical_request = format!(
        "{method}\n{path}\n{query}\nhost:{host}\nx-amz-content-sha256:{UNSIGNED_PAYLOAD}\nx-amz-date:{amz_date}\n\n{SIGNED_HEADERS}\n{UNSIGNED_PAYLOAD}",
        path = url.path(),
        query = url.query().unwrap_or(""),
    );

    let scope = format!("{date}/{}/s3/aws4_request", config.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac_sha256(format!("AWS4{}", config.secret_key).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, config.region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

    SignedRequest {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
            config.access_key
        ),
        amz_date,
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Encode each `/`-separated segment of a key
fn encode_path(key: &str) -> String {
    key.split('/').map(encode_segment).collect::<Vec<_>>().join("/")
}
