//! ReductStore indexed store
//!
//! HTTP client for the ReductStore v1 API. Records are addressed by entry
//! (the topic) and a microsecond timestamp.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

use super::{Entry, IndexedStore, RecordStream, StoreError};
use crate::package::PackageId;

/// Configuration for the ReductStore client
#[derive(Debug, Clone)]
pub struct ReductConfig {
    /// Base URL (e.g., "http://localhost:8383")
    pub url: String,
    /// API token, empty for anonymous access
    pub token: String,
    /// Bucket holding the packages
    pub bucket: String,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for ReductConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8383".to_string(),
            token: String::new(),
            bucket: "data".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

/// ReductStore client
pub struct ReductStore {
    client: Client,
    config: ReductConfig,
}

impl ReductStore {
    pub fn new(config: ReductConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self { client, config })
    }

    fn base(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn entry_url(&self, entry: &str) -> String {
        format!(
            "{}/api/v1/b/{}/{}",
            self.base(),
            urlencoding::encode(&self.config.bucket),
            urlencoding::encode(entry)
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        authorize(request, &self.config.token)
    }
}

fn authorize(request: RequestBuilder, token: &str) -> RequestBuilder {
    if token.is_empty() {
        request
    } else {
        request.header(AUTHORIZATION, format!("Bearer {token}"))
    }
}

/// Turn a non-success response into an error, preferring ReductStore's error header
async fn check(response: Response, what: &str) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let header = response
        .headers()
        .get("x-reduct-error")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let message = match header {
        Some(message) => message,
        None => response.text().await.unwrap_or_default(),
    };

    if status == StatusCode::NOT_FOUND {
        Err(StoreError::NotFound(format!("{what}: {message}")))
    } else {
        Err(StoreError::ApiError {
            status: status.as_u16(),
            message,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BucketInfo {
    #[serde(default)]
    entries: Vec<EntryInfo>,
}

#[derive(Debug, Deserialize)]
struct EntryInfo {
    name: String,
    #[serde(deserialize_with = "int_or_string")]
    oldest_record: i64,
    #[serde(deserialize_with = "int_or_string")]
    latest_record: i64,
}

#[derive(Debug, Deserialize)]
struct QueryInfo {
    #[serde(deserialize_with = "int_or_string")]
    id: i64,
}

/// Older servers encode 64-bit integers as strings
fn int_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(v) => Ok(v),
        Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
    }
}

/// Query lifetime in whole seconds, rounded up and at least one
fn ttl_secs(ttl: Duration) -> i64 {
    let secs = ttl.as_secs().saturating_add(u64::from(ttl.subsec_nanos() > 0));
    i64::try_from(secs.max(1)).unwrap_or(i64::MAX)
}

fn parse_entries(body: &str) -> Result<Vec<Entry>, StoreError> {
    let info: BucketInfo =
        serde_json::from_str(body).map_err(|e| StoreError::InvalidResponse(e.to_string()))?;

    Ok(info
        .entries
        .into_iter()
        .map(|e| Entry::from_micros(e.name, e.oldest_record, e.latest_record))
        .collect())
}

#[async_trait]
impl IndexedStore for ReductStore {
    fn name(&self) -> &str {
        "reductstore"
    }

    async fn probe(&self) -> Result<(), StoreError> {
        let url = format!("{}/api/v1/info", self.base());
        let response = self.authorized(self.client.get(&url)).send().await?;
        check(response, "server info").await?;
        Ok(())
    }

    async fn get(&self, id: &PackageId) -> Result<Vec<u8>, StoreError> {
        let ts = id
            .timestamp_us()
            .ok_or_else(|| StoreError::NotFound(format!("{id}: timestamp out of range")))?;

        let url = self.entry_url(&id.topic);
        let response = self
            .authorized(self.client.get(&url))
            .query(&[("ts", ts)])
            .send()
            .await?;

        let response = check(response, &id.to_string()).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn entries(&self) -> Result<Vec<Entry>, StoreError> {
        let url = format!(
            "{}/api/v1/b/{}",
            self.base(),
            urlencoding::encode(&self.config.bucket)
        );
        let response = self.authorized(self.client.get(&url)).send().await?;
        let body = check(response, "bucket").await?.text().await?;
        parse_entries(&body)
    }

    async fn query(
        &self,
        topic: &str,
        start_ms: i64,
        stop_ms: i64,
        ttl: Duration,
    ) -> Result<Box<dyn RecordStream>, StoreError> {
        let entry_url = self.entry_url(topic);
        let response = self
            .authorized(self.client.get(format!("{entry_url}/q")))
            .query(&[
                ("start", start_ms.saturating_mul(1000)),
                ("stop", stop_ms.saturating_mul(1000)),
                ("ttl", ttl_secs(ttl)),
            ])
            .send()
            .await?;

        let body = check(response, topic).await?.text().await?;
        let info: QueryInfo =
            serde_json::from_str(&body).map_err(|e| StoreError::InvalidResponse(e.to_string()))?;

        tracing::debug!(topic = %topic, query_id = info.id, ttl_secs = ttl_secs(ttl), "Opened query");

        Ok(Box::new(ReductQuery {
            client: self.client.clone(),
            token: self.config.token.clone(),
            entry_url,
            id: info.id,
            finished: false,
        }))
    }
}

/// An open ReductStore query, read one record per request
struct ReductQuery {
    client: Client,
    token: String,
    entry_url: String,
    id: i64,
    finished: bool,
}

#[async_trait]
impl RecordStream for ReductQuery {
    async fn next_record(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
        if self.finished {
            return Ok(None);
        }

        let request = self.client.get(&self.entry_url).query(&[("q", self.id)]);
        let response = authorize(request, &self.token).send().await?;

        if response.status() == StatusCode::NO_CONTENT {
            self.finished = true;
            return Ok(None);
        }

        let response = check(response, &format!("query {}", self.id)).await?;
        let last = response
            .headers()
            .get("x-reduct-last")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let body = response.bytes().await?.to_vec();
        if last {
            self.finished = true;
        }
        Ok(Some(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entries() {
        let body = r#"{
            "info": {"name": "data"},
            "entries": [
                {"name": "topic", "size": 100, "block_count": 1, "record_count": 1,
                 "oldest_record": 2000000, "latest_record": 3000000},
                {"name": "legacy", "oldest_record": "1000", "latest_record": "1999"}
            ]
        }"#;

        let entries = parse_entries(body).unwrap();
        assert_eq!(entries[0], Entry::new("topic", 2000, 3000));
        assert_eq!(entries[1], Entry::new("legacy", 1, 1));
    }

    #[test]
    fn test_parse_entries_rejects_garbage() {
        assert!(matches!(
            parse_entries("not json"),
            Err(StoreError::InvalidResponse(_))
        ));
        assert!(parse_entries("{}").unwrap().is_empty());
    }

    #[test]
    fn test_ttl_rounds_up() {
        assert_eq!(ttl_secs(Duration::from_millis(500)), 1);
        assert_eq!(ttl_secs(Duration::ZERO), 1);
        assert_eq!(ttl_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_secs(Duration::from_secs(60)), 60);
    }

    #[tokio::test]
    async fn test_get_out_of_range_timestamp_is_not_found() {
        let store = ReductStore::new(ReductConfig {
            url: "http://127.0.0.1:1".to_string(),
            ..ReductConfig::default()
        })
        .unwrap();

        let id = PackageId::new("acc-5", i64::MAX);
        assert!(matches!(store.get(&id).await, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_entry_url_is_encoded() {
        let store = ReductStore::new(ReductConfig {
            url: "http://host:8383/".to_string(),
            ..ReductConfig::default()
        })
        .unwrap();
        assert_eq!(store.entry_url("acc 5"), "http://host:8383/api/v1/b/data/acc%205");
    }
}
