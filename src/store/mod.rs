//! Blob Stores
//!
//! Package contents live in one of several interchangeable stores with
//! different capability levels:
//!
//! - [`BasicStore`]: put/get by identifier, nothing else (S3, MinIO)
//! - [`IndexedStore`]: get, plus per-topic retention bounds and streaming
//!   time-range queries (ReductStore)
//!
//! The client picks one store once at startup with [`select`] and wraps it in
//! a [`Backend`], which every later call goes through.

mod reduct;
mod s3;
mod select;

pub use reduct::{ReductConfig, ReductStore};
pub use s3::{S3Config, S3Store};
pub use select::{select, Candidate};

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::package::PackageId;

/// Retention window a store currently holds for one topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub oldest_record_ms: i64,
    pub latest_record_ms: i64,
}

impl Entry {
    pub fn new(name: impl Into<String>, oldest_record_ms: i64, latest_record_ms: i64) -> Self {
        Self {
            name: name.into(),
            oldest_record_ms,
            latest_record_ms,
        }
    }

    /// Build from microsecond bounds
    ///
    /// A millisecond timestamp `t` is held iff `oldest_us <= t * 1000 <= latest_us`,
    /// so the lower bound rounds up and the upper bound rounds down.
    pub fn from_micros(name: impl Into<String>, oldest_us: i64, latest_us: i64) -> Self {
        Self::new(
            name,
            oldest_us.div_euclid(1000) + i64::from(oldest_us.rem_euclid(1000) != 0),
            latest_us.div_euclid(1000),
        )
    }

    pub fn contains(&self, timestamp_ms: i64) -> bool {
        self.oldest_record_ms <= timestamp_ms && timestamp_ms <= self.latest_record_ms
    }
}

/// Store with put/get only
#[async_trait]
pub trait BasicStore: Send + Sync {
    fn name(&self) -> &str;

    /// Liveness check
    async fn probe(&self) -> Result<(), StoreError>;

    async fn get(&self, id: &PackageId) -> Result<Vec<u8>, StoreError>;

    async fn put(&self, id: &PackageId, data: Vec<u8>) -> Result<(), StoreError>;
}

/// Store that knows which records it holds
#[async_trait]
pub trait IndexedStore: Send + Sync {
    fn name(&self) -> &str;

    /// Liveness check
    async fn probe(&self) -> Result<(), StoreError>;

    async fn get(&self, id: &PackageId) -> Result<Vec<u8>, StoreError>;

    /// Retention bounds of every topic held
    async fn entries(&self) -> Result<Vec<Entry>, StoreError>;

    /// Open a streaming query over `[start_ms, stop_ms)` of one topic
    ///
    /// `ttl` bounds how long the store keeps the query session open.
    async fn query(
        &self,
        topic: &str,
        start_ms: i64,
        stop_ms: i64,
        ttl: Duration,
    ) -> Result<Box<dyn RecordStream>, StoreError>;
}

/// Records of an open query, pulled one at a time in timestamp order
#[async_trait]
pub trait RecordStream: Send {
    /// Next record body, `None` once the query is exhausted
    async fn next_record(&mut self) -> Result<Option<Vec<u8>>, StoreError>;
}

/// The store selected at startup
pub enum Backend {
    Basic(Box<dyn BasicStore>),
    Indexed(Box<dyn IndexedStore>),
}

impl Backend {
    pub fn name(&self) -> &str {
        match self {
            Backend::Basic(store) => store.name(),
            Backend::Indexed(store) => store.name(),
        }
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self, Backend::Indexed(_))
    }

    pub async fn probe(&self) -> Result<(), StoreError> {
        match self {
            Backend::Basic(store) => store.probe().await,
            Backend::Indexed(store) => store.probe().await,
        }
    }

    pub async fn fetch(&self, id: &PackageId) -> Result<Vec<u8>, StoreError> {
        match self {
            Backend::Basic(store) => store.get(id).await,
            Backend::Indexed(store) => store.get(id).await,
        }
    }

    /// Keep only identifiers the store still holds
    ///
    /// A basic store has no existence metadata, so everything passes.
    pub async fn filter_existing(&self, ids: Vec<PackageId>) -> Result<Vec<PackageId>, StoreError> {
        match self {
            Backend::Basic(_) => Ok(ids),
            Backend::Indexed(store) => {
                let entries = store.entries().await?;
                Ok(filter_by_entries(ids, &entries))
            }
        }
    }

    pub async fn query(
        &self,
        topic: &str,
        start_ms: i64,
        stop_ms: i64,
        ttl: Duration,
    ) -> Result<Box<dyn RecordStream>, StoreError> {
        match self {
            Backend::Basic(store) => Err(StoreError::Unsupported(format!(
                "{} does not support time-range queries",
                store.name()
            ))),
            Backend::Indexed(store) => store.query(topic, start_ms, stop_ms, ttl).await,
        }
    }
}

/// Drop identifiers outside their topic's retention window
///
/// Topics are kept in first-seen order; each topic's identifiers come back
/// sorted. Topics without an entry are dropped entirely.
pub fn filter_by_entries(ids: Vec<PackageId>, entries: &[Entry]) -> Vec<PackageId> {
    let mut order: Vec<String> = Vec::new();
    let mut by_topic: HashMap<String, Vec<i64>> = HashMap::new();

    for id in ids {
        by_topic
            .entry(id.topic.clone())
            .or_insert_with(|| {
                order.push(id.topic.clone());
                Vec::new()
            })
            .push(id.timestamp_ms);
    }

    let entries: HashMap<&str, &Entry> = entries.iter().map(|e| (e.name.as_str(), e)).collect();

    let mut kept = Vec::new();
    for topic in order {
        let Some(mut timestamps) = by_topic.remove(&topic) else {
            continue;
        };
        let total = timestamps.len();

        let Some(entry) = entries.get(topic.as_str()) else {
            tracing::debug!(topic = %topic, dropped = total, "Topic not held by store");
            continue;
        };

        timestamps.retain(|ts| entry.contains(*ts));
        timestamps.sort_unstable();

        if timestamps.len() < total {
            tracing::debug!(
                topic = %topic,
                dropped = total - timestamps.len(),
                oldest = entry.oldest_record_ms,
                latest = entry.latest_record_ms,
                "Dropped packages outside retention window"
            );
        }

        kept.extend(timestamps.into_iter().map(|ts| PackageId::new(topic.clone(), ts)));
    }

    kept
}

/// Errors returned by blob stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),
}
