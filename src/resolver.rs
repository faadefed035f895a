//! Package resolution
//!
//! Turns a topic and a time range into the identifiers of packages that can
//! actually be fetched: the time index says when packages were produced, the
//! selected backend says which of them it still holds.

use std::sync::Arc;

use crate::error::{DriftError, DriftResult};
use crate::index::{FieldSelection, FieldSeries, TimeIndex};
use crate::package::PackageId;
use crate::store::Backend;
use crate::time::TimeRange;

/// Resolves topics and ranges into package identifiers
#[derive(Clone)]
pub struct Resolver {
    index: Arc<dyn TimeIndex>,
    backend: Arc<Backend>,
}

impl Resolver {
    pub fn new(index: Arc<dyn TimeIndex>, backend: Arc<Backend>) -> Self {
        Self { index, backend }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Identifiers of packages of `topic` within `range`, ascending
    ///
    /// An empty index result short-circuits without asking the backend.
    pub async fn resolve(
        &self,
        topic: &str,
        range: &TimeRange,
        fields: &FieldSelection,
    ) -> DriftResult<Vec<PackageId>> {
        let series = self
            .index
            .query_data(topic, range, fields)
            .await
            .map_err(|e| DriftError::ResolutionFailed(format!("time index query for {topic}: {e}")))?;

        let ids = identifiers_from_series(topic, series);
        if ids.is_empty() {
            tracing::debug!(topic = %topic, "No samples in range");
            return Ok(ids);
        }

        let computed = ids.len();
        let ids = self.backend.filter_existing(ids).await.map_err(|e| {
            DriftError::ResolutionFailed(format!("{} listing: {e}", self.backend.name()))
        })?;

        tracing::debug!(
            topic = %topic,
            backend = self.backend.name(),
            computed,
            available = ids.len(),
            "Resolved packages"
        );
        Ok(ids)
    }
}

/// One identifier per distinct millisecond timestamp across all fields
fn identifiers_from_series(topic: &str, series: FieldSeries) -> Vec<PackageId> {
    let mut timestamps: Vec<f64> = series
        .into_values()
        .flatten()
        .map(|sample| sample.timestamp)
        .collect();
    timestamps.sort_by(f64::total_cmp);

    let mut ids: Vec<PackageId> = timestamps
        .into_iter()
        .map(|ts| PackageId::from_seconds(topic, ts))
        .collect();
    ids.dedup_by_key(|id| id.timestamp_ms);
    ids
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::index::{FieldValue, IndexError, Sample};
    use crate::store::{BasicStore, Entry, IndexedStore, RecordStream, StoreError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Time index returning a fixed series
    pub(crate) struct FakeIndex {
        pub series: FieldSeries,
        pub fail: bool,
    }

    impl FakeIndex {
        pub(crate) fn with_status(timestamps: &[f64]) -> Self {
            let samples = timestamps
                .iter()
                .map(|ts| Sample::new(*ts, FieldValue::Int(0)))
                .collect();
            let mut series = FieldSeries::new();
            series.insert("status".to_string(), samples);
            Self {
                series,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl TimeIndex for FakeIndex {
        async fn query_topics(&self) -> Result<Vec<String>, IndexError> {
            Ok(self.series.keys().cloned().collect())
        }

        async fn query_data(
            &self,
            _topic: &str,
            _range: &TimeRange,
            _fields: &FieldSelection,
        ) -> Result<FieldSeries, IndexError> {
            if self.fail {
                return Err(IndexError::Parse("index down".to_string()));
            }
            Ok(self.series.clone())
        }
    }

    /// Indexed store with fixed entries and records
    pub(crate) struct FakeIndexed {
        pub entries: Vec<Entry>,
        pub records: Vec<(i64, Vec<u8>)>,
        pub fail_at: Option<usize>,
        pub listings: Arc<AtomicUsize>,
    }

    impl FakeIndexed {
        pub(crate) fn new(entries: Vec<Entry>) -> Self {
            Self {
                entries,
                records: Vec::new(),
                fail_at: None,
                listings: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl IndexedStore for FakeIndexed {
        fn name(&self) -> &str {
            "fake-indexed"
        }

        async fn probe(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn get(&self, id: &PackageId) -> Result<Vec<u8>, StoreError> {
            self.records
                .iter()
                .find(|(ts, _)| *ts == id.timestamp_ms)
                .map(|(_, body)| body.clone())
                .ok_or_else(|| StoreError::NotFound(id.to_string()))
        }

        async fn entries(&self) -> Result<Vec<Entry>, StoreError> {
            self.listings.fetch_add(1, Ordering::SeqCst);
            Ok(self.entries.clone())
        }

        async fn query(
            &self,
            _topic: &str,
            start_ms: i64,
            stop_ms: i64,
            _ttl: Duration,
        ) -> Result<Box<dyn RecordStream>, StoreError> {
            let mut records: Vec<_> = self
                .records
                .iter()
                .filter(|(ts, _)| start_ms <= *ts && *ts < stop_ms)
                .cloned()
                .collect();
            records.sort_by_key(|(ts, _)| *ts);

            Ok(Box::new(FakeStream {
                records: records.into_iter().map(|(_, body)| body).collect(),
                pos: 0,
                fail_at: self.fail_at,
            }))
        }
    }

    struct FakeStream {
        records: Vec<Vec<u8>>,
        pos: usize,
        fail_at: Option<usize>,
    }

    #[async_trait]
    impl RecordStream for FakeStream {
        async fn next_record(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
            if self.fail_at == Some(self.pos) {
                return Err(StoreError::ApiError {
                    status: 404,
                    message: "Query 1 not found, it might have expired".to_string(),
                });
            }
            let record = self.records.get(self.pos).cloned();
            self.pos += 1;
            Ok(record)
        }
    }

    /// Basic store that must never be asked about existence
    pub(crate) struct FakeBasic;

    #[async_trait]
    impl BasicStore for FakeBasic {
        fn name(&self) -> &str {
            "fake-basic"
        }

        async fn probe(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn get(&self, id: &PackageId) -> Result<Vec<u8>, StoreError> {
            Err(StoreError::NotFound(id.to_string()))
        }

        async fn put(&self, _id: &PackageId, _data: Vec<u8>) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn range() -> TimeRange {
        TimeRange::new(0.0, 100_000.0).unwrap()
    }

    fn resolver(index: FakeIndex, backend: Backend) -> Resolver {
        Resolver::new(Arc::new(index), Arc::new(backend))
    }

    fn names(ids: Vec<PackageId>) -> Vec<String> {
        ids.into_iter().map(|id| id.to_string()).collect()
    }

    #[tokio::test]
    async fn test_indexed_store_keeps_retained_packages() {
        let store = FakeIndexed::new(vec![Entry::new("acc-5", 10_000, 10_010)]);
        let resolver = resolver(
            FakeIndex::with_status(&[10.010, 10.000]),
            Backend::Indexed(Box::new(store)),
        );

        let ids = resolver
            .resolve("acc-5", &range(), &FieldSelection::default())
            .await
            .unwrap();
        assert_eq!(names(ids), vec!["acc-5/10000.dp", "acc-5/10010.dp"]);
    }

    #[tokio::test]
    async fn test_indexed_store_drops_expired_packages() {
        let store = FakeIndexed::new(vec![Entry::new("acc-5", 10_005, 10_010)]);
        let resolver = resolver(
            FakeIndex::with_status(&[10.000, 10.010]),
            Backend::Indexed(Box::new(store)),
        );

        let ids = resolver
            .resolve("acc-5", &range(), &FieldSelection::default())
            .await
            .unwrap();
        assert_eq!(names(ids), vec!["acc-5/10010.dp"]);
    }

    #[tokio::test]
    async fn test_topic_missing_from_store_is_empty() {
        let store = FakeIndexed::new(vec![Entry::new("other", 0, i64::MAX)]);
        let resolver = resolver(
            FakeIndex::with_status(&[10.0]),
            Backend::Indexed(Box::new(store)),
        );

        let ids = resolver
            .resolve("acc-5", &range(), &FieldSelection::default())
            .await
            .unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_basic_store_passes_everything() {
        let resolver = resolver(
            FakeIndex::with_status(&[10000.0, 10010.0]),
            Backend::Basic(Box::new(FakeBasic)),
        );

        let ids = resolver
            .resolve("topic", &range(), &FieldSelection::default())
            .await
            .unwrap();
        assert_eq!(names(ids), vec!["topic/10000000.dp", "topic/10010000.dp"]);
    }

    #[tokio::test]
    async fn test_empty_index_skips_backend() {
        let store = FakeIndexed::new(vec![Entry::new("acc-5", 0, i64::MAX)]);
        let listings = Arc::clone(&store.listings);
        let resolver = resolver(FakeIndex::with_status(&[]), Backend::Indexed(Box::new(store)));

        let ids = resolver
            .resolve("acc-5", &range(), &FieldSelection::default())
            .await
            .unwrap();
        assert!(ids.is_empty());
        assert_eq!(listings.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_index_failure_is_resolution_failed() {
        let mut index = FakeIndex::with_status(&[1.0]);
        index.fail = true;
        let resolver = resolver(index, Backend::Basic(Box::new(FakeBasic)));

        let result = resolver
            .resolve("acc-5", &range(), &FieldSelection::default())
            .await;
        assert!(matches!(result, Err(DriftError::ResolutionFailed(_))));
    }

    #[test]
    fn test_identifiers_merge_fields() {
        let mut series = FieldSeries::new();
        series.insert(
            "a".to_string(),
            vec![Sample::new(2.0, FieldValue::Int(1)), Sample::new(1.0, FieldValue::Int(1))],
        );
        series.insert("b".to_string(), vec![Sample::new(2.0, FieldValue::Int(3))]);

        let ids = identifiers_from_series("t", series);
        assert_eq!(names(ids), vec!["t/1000.dp", "t/2000.dp"]);
    }
}
