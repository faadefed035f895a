//! Historical walks
//!
//! A [`Walker`] turns a streaming backend query into a lazy, synchronous
//! iterator. Nothing is fetched until the caller pulls; each pull blocks on the
//! client's [`Executor`] for exactly one record.

use std::iter::FusedIterator;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{DriftError, DriftResult};
use crate::executor::Executor;
use crate::store::{Backend, RecordStream};
use crate::time::TimeRange;

/// Lazy iterator over the package bodies of one topic in a time range
///
/// Records come back in ascending timestamp order. After the last record, or
/// after the first failure, the walker yields `None` forever.
pub struct Walker {
    executor: Arc<Executor>,
    topic: String,
    stream: Option<Box<dyn RecordStream>>,
    pulled: usize,
}

impl Walker {
    /// Open a query on the backend
    ///
    /// Only indexed stores can stream a range; a basic store fails here with
    /// [`DriftError::WalkFailed`].
    pub fn open(
        executor: Arc<Executor>,
        backend: Arc<Backend>,
        topic: impl Into<String>,
        range: &TimeRange,
        ttl: Duration,
    ) -> DriftResult<Self> {
        let topic = topic.into();
        let start_ms = range.start.timestamp_millis();
        let stop_ms = range.stop.timestamp_millis();

        let query_topic = topic.clone();
        let stream = executor.run(async move {
            backend
                .query(&query_topic, start_ms, stop_ms, ttl)
                .await
                .map_err(|e| DriftError::WalkFailed(format!("opening query on {query_topic}: {e}")))
        })?;

        tracing::debug!(topic = %topic, start_ms, stop_ms, ttl_secs = ttl.as_secs(), "Walk started");
        Ok(Self {
            executor,
            topic,
            stream: Some(stream),
            pulled: 0,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Iterator for Walker {
    type Item = DriftResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        // The stream moves into the task and comes back with its record.
        let mut stream = self.stream.take()?;

        let pulled = self.executor.run(async move {
            let record = stream.next_record().await;
            Ok((stream, record))
        });

        match pulled {
            Ok((stream, Ok(Some(record)))) => {
                self.stream = Some(stream);
                self.pulled += 1;
                Some(Ok(record))
            }
            Ok((_, Ok(None))) => {
                tracing::debug!(topic = %self.topic, records = self.pulled, "Walk finished");
                None
            }
            Ok((_, Err(e))) => {
                tracing::warn!(topic = %self.topic, records = self.pulled, error = %e, "Walk aborted");
                Some(Err(DriftError::WalkFailed(format!(
                    "{} after {} records: {e}",
                    self.topic, self.pulled
                ))))
            }
            Err(e) => Some(Err(DriftError::WalkFailed(e.to_string()))),
        }
    }
}

impl FusedIterator for Walker {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::tests::{FakeBasic, FakeIndexed};

    fn walker(store: FakeIndexed, start: f64, stop: f64) -> DriftResult<Walker> {
        Walker::open(
            Arc::new(Executor::new(1).unwrap()),
            Arc::new(Backend::Indexed(Box::new(store))),
            "acc-5",
            &TimeRange::new(start, stop).unwrap(),
            Duration::from_secs(5),
        )
    }

    fn store(timestamps: &[i64]) -> FakeIndexed {
        let mut store = FakeIndexed::new(Vec::new());
        store.records = timestamps
            .iter()
            .map(|ts| (*ts, ts.to_string().into_bytes()))
            .collect();
        store
    }

    #[test]
    fn test_yields_records_in_order_then_ends() {
        let mut walker = walker(store(&[3000, 1000, 2000, 9000]), 0.0, 5.0).unwrap();

        let records: Vec<_> = walker.by_ref().map(|r| r.unwrap()).collect();
        assert_eq!(records, vec![b"1000".to_vec(), b"2000".to_vec(), b"3000".to_vec()]);
        assert!(walker.next().is_none());
        assert!(walker.next().is_none());
    }

    #[test]
    fn test_empty_range() {
        let mut walker = walker(store(&[1000]), 10.0, 20.0).unwrap();
        assert!(walker.next().is_none());
    }

    #[test]
    fn test_mid_stream_error_ends_walk() {
        let mut store = store(&[1000, 2000, 3000]);
        store.fail_at = Some(1);
        let mut walker = walker(store, 0.0, 5.0).unwrap();

        assert_eq!(walker.next().unwrap().unwrap(), b"1000".to_vec());
        assert!(matches!(walker.next(), Some(Err(DriftError::WalkFailed(_)))));
        assert!(walker.next().is_none());
    }

    #[test]
    fn test_basic_store_cannot_walk() {
        let result = Walker::open(
            Arc::new(Executor::new(1).unwrap()),
            Arc::new(Backend::Basic(Box::new(FakeBasic))),
            "acc-5",
            &TimeRange::new(0.0, 1.0).unwrap(),
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(DriftError::WalkFailed(_))));
    }
}
