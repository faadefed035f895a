//! Metrics aggregation
//!
//! Pivots per-field series into one record per timestamp.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use super::{FieldSeries, FieldValue};

/// All field values reported at one timestamp
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    /// Epoch seconds
    pub time: f64,
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl MetricRecord {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }
}

/// Key holding the record timestamp
const TIME_KEY: &str = "time";

/// Merge series so that fields sharing an exact timestamp land in one record
///
/// Records are ordered by time. A timestamp where only some fields reported
/// yields a record with only those fields set. A field named `time` would
/// shadow the timestamp and is dropped.
pub fn pivot_series(series: FieldSeries) -> Vec<MetricRecord> {
    let mut positions: HashMap<u64, usize> = HashMap::new();
    let mut records: Vec<MetricRecord> = Vec::new();

    for (field, samples) in series {
        if field == TIME_KEY {
            tracing::warn!(field = TIME_KEY, samples = samples.len(), "Dropping field that shadows the timestamp");
            continue;
        }
        for sample in samples {
            let idx = *positions.entry(sample.timestamp.to_bits()).or_insert_with(|| {
                records.push(MetricRecord {
                    time: sample.timestamp,
                    fields: BTreeMap::new(),
                });
                records.len() - 1
            });
            records[idx].fields.insert(field.clone(), sample.value);
        }
    }

    records.sort_by(|a, b| a.time.total_cmp(&b.time));
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Sample;

    fn series(entries: Vec<(&str, Vec<(f64, i64)>)>) -> FieldSeries {
        entries
            .into_iter()
            .map(|(field, samples)| {
                let samples = samples
                    .into_iter()
                    .map(|(ts, v)| Sample::new(ts, FieldValue::Int(v)))
                    .collect();
                (field.to_string(), samples)
            })
            .collect()
    }

    #[test]
    fn test_pivot_merges_equal_timestamps() {
        let records = pivot_series(series(vec![
            ("field_1", vec![(10000.0, 1), (10010.0, 2)]),
            ("field_2", vec![(10000.0, 3), (10010.0, 4)]),
        ]));

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].time, 10000.0);
        assert_eq!(records[0].get("field_1"), Some(&FieldValue::Int(1)));
        assert_eq!(records[0].get("field_2"), Some(&FieldValue::Int(3)));
        assert_eq!(records[1].time, 10010.0);
        assert_eq!(records[1].get("field_2"), Some(&FieldValue::Int(4)));
    }

    #[test]
    fn test_partial_timestamps_and_order() {
        let records = pivot_series(series(vec![
            ("a", vec![(20.0, 1)]),
            ("b", vec![(5.0, 2), (20.0, 3)]),
        ]));

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].time, 5.0);
        assert_eq!(records[0].fields.len(), 1);
        assert_eq!(records[0].get("b"), Some(&FieldValue::Int(2)));
        assert_eq!(records[1].fields.len(), 2);
    }

    #[test]
    fn test_field_named_time_is_dropped() {
        let records = pivot_series(series(vec![("time", vec![(1.5, 7)]), ("status", vec![(1.5, 0)])]));

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("time"), None);
        let json = serde_json::to_string(&records[0]).unwrap();
        assert_eq!(json.matches("\"time\"").count(), 1);
    }

    #[test]
    fn test_record_serializes_flat() {
        let records = pivot_series(series(vec![("status", vec![(1.5, 0)])]));
        let json = serde_json::to_value(&records[0]).unwrap();
        assert_eq!(json, serde_json::json!({"time": 1.5, "status": 0}));
    }
}
