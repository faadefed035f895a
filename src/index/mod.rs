//! Time Index
//!
//! The time index records *when* a topic produced packages and which metric
//! values it reported. The client only needs two questions answered:
//!
//! - which topics exist
//! - the `(timestamp, value)` series of some fields of a topic in a window
//!
//! [`InfluxIndex`] answers them over the InfluxDB v2 HTTP API.

mod influx;
mod metrics;

pub use influx::{InfluxConfig, InfluxIndex};
pub use metrics::{pivot_series, MetricRecord};

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::time::TimeRange;

/// Field queried when resolving packages
pub const STATUS_FIELD: &str = "status";

/// A value reported for a field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl FieldValue {
    /// Parse a textual value, preferring the narrowest type
    pub fn parse(text: &str) -> Self {
        if let Ok(v) = text.parse::<i64>() {
            FieldValue::Int(v)
        } else if let Ok(v) = text.parse::<f64>() {
            FieldValue::Float(v)
        } else if let Ok(v) = text.parse::<bool>() {
            FieldValue::Bool(v)
        } else {
            FieldValue::Text(text.to_string())
        }
    }
}

/// One sample of a field
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Epoch seconds
    pub timestamp: f64,
    pub value: FieldValue,
}

impl Sample {
    pub fn new(timestamp: f64, value: FieldValue) -> Self {
        Self { timestamp, value }
    }
}

/// Samples per field name, each series ordered by time
pub type FieldSeries = BTreeMap<String, Vec<Sample>>;

/// Which fields to request from the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSelection {
    All,
    Only(Vec<String>),
}

impl FieldSelection {
    pub fn single(field: impl Into<String>) -> Self {
        FieldSelection::Only(vec![field.into()])
    }

    /// `None` selects every field
    pub fn from_names(names: Option<Vec<String>>) -> Self {
        match names {
            Some(names) => FieldSelection::Only(names),
            None => FieldSelection::All,
        }
    }
}

impl Default for FieldSelection {
    fn default() -> Self {
        FieldSelection::single(STATUS_FIELD)
    }
}

/// Source of per-topic field series
#[async_trait]
pub trait TimeIndex: Send + Sync {
    /// Names of all topics known to the index
    async fn query_topics(&self) -> Result<Vec<String>, IndexError>;

    /// Field series of `topic` within `range`
    async fn query_data(
        &self,
        topic: &str,
        range: &TimeRange,
        fields: &FieldSelection,
    ) -> Result<FieldSeries, IndexError>;
}

/// Errors returned by a time index
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_parse() {
        assert_eq!(FieldValue::parse("512"), FieldValue::Int(512));
        assert_eq!(FieldValue::parse("0.25"), FieldValue::Float(0.25));
        assert_eq!(FieldValue::parse("true"), FieldValue::Bool(true));
        assert_eq!(FieldValue::parse("str"), FieldValue::Text("str".to_string()));
    }

    #[test]
    fn test_default_selection_is_status() {
        assert_eq!(
            FieldSelection::default(),
            FieldSelection::Only(vec!["status".to_string()])
        );
        assert_eq!(FieldSelection::from_names(None), FieldSelection::All);
    }
}
