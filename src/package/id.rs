//! Package identifiers
//!
//! A package is addressed in blob storage as `{topic}/{timestamp_ms}.dp`.

use std::fmt;
use std::str::FromStr;

use crate::error::DriftError;

const SUFFIX: &str = ".dp";

/// Canonical address of one package
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId {
    /// Topic that produced the package
    pub topic: String,
    /// Unix timestamp in milliseconds
    pub timestamp_ms: i64,
}

impl PackageId {
    pub fn new(topic: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            topic: topic.into(),
            timestamp_ms,
        }
    }

    /// Build an identifier from a time index sample (epoch seconds)
    pub fn from_seconds(topic: impl Into<String>, timestamp: f64) -> Self {
        Self::new(topic, (timestamp * 1000.0).round() as i64)
    }

    /// Timestamp in microseconds, as used by stores with µs resolution
    ///
    /// `None` when the millisecond timestamp does not fit.
    pub fn timestamp_us(&self) -> Option<i64> {
        self.timestamp_ms.checked_mul(1000)
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}{}", self.topic, self.timestamp_ms, SUFFIX)
    }
}

impl FromStr for PackageId {
    type Err = DriftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DriftError::InvalidPackageId(s.to_string());

        let (topic, file) = s.split_once('/').ok_or_else(invalid)?;
        if topic.is_empty() || file.contains('/') {
            return Err(invalid());
        }

        let timestamp = file.strip_suffix(SUFFIX).ok_or_else(invalid)?;
        let timestamp_ms = timestamp.parse::<i64>().map_err(|_| invalid())?;

        Ok(Self::new(topic, timestamp_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_and_parse_are_inverse() {
        for (topic, ts) in [("acc-5", 10_000), ("topic", 1_644_750_600_291), ("x", 0)] {
            let id = PackageId::new(topic, ts);
            let parsed: PackageId = id.to_string().parse().unwrap();
            assert_eq!(parsed, id);
            assert_eq!(parsed.topic, topic);
            assert_eq!(parsed.timestamp_ms, ts);
        }
    }

    #[test]
    fn test_format() {
        assert_eq!(PackageId::new("acc-5", 10_010).to_string(), "acc-5/10010.dp");
    }

    #[test]
    fn test_from_seconds_rounds() {
        assert_eq!(PackageId::from_seconds("t", 10.010).timestamp_ms, 10_010);
        assert_eq!(PackageId::from_seconds("t", 10000.0).timestamp_ms, 10_000_000);
        assert_eq!(PackageId::from_seconds("t", 1.0004).timestamp_ms, 1_000);
    }

    #[test]
    fn test_timestamp_us_overflow() {
        assert_eq!(PackageId::new("t", 10_010).timestamp_us(), Some(10_010_000));
        let id: PackageId = "acc-5/9223372036854775807.dp".parse().unwrap();
        assert_eq!(id.timestamp_us(), None);
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "topic", "/1.dp", "a/b/1.dp", "topic/1.bin", "topic/abc.dp", "topic/.dp"] {
            assert!(
                matches!(bad.parse::<PackageId>(), Err(DriftError::InvalidPackageId(_))),
                "{bad}"
            );
        }
    }
}
