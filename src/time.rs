//! Time normalization
//!
//! Callers may pass epoch seconds, ISO-8601 strings or structured date/time
//! values. Everything is normalized to a UTC instant and rendered in the wire
//! format the time index expects (`YYYY-MM-DDTHH:MM:SSZ`).

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::{DriftError, DriftResult};

/// Wire format sent to the time index (UTC, second resolution)
pub const WIRE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Naive layouts accepted for strings without an offset (taken as UTC)
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A point in time in any of the accepted input forms
#[derive(Debug, Clone, PartialEq)]
pub enum TimeInput {
    /// Seconds since the Unix epoch
    Epoch(f64),
    /// ISO-8601 string, with or without offset
    Iso(String),
    /// Structured date/time
    DateTime(DateTime<Utc>),
}

impl TimeInput {
    /// Normalize to a UTC instant
    pub fn to_utc(&self) -> DriftResult<DateTime<Utc>> {
        match self {
            TimeInput::Epoch(secs) => from_epoch_seconds(*secs),
            TimeInput::Iso(text) => parse_iso(text),
            TimeInput::DateTime(dt) => Ok(*dt),
        }
    }

    /// Normalize and render in wire format
    pub fn to_wire(&self) -> DriftResult<String> {
        Ok(to_wire(&self.to_utc()?))
    }
}

impl From<f64> for TimeInput {
    fn from(secs: f64) -> Self {
        TimeInput::Epoch(secs)
    }
}

impl From<i64> for TimeInput {
    fn from(secs: i64) -> Self {
        TimeInput::Epoch(secs as f64)
    }
}

impl From<&str> for TimeInput {
    fn from(text: &str) -> Self {
        TimeInput::Iso(text.to_string())
    }
}

impl From<String> for TimeInput {
    fn from(text: String) -> Self {
        TimeInput::Iso(text)
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for TimeInput {
    fn from(dt: DateTime<Tz>) -> Self {
        TimeInput::DateTime(dt.with_timezone(&Utc))
    }
}

impl From<NaiveDateTime> for TimeInput {
    fn from(dt: NaiveDateTime) -> Self {
        TimeInput::DateTime(Utc.from_utc_datetime(&dt))
    }
}

/// Render a UTC instant in wire format
pub fn to_wire(dt: &DateTime<Utc>) -> String {
    dt.format(WIRE_FORMAT).to_string()
}

/// Convert an instant to fractional epoch seconds
pub fn to_epoch_seconds(dt: &DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) / 1e9
}

fn from_epoch_seconds(secs: f64) -> DriftResult<DateTime<Utc>> {
    if !secs.is_finite() {
        return Err(DriftError::InvalidTime(format!("{secs} is not a finite timestamp")));
    }

    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    let (whole, nanos) = if nanos >= 1_000_000_000 {
        (whole + 1.0, 0)
    } else {
        (whole, nanos)
    };

    DateTime::from_timestamp(whole as i64, nanos)
        .ok_or_else(|| DriftError::InvalidTime(format!("{secs} is out of range")))
}

fn parse_iso(text: &str) -> DriftResult<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    // RFC 3339 with a space separator, as produced by `isoformat(" ")`
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&dt));
        }
    }

    Err(DriftError::InvalidTime(format!("unrecognized time '{text}'")))
}

/// A normalized `[start, stop)` window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

impl TimeRange {
    /// Normalize both bounds; fails if `start` is after `stop`
    pub fn new(start: impl Into<TimeInput>, stop: impl Into<TimeInput>) -> DriftResult<Self> {
        let start = start.into().to_utc()?;
        let stop = stop.into().to_utc()?;

        if start > stop {
            return Err(DriftError::InvalidTimeRange);
        }

        Ok(Self { start, stop })
    }

    /// Start bound in wire format
    pub fn wire_start(&self) -> String {
        to_wire(&self.start)
    }

    /// Stop bound in wire format
    pub fn wire_stop(&self) -> String {
        to_wire(&self.stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_forms_normalize_identically() {
        let offset = FixedOffset::east_opt(3600).unwrap();
        let structured = offset.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();

        let from_struct = TimeInput::from(structured).to_wire().unwrap();
        let from_iso = TimeInput::from("2022-01-01T00:00:00+01:00").to_wire().unwrap();
        let from_epoch = TimeInput::from(1640991600.0).to_wire().unwrap();

        assert_eq!(from_struct, "2021-12-31T23:00:00Z");
        assert_eq!(from_iso, from_struct);
        assert_eq!(from_epoch, from_struct);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let wire = TimeInput::from("2023-06-16 10:00").to_wire().unwrap();
        assert_eq!(wire, "2023-06-16T10:00:00Z");
        assert_eq!(TimeInput::from(wire.as_str()).to_wire().unwrap(), wire);
    }

    #[test]
    fn test_accepted_string_forms() {
        let cases = [
            ("2022-02-03 10:00:00", "2022-02-03T10:00:00Z"),
            ("2022-02-03T10:00:00.750", "2022-02-03T10:00:00Z"),
            ("2022-02-03T10:00:00Z", "2022-02-03T10:00:00Z"),
            ("2022-02-03 12:00:00+02:00", "2022-02-03T10:00:00Z"),
            ("2022-02-03", "2022-02-03T00:00:00Z"),
        ];
        for (input, expected) in cases {
            assert_eq!(TimeInput::from(input).to_wire().unwrap(), expected, "{input}");
        }
    }

    #[test]
    fn test_epoch_fraction_truncated_on_wire() {
        let dt = TimeInput::from(10.999).to_utc().unwrap();
        assert_eq!(dt.timestamp_subsec_millis(), 999);
        assert_eq!(to_wire(&dt), "1970-01-01T00:00:10Z");
        assert!((to_epoch_seconds(&dt) - 10.999).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        assert!(matches!(
            TimeInput::from(f64::NAN).to_utc(),
            Err(DriftError::InvalidTime(_))
        ));
        assert!(matches!(
            TimeInput::from("yesterday").to_utc(),
            Err(DriftError::InvalidTime(_))
        ));
    }

    #[test]
    fn test_range_rejects_reversed_bounds() {
        let range = TimeRange::new(100.0, 200.0).unwrap();
        assert_eq!(range.wire_start(), "1970-01-01T00:01:40Z");
        assert_eq!(range.wire_stop(), "1970-01-01T00:03:20Z");

        assert!(TimeRange::new(10.0, 10.0).is_ok());
        assert!(matches!(
            TimeRange::new(200.0, 100.0),
            Err(DriftError::InvalidTimeRange)
        ));
    }
}
