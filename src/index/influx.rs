//! InfluxDB v2 time index
//!
//! Queries are sent as Flux scripts to `/api/v2/query`; results come back as
//! CSV with one header row per result table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;

use super::{FieldSelection, FieldSeries, FieldValue, IndexError, Sample, TimeIndex};
use crate::time::{to_epoch_seconds, TimeRange};

/// Configuration for the InfluxDB client
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    /// Base URL (e.g., "http://localhost:8086")
    pub url: String,
    /// Organisation owning the bucket
    pub org: String,
    /// API token
    pub token: String,
    /// Bucket holding the topic measurements
    pub bucket: String,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            org: "panda".to_string(),
            token: String::new(),
            bucket: "data".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

/// Time index backed by InfluxDB
pub struct InfluxIndex {
    client: Client,
    config: InfluxConfig,
}

impl InfluxIndex {
    /// Create a new client with the given configuration
    pub fn new(config: InfluxConfig) -> Result<Self, IndexError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &InfluxConfig {
        &self.config
    }

    /// Flux script listing all measurements of the bucket
    fn measurements_query(&self) -> String {
        format!(
            "import \"influxdata/influxdb/schema\"\n\nschema.measurements(bucket: \"{}\")",
            escape_flux(&self.config.bucket)
        )
    }

    /// Flux script selecting fields of one measurement
    fn data_query(&self, topic: &str, start: &str, stop: &str, fields: &FieldSelection) -> String {
        let field_filter = match fields {
            FieldSelection::Only(names) if !names.is_empty() => {
                let clauses: Vec<String> = names
                    .iter()
                    .map(|name| format!("r._field == \"{}\"", escape_flux(name)))
                    .collect();
                format!("and ( {})", clauses.join(" or "))
            }
            _ => String::new(),
        };

        format!(
            "from(bucket:\"{}\") |> range(start:{}, stop: {}) |> filter(fn: (r) => r._measurement == \"{}\" {})",
            escape_flux(&self.config.bucket),
            start,
            stop,
            escape_flux(topic),
            field_filter
        )
    }

    async fn run_query(&self, flux: String) -> Result<String, IndexError> {
        let url = format!(
            "{}/api/v2/query?org={}",
            self.config.url.trim_end_matches('/'),
            urlencoding::encode(&self.config.org)
        );

        tracing::debug!(query = %flux, "Querying time index");

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Token {}", self.config.token))
            .header(CONTENT_TYPE, "application/vnd.flux")
            .header(ACCEPT, "application/csv")
            .body(flux)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response.text().await?)
        } else {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Err(IndexError::ApiError {
                status: status.as_u16(),
                message: text,
            })
        }
    }
}

#[async_trait]
impl TimeIndex for InfluxIndex {
    async fn query_topics(&self) -> Result<Vec<String>, IndexError> {
        let body = self.run_query(self.measurements_query()).await?;
        let rows = parse_csv_tables(&body)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.value)
            .collect())
    }

    async fn query_data(
        &self,
        topic: &str,
        range: &TimeRange,
        fields: &FieldSelection,
    ) -> Result<FieldSeries, IndexError> {
        let flux = self.data_query(topic, &range.wire_start(), &range.wire_stop(), fields);
        let body = self.run_query(flux).await?;
        collect_series(parse_csv_tables(&body)?)
    }
}

/// Escape a value for use inside a double-quoted Flux string literal
fn escape_flux(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Columns of interest from one CSV data row
#[derive(Debug, Default)]
struct CsvRow {
    time: Option<String>,
    value: Option<String>,
    field: Option<String>,
}

/// Parse the CSV body of a query; each table starts with its own header row
fn parse_csv_tables(body: &str) -> Result<Vec<CsvRow>, IndexError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(body.as_bytes());

    let mut header: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    for record in reader.records() {
        let record = record.map_err(|e| IndexError::Parse(e.to_string()))?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            header = None;
            continue;
        }

        if record.iter().any(|cell| cell == "_value") {
            header = Some(record.iter().map(str::to_string).collect());
            continue;
        }

        let Some(columns) = header.as_ref() else {
            return Err(IndexError::Parse("data row before header".to_string()));
        };

        let mut row = CsvRow::default();
        for (name, cell) in columns.iter().zip(record.iter()) {
            match name.as_str() {
                "_time" => row.time = Some(cell.to_string()),
                "_value" => row.value = Some(cell.to_string()),
                "_field" => row.field = Some(cell.to_string()),
                _ => {}
            }
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Group rows into per-field series ordered by time
fn collect_series(rows: Vec<CsvRow>) -> Result<FieldSeries, IndexError> {
    let mut series = FieldSeries::new();

    for row in rows {
        let (Some(time), Some(value), Some(field)) = (row.time, row.value, row.field) else {
            continue;
        };
        let time = DateTime::parse_from_rfc3339(&time)
            .map_err(|e| IndexError::Parse(format!("bad _time '{time}': {e}")))?;

        series.entry(field).or_default().push(Sample::new(
            to_epoch_seconds(&time.with_timezone(&Utc)),
            FieldValue::parse(&value),
        ));
    }

    for samples in series.values_mut() {
        samples.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    }

    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> InfluxIndex {
        InfluxIndex::new(InfluxConfig::default()).unwrap()
    }

    #[test]
    fn test_query_for_one_field() {
        let flux = index().data_query("topic", "1000", "2000", &FieldSelection::single("field"));
        assert_eq!(
            flux,
            "from(bucket:\"data\") |> range(start:1000, stop: 2000) |> \
             filter(fn: (r) => r._measurement == \"topic\" and ( r._field == \"field\"))"
        );
    }

    #[test]
    fn test_query_for_some_fields() {
        let fields = FieldSelection::Only(vec!["field_1".to_string(), "field_2".to_string()]);
        let flux = index().data_query("topic", "1000", "2000", &fields);
        assert_eq!(
            flux,
            "from(bucket:\"data\") |> range(start:1000, stop: 2000) |> \
             filter(fn: (r) => r._measurement == \"topic\" and ( r._field == \"field_1\" or \
             r._field == \"field_2\"))"
        );
    }

    #[test]
    fn test_query_for_all_fields() {
        let flux = index().data_query("topic", "1000", "2000", &FieldSelection::All);
        assert_eq!(
            flux,
            "from(bucket:\"data\") |> range(start:1000, stop: 2000) |> \
             filter(fn: (r) => r._measurement == \"topic\" )"
        );
    }

    #[test]
    fn test_query_escapes_names() {
        let fields = FieldSelection::single(r#"a"b"#);
        let flux = index().data_query(r##"x") or true or (""##, "1000", "2000", &fields);
        assert_eq!(
            flux,
            concat!(
                r#"from(bucket:"data") |> range(start:1000, stop: 2000) |> "#,
                r#"filter(fn: (r) => r._measurement == "x\") or true or (\"" and ( r._field == "a\"b"))"#
            )
        );
        assert_eq!(escape_flux(r"${x}\"), r"\${x}\\");
    }

    #[test]
    fn test_measurements_query() {
        assert!(index()
            .measurements_query()
            .ends_with("schema.measurements(bucket: \"data\")"));
    }

    #[test]
    fn test_parse_multiple_tables() {
        let body = "\
,result,table,_start,_stop,_time,_value,_field,_measurement\r
,_result,0,2022-01-01T00:00:00Z,2022-01-02T00:00:00Z,2022-01-01T00:00:10.010Z,512,status,acc-5\r
,_result,0,2022-01-01T00:00:00Z,2022-01-02T00:00:00Z,2022-01-01T00:00:10Z,0,status,acc-5\r
\r
,result,table,_start,_stop,_time,_value,_field,_measurement\r
,_result,1,2022-01-01T00:00:00Z,2022-01-02T00:00:00Z,2022-01-01T00:00:10Z,str,label,acc-5\r
";
        let series = collect_series(parse_csv_tables(body).unwrap()).unwrap();

        let status = &series["status"];
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].timestamp, 1640995210.0);
        assert_eq!(status[0].value, FieldValue::Int(0));
        assert!((status[1].timestamp - 1640995210.010).abs() < 1e-6);
        assert_eq!(status[1].value, FieldValue::Int(512));

        assert_eq!(series["label"][0].value, FieldValue::Text("str".to_string()));
    }

    #[test]
    fn test_parse_measurements() {
        let body = ",result,table,_value\r\n,_result,0,acc-5\r\n,_result,0,acc-6\r\n";
        let rows = parse_csv_tables(body).unwrap();
        let topics: Vec<_> = rows.into_iter().filter_map(|r| r.value).collect();
        assert_eq!(topics, vec!["acc-5", "acc-6"]);
    }

    #[test]
    fn test_empty_body() {
        assert!(collect_series(parse_csv_tables("").unwrap()).unwrap().is_empty());
    }
}
