//! Core types for GeoFlux

use crate::{GeoFluxError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Timestamp in milliseconds since Unix epoch
pub type Timestamp = i64;

/// Dense, zero-based row identifier within one index or segment
pub type RowId = u32;

/// A single input row: timestamp, dimension values and metric inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRow {
    /// Timestamp in milliseconds
    pub timestamp: Timestamp,
    /// Dimension name to one or more string values
    #[serde(default, deserialize_with = "deserialize_dimensions")]
    pub dimensions: BTreeMap<String, Vec<String>>,
    /// Metric name to numeric input
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricValue>,
}

impl InputRow {
    /// Create an empty row at the given timestamp
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            dimensions: BTreeMap::new(),
            metrics: BTreeMap::new(),
        }
    }

    /// Add a dimension value; repeated calls for the same name add values
    pub fn with_dimension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Add a metric input
    pub fn with_metric(mut self, name: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.metrics.insert(name.into(), value.into());
        self
    }

    /// Values of one dimension, empty strings removed
    pub fn dimension_values(&self, name: &str) -> impl Iterator<Item = &str> {
        self.dimensions
            .get(name)
            .into_iter()
            .flatten()
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Get the size in bytes (approximate)
    pub fn size(&self) -> usize {
        let dims: usize = self
            .dimensions
            .iter()
            .map(|(k, vs)| k.len() + vs.iter().map(String::len).sum::<usize>())
            .sum();
        let metrics: usize = self.metrics.iter().map(|(k, v)| k.len() + v.size()).sum();
        8 + dims + metrics
    }
}

fn deserialize_dimensions<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    let raw = BTreeMap::<String, OneOrMany>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| match v {
            OneOrMany::One(s) => (k, vec![s]),
            OneOrMany::Many(vs) => (k, vs),
        })
        .collect())
}

/// Raw metric input as it arrives with a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// 64-bit signed integer
    Long(i64),
    /// 64-bit float
    Double(f64),
    /// Unparsed text, converted according to the metric's declared type
    String(String),
}

impl MetricValue {
    /// Get the size in bytes
    pub fn size(&self) -> usize {
        match self {
            MetricValue::Long(_) | MetricValue::Double(_) => 8,
            MetricValue::String(s) => s.len(),
        }
    }

    /// Convert to i64, truncating floats
    pub fn to_long(&self) -> std::result::Result<i64, String> {
        match self {
            MetricValue::Long(v) => Ok(*v),
            MetricValue::Double(v) => Ok(*v as i64),
            MetricValue::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .or_else(|_| s.parse::<f64>().map(|f| f as i64))
                    .map_err(|_| format!("not a number: {:?}", s))
            }
        }
    }

    /// Convert to f64
    pub fn to_double(&self) -> std::result::Result<f64, String> {
        match self {
            MetricValue::Long(v) => Ok(*v as f64),
            MetricValue::Double(v) => Ok(*v),
            MetricValue::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("not a number: {:?}", s)),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Long(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Double(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::String(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::String(v)
    }
}

/// Inclusive time range, used for data coverage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive)
    pub start: Timestamp,
    /// End timestamp (inclusive)
    pub end: Timestamp,
}

impl TimeRange {
    /// Create a new time range
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Check if a timestamp is within the range
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Check if two ranges overlap
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// Extend the range to cover `ts`
    pub fn extend(&mut self, ts: Timestamp) {
        self.start = self.start.min(ts);
        self.end = self.end.max(ts);
    }

    /// Smallest range covering both
    pub fn union(&self, other: &TimeRange) -> TimeRange {
        TimeRange::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// Half-open query interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval {
    /// Start timestamp (inclusive)
    pub start: Timestamp,
    /// End timestamp (exclusive)
    pub end: Timestamp,
}

impl Interval {
    /// Create a new interval
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Interval covering all representable time
    pub fn eternity() -> Self {
        Self::new(Timestamp::MIN, Timestamp::MAX)
    }

    /// Check if a timestamp is within the interval
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Check if the interval intersects an inclusive range
    pub fn overlaps(&self, range: &TimeRange) -> bool {
        self.start <= range.end && self.end > range.start
    }

    /// Parse an ISO-8601 `start/end` interval
    pub fn parse(s: &str) -> Result<Self> {
        let (start, end) = s
            .split_once('/')
            .ok_or_else(|| GeoFluxError::InvalidFormat(format!("Invalid interval: {}", s)))?;
        let interval = Self::new(parse_timestamp(start)?, parse_timestamp(end)?);
        if interval.start > interval.end {
            return Err(GeoFluxError::InvalidFormat(format!(
                "Interval start after end: {}",
                s
            )));
        }
        Ok(interval)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            format_timestamp(self.start),
            format_timestamp(self.end)
        )
    }
}

impl TryFrom<String> for Interval {
    type Error = GeoFluxError;

    fn try_from(value: String) -> Result<Self> {
        Interval::parse(&value)
    }
}

impl From<Interval> for String {
    fn from(value: Interval) -> Self {
        value.to_string()
    }
}

/// Parse an ISO-8601 date or date-time (UTC unless an offset is given) into millis
pub fn parse_timestamp(s: &str) -> Result<Timestamp> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }
    Err(GeoFluxError::InvalidFormat(format!("Invalid timestamp: {}", s)))
}

/// Format millis as an RFC 3339 UTC string; out-of-range values print as raw millis
pub fn format_timestamp(ts: Timestamp) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ts) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => ts.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range() {
        let range1 = TimeRange::new(100, 200);
        let range2 = TimeRange::new(150, 250);
        let range3 = TimeRange::new(300, 400);

        assert!(range1.overlaps(&range2));
        assert!(!range1.overlaps(&range3));
        assert!(range1.contains(150));
        assert!(!range1.contains(250));
        assert_eq!(range1.union(&range3), TimeRange::new(100, 400));
    }

    #[test]
    fn test_interval_parse_and_display() {
        let interval = Interval::parse("2013-01-01/2013-01-07").unwrap();
        assert_eq!(interval.start, 1_356_998_400_000);
        assert_eq!(interval.end - interval.start, 6 * 86_400_000);
        assert!(interval.contains(interval.start));
        assert!(!interval.contains(interval.end));
        assert_eq!(
            interval.to_string(),
            "2013-01-01T00:00:00.000Z/2013-01-07T00:00:00.000Z"
        );

        let json = serde_json::to_string(&interval).unwrap();
        let back: Interval = serde_json::from_str(&json).unwrap();
        assert_eq!(back, interval);

        assert!(Interval::parse("2013-01-07/2013-01-01").is_err());
        assert!(Interval::parse("yesterday").is_err());
    }

    #[test]
    fn test_interval_overlaps_range() {
        let interval = Interval::new(100, 200);
        assert!(interval.overlaps(&TimeRange::new(199, 300)));
        assert!(!interval.overlaps(&TimeRange::new(200, 300)));
        assert!(interval.overlaps(&TimeRange::new(0, 100)));
    }

    #[test]
    fn test_metric_value_conversion() {
        assert_eq!(MetricValue::Long(42).to_double(), Ok(42.0));
        assert_eq!(MetricValue::Double(3.9).to_long(), Ok(3));
        assert_eq!(MetricValue::from("17").to_long(), Ok(17));
        assert_eq!(MetricValue::from(" 2.5 ").to_double(), Ok(2.5));
        assert!(MetricValue::from("n/a").to_long().is_err());
    }

    #[test]
    fn test_input_row_json() {
        let json = r#"{
            "timestamp": 1356998400000,
            "dimensions": {"dim": "foo", "tags": ["a", "b", ""]},
            "metrics": {"val": 17, "ratio": 0.5}
        }"#;
        let row: InputRow = serde_json::from_str(json).unwrap();
        assert_eq!(row.dimension_values("dim").collect::<Vec<_>>(), vec!["foo"]);
        assert_eq!(row.dimension_values("tags").collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(row.metrics.get("val"), Some(&MetricValue::Long(17)));
        assert_eq!(row.metrics.get("ratio"), Some(&MetricValue::Double(0.5)));
    }
}
