//! Timeseries queries
//!
//! A query selects rows by time interval and an optional filter, groups them
//! into time buckets and runs a list of aggregators over each bucket.

mod aggregates;
mod engine;
mod granularity;

pub use aggregates::{Accumulator, AggregatorSpec};
pub use engine::{QueryStage, TimeseriesEngine};
pub use granularity::Granularity;

use crate::filter::Filter;
use crate::{GeoFluxError, Interval, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

fn default_query_type() -> String {
    "timeseries".to_string()
}

/// Timeseries query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeseriesQuery {
    #[serde(default = "default_query_type")]
    pub query_type: String,
    pub data_source: String,
    pub intervals: Vec<Interval>,
    #[serde(default)]
    pub granularity: Granularity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub aggregations: Vec<AggregatorSpec>,
}

impl TimeseriesQuery {
    /// Query over `data_source` with no intervals, `all` granularity and no aggregators
    pub fn new(data_source: impl Into<String>) -> Self {
        Self {
            query_type: default_query_type(),
            data_source: data_source.into(),
            intervals: Vec::new(),
            granularity: Granularity::All,
            filter: None,
            aggregations: Vec::new(),
        }
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.intervals.push(interval);
        self
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_aggregator(mut self, aggregator: AggregatorSpec) -> Self {
        self.aggregations.push(aggregator);
        self
    }

    /// Structural checks that do not need any segment
    pub fn validate(&self) -> Result<()> {
        if self.query_type != "timeseries" {
            return Err(GeoFluxError::InvalidQuery(format!(
                "Unsupported query type: {}",
                self.query_type
            )));
        }
        if self.intervals.is_empty() {
            return Err(GeoFluxError::InvalidQuery("Query has no intervals".into()));
        }
        let mut names = HashSet::new();
        for spec in &self.aggregations {
            if spec.name().is_empty() {
                return Err(GeoFluxError::InvalidQuery("Aggregator without a name".into()));
            }
            if !names.insert(spec.name()) {
                return Err(GeoFluxError::InvalidQuery(format!(
                    "Duplicate aggregator name: {}",
                    spec.name()
                )));
            }
        }
        Ok(())
    }

    /// Earliest interval start, used to stamp the `all` bucket
    pub fn origin(&self) -> Timestamp {
        self.intervals.iter().map(|i| i.start).min().unwrap_or(0)
    }

    /// Check if `ts` falls in any interval
    pub fn covers(&self, ts: Timestamp) -> bool {
        self.intervals.iter().any(|i| i.contains(ts))
    }
}

/// Finalized aggregator output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    Null,
    Long(i64),
    Double(f64),
}

impl QueryValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            QueryValue::Long(v) => Some(*v),
            QueryValue::Double(v) => Some(*v as i64),
            QueryValue::Null => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            QueryValue::Long(v) => Some(*v as f64),
            QueryValue::Double(v) => Some(*v),
            QueryValue::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, QueryValue::Null)
    }
}

/// One populated time bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub timestamp: Timestamp,
    pub result: BTreeMap<String, QueryValue>,
}

impl ResultRow {
    /// Value of aggregator `name`
    pub fn get(&self, name: &str) -> Option<&QueryValue> {
        self.result.get(name)
    }
}

/// Query result, buckets in ascending timestamp order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryResult {
    pub rows: Vec<ResultRow>,
}

impl QueryResult {
    /// Finalized values are already in output form
    pub fn finalize(self) -> Self {
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
