//! Aggregator specifications and accumulators

use super::QueryValue;
use crate::filter::Filter;
use crate::segment::MetricColumn;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

/// Aggregator as it appears in a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AggregatorSpec {
    /// Number of rows
    Count { name: String },
    #[serde(rename_all = "camelCase")]
    LongSum { name: String, field_name: String },
    #[serde(rename_all = "camelCase")]
    DoubleSum { name: String, field_name: String },
    #[serde(rename_all = "camelCase")]
    LongMin { name: String, field_name: String },
    #[serde(rename_all = "camelCase")]
    LongMax { name: String, field_name: String },
    #[serde(rename_all = "camelCase")]
    DoubleMin { name: String, field_name: String },
    #[serde(rename_all = "camelCase")]
    DoubleMax { name: String, field_name: String },
    /// Inner aggregator restricted to rows matching `filter`
    Filtered {
        filter: Filter,
        aggregator: Box<AggregatorSpec>,
    },
}

impl AggregatorSpec {
    pub fn count(name: impl Into<String>) -> Self {
        AggregatorSpec::Count { name: name.into() }
    }

    pub fn long_sum(name: impl Into<String>, field_name: impl Into<String>) -> Self {
        AggregatorSpec::LongSum {
            name: name.into(),
            field_name: field_name.into(),
        }
    }

    pub fn double_sum(name: impl Into<String>, field_name: impl Into<String>) -> Self {
        AggregatorSpec::DoubleSum {
            name: name.into(),
            field_name: field_name.into(),
        }
    }

    pub fn filtered(filter: Filter, aggregator: AggregatorSpec) -> Self {
        AggregatorSpec::Filtered {
            filter,
            aggregator: Box::new(aggregator),
        }
    }

    /// Output name
    pub fn name(&self) -> &str {
        match self.base() {
            AggregatorSpec::Count { name }
            | AggregatorSpec::LongSum { name, .. }
            | AggregatorSpec::DoubleSum { name, .. }
            | AggregatorSpec::LongMin { name, .. }
            | AggregatorSpec::LongMax { name, .. }
            | AggregatorSpec::DoubleMin { name, .. }
            | AggregatorSpec::DoubleMax { name, .. } => name,
            AggregatorSpec::Filtered { .. } => "",
        }
    }

    /// Metric the aggregator reads, if any
    pub fn field_name(&self) -> Option<&str> {
        match self.base() {
            AggregatorSpec::LongSum { field_name, .. }
            | AggregatorSpec::DoubleSum { field_name, .. }
            | AggregatorSpec::LongMin { field_name, .. }
            | AggregatorSpec::LongMax { field_name, .. }
            | AggregatorSpec::DoubleMin { field_name, .. }
            | AggregatorSpec::DoubleMax { field_name, .. } => Some(field_name),
            AggregatorSpec::Count { .. } | AggregatorSpec::Filtered { .. } => None,
        }
    }

    /// Innermost non-filtered aggregator
    pub fn base(&self) -> &AggregatorSpec {
        let mut spec = self;
        while let AggregatorSpec::Filtered { aggregator, .. } = spec {
            spec = aggregator;
        }
        spec
    }

    /// Filters of every enclosing `filtered` wrapper, outermost first
    pub fn filters(&self) -> Vec<&Filter> {
        let mut filters = Vec::new();
        let mut spec = self;
        while let AggregatorSpec::Filtered { filter, aggregator } = spec {
            filters.push(filter);
            spec = aggregator;
        }
        filters
    }

    /// Fresh accumulator for this aggregator
    pub fn accumulator(&self) -> Accumulator {
        match self.base() {
            AggregatorSpec::Count { .. } => Accumulator::Count(0),
            AggregatorSpec::LongSum { .. } => Accumulator::LongSum(0),
            AggregatorSpec::DoubleSum { .. } => Accumulator::DoubleSum(0.0),
            AggregatorSpec::LongMin { .. } => Accumulator::LongMin(None),
            AggregatorSpec::LongMax { .. } => Accumulator::LongMax(None),
            AggregatorSpec::DoubleMin { .. } => Accumulator::DoubleMin(None),
            AggregatorSpec::DoubleMax { .. } => Accumulator::DoubleMax(None),
            AggregatorSpec::Filtered { .. } => Accumulator::Count(0),
        }
    }
}

/// Intermediate state of one aggregator over one bucket
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Count(i64),
    LongSum(i64),
    DoubleSum(f64),
    LongMin(Option<i64>),
    LongMax(Option<i64>),
    DoubleMin(Option<f64>),
    DoubleMax(Option<f64>),
}

impl Accumulator {
    /// Fold the values of `rows`; a missing column reads as no values
    pub fn fold(&mut self, rows: &RoaringBitmap, column: Option<&MetricColumn>) {
        if let Accumulator::Count(count) = self {
            *count += rows.len() as i64;
            return;
        }
        let Some(column) = column else {
            return;
        };
        for row in rows {
            match self {
                Accumulator::Count(_) => {}
                Accumulator::LongSum(sum) => *sum = sum.wrapping_add(column.long(row)),
                Accumulator::DoubleSum(sum) => *sum += column.double(row),
                Accumulator::LongMin(min) => {
                    let v = column.long(row);
                    *min = Some(min.map_or(v, |m| m.min(v)));
                }
                Accumulator::LongMax(max) => {
                    let v = column.long(row);
                    *max = Some(max.map_or(v, |m| m.max(v)));
                }
                Accumulator::DoubleMin(min) => {
                    let v = column.double(row);
                    *min = Some(min.map_or(v, |m| m.min(v)));
                }
                Accumulator::DoubleMax(max) => {
                    let v = column.double(row);
                    *max = Some(max.map_or(v, |m| m.max(v)));
                }
            }
        }
    }

    /// Merge another partial of the same aggregator into this one
    pub fn combine(&mut self, other: &Accumulator) {
        match (self, other) {
            (Accumulator::Count(a), Accumulator::Count(b)) => *a += b,
            (Accumulator::LongSum(a), Accumulator::LongSum(b)) => *a = a.wrapping_add(*b),
            (Accumulator::DoubleSum(a), Accumulator::DoubleSum(b)) => *a += b,
            (Accumulator::LongMin(a), Accumulator::LongMin(b)) => *a = combine_opt(*a, *b, i64::min),
            (Accumulator::LongMax(a), Accumulator::LongMax(b)) => *a = combine_opt(*a, *b, i64::max),
            (Accumulator::DoubleMin(a), Accumulator::DoubleMin(b)) => *a = combine_opt(*a, *b, f64::min),
            (Accumulator::DoubleMax(a), Accumulator::DoubleMax(b)) => *a = combine_opt(*a, *b, f64::max),
            _ => {}
        }
    }

    /// Output value
    pub fn finalize(&self) -> QueryValue {
        match self {
            Accumulator::Count(v) | Accumulator::LongSum(v) => QueryValue::Long(*v),
            Accumulator::DoubleSum(v) => QueryValue::Double(*v),
            Accumulator::LongMin(v) | Accumulator::LongMax(v) => {
                v.map_or(QueryValue::Null, QueryValue::Long)
            }
            Accumulator::DoubleMin(v) | Accumulator::DoubleMax(v) => {
                v.map_or(QueryValue::Null, QueryValue::Double)
            }
        }
    }
}

fn combine_opt<T: Copy>(a: Option<T>, b: Option<T>, f: fn(T, T) -> T) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(f(a, b)),
        (a, None) => a,
        (None, b) => b,
    }
}
