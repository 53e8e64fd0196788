//! Timeseries query engine
//!
//! Runs a query as a staged pipeline over immutable intermediate results:
//!
//! 1. `PerSegmentScan`: group each segment's rows into time buckets
//! 2. `BucketAggregate`: apply the query filter per bucket and fold aggregators
//! 3. `CrossSegmentMerge`: combine partials sharing a bucket
//! 4. `Finalized`: convert accumulators into output values
//!
//! The first two stages fan out across segments on the rayon pool. The
//! cancellation token is checked before every per-segment step and before
//! the merge; a cancelled query discards its partials.

use super::{Accumulator, QueryResult, ResultRow, TimeseriesQuery};
use crate::filter::FilterEvaluator;
use crate::segment::SegmentReader;
use crate::{GeoFluxError, Result, Timestamp};
use parking_lot::Mutex;
use rayon::prelude::*;
use roaring::RoaringBitmap;
use std::collections::BTreeMap;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Pipeline stage of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    Idle,
    PerSegmentScan,
    BucketAggregate,
    CrossSegmentMerge,
    Finalized,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryStage::Idle => "idle",
            QueryStage::PerSegmentScan => "per-segment scan",
            QueryStage::BucketAggregate => "bucket aggregate",
            QueryStage::CrossSegmentMerge => "cross-segment merge",
            QueryStage::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// Rows of one segment grouped by bucket
struct SegmentBuckets<'a> {
    segment: &'a dyn SegmentReader,
    buckets: BTreeMap<Timestamp, RoaringBitmap>,
}

/// Per-bucket accumulators, one per aggregator
type Partials = BTreeMap<Timestamp, Vec<Accumulator>>;

/// Timeseries query engine
pub struct TimeseriesEngine {
    cancel: Option<CancellationToken>,
    stage: Mutex<QueryStage>,
}

impl Default for TimeseriesEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeseriesEngine {
    /// Engine that runs queries to completion
    pub fn new() -> Self {
        Self {
            cancel: None,
            stage: Mutex::new(QueryStage::Idle),
        }
    }

    /// Engine that abandons queries once `token` is cancelled
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancel: Some(token),
            stage: Mutex::new(QueryStage::Idle),
        }
    }

    /// Stage reached by the most recent query
    pub fn stage(&self) -> QueryStage {
        *self.stage.lock()
    }

    fn enter(&self, stage: QueryStage) {
        let mut current = self.stage.lock();
        debug!("Query stage {} -> {}", *current, stage);
        *current = stage;
    }

    fn check_cancelled(&self, stage: QueryStage) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => {
                debug!("Query cancelled during {}", stage);
                Err(GeoFluxError::Cancelled(stage.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Run `query` over `segments`
    pub fn run(&self, query: &TimeseriesQuery, segments: &[&dyn SegmentReader]) -> Result<QueryResult> {
        self.enter(QueryStage::Idle);
        Self::validate(query, segments)?;

        self.enter(QueryStage::PerSegmentScan);
        let scanned = segments
            .par_iter()
            .map(|segment| {
                self.check_cancelled(QueryStage::PerSegmentScan)?;
                Ok(Self::scan(query, *segment))
            })
            .collect::<Result<Vec<_>>>()?;

        self.enter(QueryStage::BucketAggregate);
        let partials = scanned
            .into_par_iter()
            .map(|buckets| {
                self.check_cancelled(QueryStage::BucketAggregate)?;
                Ok(Self::aggregate(query, buckets))
            })
            .collect::<Result<Vec<_>>>()?;

        self.check_cancelled(QueryStage::CrossSegmentMerge)?;
        self.enter(QueryStage::CrossSegmentMerge);
        let merged = Self::merge(partials);

        self.enter(QueryStage::Finalized);
        Ok(Self::finalize(query, &merged))
    }

    fn validate(query: &TimeseriesQuery, segments: &[&dyn SegmentReader]) -> Result<()> {
        query.validate()?;
        if segments.is_empty() {
            return Ok(());
        }
        if let Some(filter) = &query.filter {
            FilterEvaluator::validate(filter, segments)?;
        }
        for spec in &query.aggregations {
            for filter in spec.filters() {
                FilterEvaluator::validate(filter, segments)?;
            }
        }
        Ok(())
    }

    fn scan<'a>(query: &TimeseriesQuery, segment: &'a dyn SegmentReader) -> SegmentBuckets<'a> {
        let mut buckets: BTreeMap<Timestamp, RoaringBitmap> = BTreeMap::new();

        let in_range = segment
            .time_range()
            .map_or(false, |range| query.intervals.iter().any(|i| i.overlaps(&range)));
        if in_range {
            let origin = query.origin();
            for (row, &ts) in segment.columns().timestamps().iter().enumerate() {
                if query.covers(ts) {
                    buckets
                        .entry(query.granularity.bucket_start(ts, origin))
                        .or_default()
                        .insert(row as u32);
                }
            }
        }

        SegmentBuckets { segment, buckets }
    }

    fn aggregate(query: &TimeseriesQuery, scanned: SegmentBuckets<'_>) -> Partials {
        let segment = scanned.segment;
        let mut partials = Partials::new();
        if scanned.buckets.is_empty() {
            return partials;
        }

        let query_rows = query
            .filter
            .as_ref()
            .map(|f| FilterEvaluator::evaluate(segment, f));

        // Filtered aggregators evaluate their filters once per segment
        let aggregator_rows: Vec<Option<RoaringBitmap>> = query
            .aggregations
            .iter()
            .map(|spec| {
                let mut filters = spec.filters().into_iter();
                let first = FilterEvaluator::evaluate(segment, filters.next()?);
                Some(filters.fold(first, |acc, f| acc & FilterEvaluator::evaluate(segment, f)))
            })
            .collect();

        for (bucket, mut rows) in scanned.buckets {
            if let Some(matched) = &query_rows {
                rows &= matched;
            }
            if rows.is_empty() {
                continue;
            }

            let accumulators = query
                .aggregations
                .iter()
                .zip(&aggregator_rows)
                .map(|(spec, restrict)| {
                    let mut acc = spec.accumulator();
                    let column = spec.field_name().and_then(|name| segment.metric(name));
                    match restrict {
                        Some(restrict) => acc.fold(&(&rows & restrict), column),
                        None => acc.fold(&rows, column),
                    }
                    acc
                })
                .collect();
            partials.insert(bucket, accumulators);
        }
        partials
    }

    fn merge(partials: Vec<Partials>) -> Partials {
        let mut merged = Partials::new();
        for partial in partials {
            for (bucket, accumulators) in partial {
                match merged.get_mut(&bucket) {
                    Some(existing) => {
                        for (into, from) in existing.iter_mut().zip(&accumulators) {
                            into.combine(from);
                        }
                    }
                    None => {
                        merged.insert(bucket, accumulators);
                    }
                }
            }
        }
        merged
    }

    fn finalize(query: &TimeseriesQuery, merged: &Partials) -> QueryResult {
        let rows = merged
            .iter()
            .map(|(&timestamp, accumulators)| ResultRow {
                timestamp,
                result: query
                    .aggregations
                    .iter()
                    .zip(accumulators)
                    .map(|(spec, acc)| (spec.name().to_string(), acc.finalize()))
                    .collect(),
            })
            .collect();
        QueryResult { rows }
    }
}
