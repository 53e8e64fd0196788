//! GeoFlux Core - Columnar Segment Store with Spatial Filtering
//!
//! An event store that keeps rows in columnar segments and answers
//! time-bucketed aggregation queries restricted by geometric bounds.
//!
//! # Architecture
//!
//! - **Incremental index**: mutable in-memory buffer, dictionary-encoded
//!   dimensions and a k-d tree per spatial dimension
//! - **Segment**: immutable columnar snapshot, persisted as a checksummed,
//!   compressed file
//! - **Merger**: combines segments, remapping dictionaries and rebuilding
//!   spatial indexes
//! - **Filter evaluator**: turns spatial/and/or/not filters into row bitmaps
//! - **Timeseries engine**: staged per-segment scan, bucket aggregation and
//!   cross-segment merge
//! - **Storage**: named data sources that persist and compact segments

pub mod dictionary;
pub mod filter;
pub mod incremental;
pub mod merge;
pub mod query;
pub mod schema;
pub mod segment;
pub mod spatial;
pub mod storage;

mod error;
mod types;

#[cfg(test)]
mod testutil;

pub use error::{GeoFluxError, Result};
pub use filter::{Filter, FilterEvaluator};
pub use incremental::{IncrementalIndex, IncrementalIndexConfig};
pub use merge::SegmentMerger;
pub use query::{AggregatorSpec, Granularity, QueryResult, TimeseriesEngine, TimeseriesQuery};
pub use schema::{IndexSchema, MetricSpec, MetricType, SpatialDimensionSpec};
pub use segment::{Segment, SegmentReader};
pub use spatial::{Bound, SpatialPoint};
pub use types::*;

/// GeoFlux version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Rows an incremental index accepts before it must be persisted
    pub const MAX_ROWS_PER_INDEX: usize = 500_000;

    /// Persisted segments in a data source before they are compacted
    pub const COMPACTION_TRIGGER: usize = 4;

    /// Segment file extension
    pub const SEGMENT_FILE_EXTENSION: &str = "geos";

    /// Data source schema file
    pub const SCHEMA_FILE_NAME: &str = "schema.json";

    /// Segment file format version
    pub use crate::segment::FORMAT_VERSION;
}
