//! Immutable columnar segments
//!
//! A segment is produced by freezing an incremental index or by merging
//! other segments, and is never mutated afterwards. Readers share it through
//! an `Arc` without locking.

mod columns;
mod reader;
mod writer;

pub use columns::{ColumnSet, DimensionColumn, MetricColumn};
pub use reader::load;
pub use writer::persist;

use crate::dictionary::Dictionary;
use crate::schema::IndexSchema;
use crate::spatial::KdTree;
use crate::{RowId, TimeRange, Timestamp};
use roaring::RoaringBitmap;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Segment file format version
pub const FORMAT_VERSION: u32 = 1;

/// Unique segment identifier
pub type SegmentId = Uuid;

/// Read-only view over the rows of an index or segment
pub trait SegmentReader: Send + Sync {
    /// Schema the rows were ingested with
    fn schema(&self) -> &IndexSchema;

    /// Underlying columns
    fn columns(&self) -> &ColumnSet;

    fn row_count(&self) -> usize {
        self.columns().row_count()
    }

    fn timestamp(&self, row: RowId) -> Option<Timestamp> {
        self.columns().timestamp(row)
    }

    /// Inclusive range of row timestamps, `None` when empty
    fn time_range(&self) -> Option<TimeRange> {
        self.columns().time_range()
    }

    fn dimension_names(&self) -> &[String] {
        self.columns().dimension_names()
    }

    fn dictionary(&self, dimension: &str) -> Option<&Dictionary> {
        self.columns().dimension(dimension).map(|d| d.dictionary())
    }

    /// Rows whose `dimension` carries `value`
    fn postings(&self, dimension: &str, value: &str) -> Option<&RoaringBitmap> {
        self.columns()
            .dimension(dimension)
            .and_then(|d| d.postings(value))
    }

    /// Rows carrying any value for `dimension`
    fn rows_with_dimension(&self, dimension: &str) -> Option<&RoaringBitmap> {
        self.columns().dimension(dimension).map(|d| d.present())
    }

    fn spatial_index(&self, dimension: &str) -> Option<&KdTree> {
        self.columns().spatial_index(dimension)
    }

    fn metric(&self, name: &str) -> Option<&MetricColumn> {
        self.columns().metric(name)
    }

    /// Every row id
    fn all_rows(&self) -> RoaringBitmap {
        self.columns().all_rows()
    }
}

/// An immutable, queryable set of rows
#[derive(Debug, Clone)]
pub struct Segment {
    id: SegmentId,
    schema: Arc<IndexSchema>,
    columns: ColumnSet,
}

impl Segment {
    /// Freeze columns into a segment, bulk-loading every spatial index
    pub fn new(schema: Arc<IndexSchema>, mut columns: ColumnSet) -> Self {
        columns.rebuild_spatial();
        Self::from_parts(Uuid::new_v4(), schema, columns)
    }

    /// Wrap columns whose spatial indexes are already bulk-loaded
    pub(crate) fn from_parts(id: SegmentId, schema: Arc<IndexSchema>, columns: ColumnSet) -> Self {
        Self {
            id,
            schema,
            columns,
        }
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn schema_arc(&self) -> Arc<IndexSchema> {
        self.schema.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.row_count() == 0
    }
}

impl SegmentReader for Segment {
    fn schema(&self) -> &IndexSchema {
        &self.schema
    }

    fn columns(&self) -> &ColumnSet {
        &self.columns
    }
}

/// Summary of a persisted segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentMeta {
    pub id: SegmentId,
    pub row_count: usize,
    pub time_range: Option<TimeRange>,
    pub file_size: u64,
}

/// Location of a persisted segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentHandle {
    pub path: PathBuf,
    pub meta: SegmentMeta,
}

impl SegmentHandle {
    pub fn id(&self) -> SegmentId {
        self.meta.id
    }
}

/// File name for the segment with sequence number `seq`
pub fn segment_file_name(seq: u64, id: SegmentId) -> String {
    format!("seg_{:020}_{}.{}", seq, id, crate::config::SEGMENT_FILE_EXTENSION)
}

/// Sequence number encoded in a segment file name
pub fn parse_segment_seq(file_name: &str) -> Option<u64> {
    let stem = file_name
        .strip_prefix("seg_")?
        .strip_suffix(crate::config::SEGMENT_FILE_EXTENSION)?
        .strip_suffix('.')?;
    let (seq, id) = stem.split_once('_')?;
    Uuid::parse_str(id).ok()?;
    seq.parse().ok()
}
