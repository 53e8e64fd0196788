//! Reference dataset shared by unit tests
//!
//! Six fixed points on 2013-01-01..05 (one with an unparsable location) plus
//! 4994 random points in `[10, 20]²` on 2013-01-01, available as a live
//! incremental index, a persisted-and-loaded segment, or a merge of three
//! persisted segments.

use crate::incremental::{IncrementalIndex, IncrementalIndexConfig};
use crate::merge::SegmentMerger;
use crate::schema::{IndexSchema, MetricSpec, SpatialDimensionSpec};
use crate::segment::{self, ColumnSet, Segment, SegmentReader};
use crate::InputRow;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

pub const T0: i64 = 1_356_998_400_000;
pub const DAY: i64 = 86_400_000;
pub const NUM_POINTS: usize = 5000;

pub fn schema() -> Arc<IndexSchema> {
    Arc::new(
        IndexSchema::new()
            .with_spatial_dimension(SpatialDimensionSpec::delimited("dim.geo", 2))
            .with_metric(MetricSpec::long("val")),
    )
}

pub fn config() -> IncrementalIndexConfig {
    IncrementalIndexConfig {
        max_rows: NUM_POINTS,
        strict_parsing: false,
    }
}

fn row(day: i64, dim: &str, geo: &str, val: i64) -> InputRow {
    InputRow::new(T0 + day * DAY)
        .with_dimension("dim", dim)
        .with_dimension("dim.geo", geo)
        .with_metric("val", val)
}

/// The six fixed rows, in ingestion order
pub fn fixed_rows() -> Vec<InputRow> {
    vec![
        row(0, "foo", "0.0,0.0", 17),
        row(1, "foo", "1.0,3.0", 29),
        row(2, "foo", "4.0,2.0", 13),
        row(3, "foo", "7.0,3.0", 91),
        row(4, "foo", "8.0,6.0", 47),
        row(4, "foo", "_mmx.unknown", 501),
    ]
}

/// Distinct random points on day 0 with `val = 6..NUM_POINTS`
pub fn random_rows() -> Vec<InputRow> {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut chosen = HashSet::new();
    (6..NUM_POINTS as i64)
        .map(|i| loop {
            let coord = format!(
                "{},{}",
                rng.gen::<f32>() * 10.0 + 10.0,
                rng.gen::<f32>() * 10.0 + 10.0
            );
            if chosen.insert(coord.clone()) {
                break row(0, "boo", &coord, i);
            }
        })
        .collect()
}

fn index_of(rows: &[InputRow]) -> IncrementalIndex {
    let index = IncrementalIndex::new(schema(), config()).unwrap();
    index.append_batch(rows).unwrap();
    index
}

/// Index holding only the six fixed rows (row ids 0..=5)
pub fn fixed_index() -> IncrementalIndex {
    index_of(&fixed_rows())
}

/// Index holding all rows
pub fn full_index() -> IncrementalIndex {
    let mut rows = fixed_rows();
    rows.extend(random_rows());
    index_of(&rows)
}

fn persist_and_load(segment: &Segment, dir: &TempDir, seq: u64) -> Segment {
    let handle = segment::persist(segment, dir.path(), seq).unwrap();
    segment::load(&handle.path).unwrap()
}

/// The dataset split into three persisted-and-loaded segments
pub fn parts() -> Vec<Segment> {
    let fixed = fixed_rows();
    let first = index_of(&[
        fixed[0].clone(),
        fixed[1].clone(),
        fixed[2].clone(),
        fixed[5].clone(),
    ]);
    let second = index_of(&fixed[3..5]);
    let third = index_of(&random_rows());

    let dir = TempDir::new().unwrap();
    [first, second, third]
        .iter()
        .enumerate()
        .map(|(seq, index)| persist_and_load(&index.snapshot(), &dir, seq as u64))
        .collect()
}

pub fn empty_segment() -> Segment {
    let schema = schema();
    Segment::new(schema.clone(), ColumnSet::new(&schema))
}

/// One shape of the reference dataset
pub enum Dataset {
    Incremental(IncrementalIndex),
    Segments(Vec<Segment>),
}

impl Dataset {
    /// Run `f` over the dataset's readers
    pub fn with_readers<R>(&self, f: impl FnOnce(&[&dyn SegmentReader]) -> R) -> R {
        match self {
            Dataset::Incremental(index) => {
                let state = index.read();
                f(&[&*state])
            }
            Dataset::Segments(segments) => {
                let readers: Vec<&dyn SegmentReader> =
                    segments.iter().map(|s| s as &dyn SegmentReader).collect();
                f(&readers)
            }
        }
    }
}

/// Live index, persisted segment and merged segment
pub fn variants() -> Vec<Dataset> {
    let dir = TempDir::new().unwrap();
    let persisted = persist_and_load(&full_index().snapshot(), &dir, 0);

    let parts = parts();
    let readers: Vec<&dyn SegmentReader> = parts.iter().map(|s| s as &dyn SegmentReader).collect();
    let merged = SegmentMerger::merge(&readers).unwrap();
    let merged = persist_and_load(&merged, &dir, 1);

    vec![
        Dataset::Incremental(full_index()),
        Dataset::Segments(vec![persisted]),
        Dataset::Segments(vec![merged]),
    ]
}
