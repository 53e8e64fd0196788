//! Incremental index
//!
//! The mutable, in-memory precursor of a segment. Rows are appended under an
//! exclusive lock, so readers never see a partially written row. Dimension
//! values are dictionary-encoded as they arrive and spatial values are parsed
//! and inserted into a per-dimension k-d tree.

use crate::schema::{IndexSchema, MetricType, SpatialDimensionSpec};
use crate::segment::{self, ColumnSet, Segment, SegmentHandle, SegmentReader};
use crate::spatial::SpatialPoint;
use crate::{GeoFluxError, InputRow, MetricValue, Result, RowId};
use parking_lot::{RwLock, RwLockReadGuard};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Incremental index configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementalIndexConfig {
    /// Rows accepted before appends fail with `CapacityExceeded`
    pub max_rows: usize,
    /// Reject rows with unparsable values instead of dropping the values
    pub strict_parsing: bool,
}

impl Default for IncrementalIndexConfig {
    fn default() -> Self {
        Self {
            max_rows: crate::config::MAX_ROWS_PER_INDEX,
            strict_parsing: false,
        }
    }
}

/// Committed rows of an incremental index
#[derive(Debug)]
pub struct IndexState {
    schema: Arc<IndexSchema>,
    columns: ColumnSet,
    /// Values dropped by lenient parsing
    parse_errors: u64,
}

impl IndexState {
    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }
}

impl SegmentReader for IndexState {
    fn schema(&self) -> &IndexSchema {
        &self.schema
    }

    fn columns(&self) -> &ColumnSet {
        &self.columns
    }
}

/// A row after parsing, ready to be committed
struct ParsedRow<'a> {
    /// Spatial dimension name, stored value and parsed point (if well formed)
    spatial: Vec<(&'a str, String, Option<SpatialPoint>)>,
    metrics: Vec<(&'a str, MetricCell)>,
    dropped: u64,
}

enum MetricCell {
    Long(i64),
    Double(f64),
}

/// Mutable in-memory index
pub struct IncrementalIndex {
    schema: Arc<IndexSchema>,
    config: IncrementalIndexConfig,
    state: RwLock<IndexState>,
    /// Approximate size in bytes
    size_bytes: AtomicUsize,
    /// Creation time for age-based persisting
    created_at: Instant,
}

impl IncrementalIndex {
    /// Create an empty index
    pub fn new(schema: Arc<IndexSchema>, config: IncrementalIndexConfig) -> Result<Self> {
        schema.validate()?;
        let columns = ColumnSet::new(&schema);
        Ok(Self {
            state: RwLock::new(IndexState {
                schema: schema.clone(),
                columns,
                parse_errors: 0,
            }),
            schema,
            config,
            size_bytes: AtomicUsize::new(0),
            created_at: Instant::now(),
        })
    }

    pub fn schema(&self) -> &Arc<IndexSchema> {
        &self.schema
    }

    pub fn config(&self) -> &IncrementalIndexConfig {
        &self.config
    }

    /// Append a row, returning its id
    ///
    /// Parsing happens before any state is touched, so a rejected row leaves
    /// the index exactly as it was.
    pub fn append(&self, row: &InputRow) -> Result<RowId> {
        let parsed = self.parse(row)?;

        let mut state = self.state.write();
        if state.columns.row_count() >= self.config.max_rows {
            return Err(GeoFluxError::CapacityExceeded {
                max_rows: self.config.max_rows,
            });
        }
        let row_id = Self::commit(&mut state, row, parsed);
        drop(state);

        self.size_bytes.fetch_add(row.size(), Ordering::Relaxed);
        Ok(row_id)
    }

    /// Append rows in order, stopping at the first failure
    pub fn append_batch(&self, rows: &[InputRow]) -> Result<Vec<RowId>> {
        rows.iter().map(|row| self.append(row)).collect()
    }

    fn parse<'a>(&'a self, row: &InputRow) -> Result<ParsedRow<'a>> {
        let mut parsed = ParsedRow {
            spatial: Vec::with_capacity(self.schema.spatial_dimensions.len()),
            metrics: Vec::with_capacity(self.schema.metrics.len()),
            dropped: 0,
        };

        for spec in &self.schema.spatial_dimensions {
            for raw in spatial_values(spec, row) {
                match SpatialPoint::parse(&raw, spec.arity) {
                    Ok(point) => parsed.spatial.push((&spec.name, raw, Some(point))),
                    Err(reason) => {
                        if self.config.strict_parsing {
                            return Err(GeoFluxError::ParseRejected {
                                dimension: spec.name.clone(),
                                value: raw,
                                reason,
                            });
                        }
                        debug!("Dropped spatial value {:?} for {}: {}", raw, spec.name, reason);
                        parsed.dropped += 1;
                        parsed.spatial.push((&spec.name, raw, None));
                    }
                }
            }
        }

        for spec in &self.schema.metrics {
            let cell = match row.metrics.get(&spec.name) {
                None => match spec.metric_type {
                    MetricType::Long => MetricCell::Long(0),
                    MetricType::Double => MetricCell::Double(0.0),
                },
                Some(value) => {
                    let converted = match spec.metric_type {
                        MetricType::Long => value.to_long().map(MetricCell::Long),
                        MetricType::Double => value.to_double().map(MetricCell::Double),
                    };
                    match converted {
                        Ok(cell) => cell,
                        Err(reason) => {
                            if self.config.strict_parsing {
                                return Err(GeoFluxError::ParseRejected {
                                    dimension: spec.name.clone(),
                                    value: match value {
                                        MetricValue::String(s) => s.clone(),
                                        other => format!("{:?}", other),
                                    },
                                    reason,
                                });
                            }
                            debug!("Dropped metric value {:?} for {}: {}", value, spec.name, reason);
                            parsed.dropped += 1;
                            MetricCell::Long(0)
                        }
                    }
                }
            };
            parsed.metrics.push((&spec.name, cell));
        }

        Ok(parsed)
    }

    fn commit(state: &mut IndexState, row: &InputRow, parsed: ParsedRow<'_>) -> RowId {
        let schema = state.schema.clone();
        let columns = &mut state.columns;
        let row_id = columns.push_timestamp(row.timestamp);

        for name in row.dimensions.keys() {
            if schema.metric(name).is_some() {
                continue;
            }
            let delimited_spatial = schema
                .spatial_dimension(name)
                .map_or(false, |s| s.source_dims.is_empty());
            if delimited_spatial {
                continue;
            }
            for value in row.dimension_values(name) {
                columns.dimension_mut(name).add(row_id, value);
            }
        }

        for (name, raw, point) in parsed.spatial {
            columns.dimension_mut(name).add(row_id, &raw);
            if let (Some(point), Some(tree)) = (point, columns.spatial_mut(name)) {
                tree.insert(point, row_id);
            }
        }

        for (name, cell) in parsed.metrics {
            if let Some(column) = columns.metric_mut(name) {
                match cell {
                    MetricCell::Long(v) => column.push_long(v),
                    MetricCell::Double(v) => column.push_double(v),
                }
            }
        }

        state.parse_errors += parsed.dropped;
        row_id
    }

    /// Read access to the committed rows
    pub fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read()
    }

    /// Freeze the committed rows into a segment; the index stays usable
    pub fn snapshot(&self) -> Segment {
        // Spatial indexes are rebuilt after the read lock is released
        let columns = self.state.read().columns.clone();
        Segment::new(self.schema.clone(), columns)
    }

    /// Snapshot and write the index as segment `seq` in `dir`
    pub fn persist(&self, dir: &Path, seq: u64) -> Result<SegmentHandle> {
        let segment = self.snapshot();
        segment::persist(&segment, dir, seq)
    }

    /// Number of committed rows
    pub fn len(&self) -> usize {
        self.state.read().columns.row_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values dropped by lenient parsing so far
    pub fn parse_errors(&self) -> u64 {
        self.state.read().parse_errors
    }

    /// Approximate size of ingested input in bytes
    pub fn size(&self) -> usize {
        self.size_bytes.load(Ordering::Relaxed)
    }

    /// Get the age since creation
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Check if the next append would exceed capacity
    pub fn is_full(&self) -> bool {
        self.len() >= self.config.max_rows
    }
}

/// Raw coordinate strings a row carries for a spatial dimension
fn spatial_values(spec: &SpatialDimensionSpec, row: &InputRow) -> Vec<String> {
    if spec.source_dims.is_empty() {
        return row
            .dimension_values(&spec.name)
            .map(str::to_string)
            .collect();
    }
    let mut parts = Vec::with_capacity(spec.source_dims.len());
    for dim in &spec.source_dims {
        match row.dimension_values(dim).next() {
            Some(value) => parts.push(value),
            None => return Vec::new(),
        }
    }
    vec![parts.join(",")]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{MetricSpec, SpatialDimensionSpec};
    use crate::spatial::Bound;

    const DAY: i64 = 86_400_000;
    const T0: i64 = 1_356_998_400_000;

    fn geo_schema() -> Arc<IndexSchema> {
        Arc::new(
            IndexSchema::new()
                .with_spatial_dimension(SpatialDimensionSpec::delimited("dim.geo", 2))
                .with_metric(MetricSpec::long("val")),
        )
    }

    fn geo_row(ts: i64, geo: &str, val: i64) -> InputRow {
        InputRow::new(ts)
            .with_dimension("dim", "foo")
            .with_dimension("dim.geo", geo)
            .with_metric("val", val)
    }

    #[test]
    fn test_append_assigns_dense_row_ids() {
        let index = IncrementalIndex::new(geo_schema(), IncrementalIndexConfig::default()).unwrap();
        for i in 0..5 {
            let id = index.append(&geo_row(T0 + i * DAY, "1.0,2.0", i)).unwrap();
            assert_eq!(id, i as RowId);
        }
        assert_eq!(index.len(), 5);
        assert!(index.size() > 0);

        let state = index.read();
        assert_eq!(state.postings("dim", "foo").unwrap().len(), 5);
        assert_eq!(state.dictionary("dim.geo").unwrap().len(), 1);
        assert_eq!(state.metric("val").unwrap().long(4), 4);
    }

    #[test]
    fn test_capacity_exceeded_leaves_state() {
        let config = IncrementalIndexConfig {
            max_rows: 2,
            ..Default::default()
        };
        let index = IncrementalIndex::new(geo_schema(), config).unwrap();
        index.append(&geo_row(T0, "0,0", 1)).unwrap();
        index.append(&geo_row(T0, "1,1", 2)).unwrap();
        assert!(index.is_full());

        let err = index.append(&geo_row(T0, "2,2", 3)).unwrap_err();
        assert!(matches!(err, GeoFluxError::CapacityExceeded { max_rows: 2 }));
        assert_eq!(index.len(), 2);
        assert_eq!(index.read().dictionary("dim.geo").unwrap().len(), 2);
    }

    #[test]
    fn test_lenient_parsing_drops_spatial_value() {
        let index = IncrementalIndex::new(geo_schema(), IncrementalIndexConfig::default()).unwrap();
        index.append(&geo_row(T0, "0.0,0.0", 17)).unwrap();
        let id = index.append(&geo_row(T0 + 4 * DAY, "_mmx.unknown", 501)).unwrap();
        assert_eq!(index.parse_errors(), 1);

        let state = index.read();
        assert_eq!(state.spatial_index("dim.geo").unwrap().len(), 1);
        assert!(state.postings("dim.geo", "_mmx.unknown").unwrap().contains(id));
        assert_eq!(state.metric("val").unwrap().long(id), 501);
    }

    #[test]
    fn test_strict_parsing_rejects_without_mutation() {
        let config = IncrementalIndexConfig {
            strict_parsing: true,
            ..Default::default()
        };
        let index = IncrementalIndex::new(geo_schema(), config).unwrap();
        index.append(&geo_row(T0, "0.0,0.0", 17)).unwrap();

        let err = index.append(&geo_row(T0, "_mmx.unknown", 501)).unwrap_err();
        assert!(matches!(err, GeoFluxError::ParseRejected { ref dimension, .. } if dimension == "dim.geo"));

        let bad_metric = geo_row(T0, "1,1", 0).with_metric("val", "seventeen");
        assert!(index.append(&bad_metric).is_err());

        assert_eq!(index.len(), 1);
        assert_eq!(index.read().dictionary("dim.geo").unwrap().len(), 1);
        assert_eq!(index.read().dictionary("dim").unwrap().len(), 1);
    }

    #[test]
    fn test_metric_inputs() {
        let schema = Arc::new(
            IndexSchema::new()
                .with_metric(MetricSpec::long("val"))
                .with_metric(MetricSpec::double("ratio")),
        );
        let index = IncrementalIndex::new(schema, IncrementalIndexConfig::default()).unwrap();
        index
            .append(&InputRow::new(T0).with_metric("val", "29").with_metric("ratio", 0.5))
            .unwrap();
        index
            .append(&InputRow::new(T0).with_metric("val", "n/a").with_metric("extra", 3i64))
            .unwrap();

        let state = index.read();
        assert_eq!(state.metric("val").unwrap().long(0), 29);
        assert_eq!(state.metric("val").unwrap().long(1), 0);
        assert_eq!(state.metric("ratio").unwrap().double(0), 0.5);
        assert_eq!(state.metric("ratio").unwrap().double(1), 0.0);
        assert!(state.metric("extra").is_none());
        assert_eq!(state.parse_errors(), 1);
        assert_eq!(
            InputRow::new(0).with_metric("val", 1i64).metrics.get("val"),
            Some(&MetricValue::Long(1))
        );
    }

    #[test]
    fn test_spatial_from_source_dims() {
        let schema = Arc::new(
            IndexSchema::new()
                .with_spatial_dimension(SpatialDimensionSpec::from_dims("dim.geo", ["lat", "long"]))
                .with_metric(MetricSpec::long("val")),
        );
        let index = IncrementalIndex::new(schema, IncrementalIndexConfig::default()).unwrap();
        index
            .append(
                &InputRow::new(T0)
                    .with_dimension("lat", "1.0")
                    .with_dimension("long", "3.0")
                    .with_metric("val", 29i64),
            )
            .unwrap();
        index
            .append(&InputRow::new(T0).with_dimension("lat", "7.0").with_metric("val", 1i64))
            .unwrap();

        let state = index.read();
        assert_eq!(state.dictionary("dim.geo").unwrap().value_of(0), Some("1.0,3.0"));
        assert_eq!(state.postings("lat", "7.0").unwrap().len(), 1);
        let hits = state
            .spatial_index("dim.geo")
            .unwrap()
            .query(&Bound::radius(vec![1.0, 3.0], 0.0));
        assert_eq!(hits.iter().collect::<Vec<_>>(), vec![0]);
        assert_eq!(index.parse_errors(), 0);
    }

    #[test]
    fn test_empty_values_are_absent() {
        let index = IncrementalIndex::new(geo_schema(), IncrementalIndexConfig::default()).unwrap();
        index
            .append(&InputRow::new(T0).with_dimension("dim", "").with_dimension("dim.geo", ""))
            .unwrap();
        let state = index.read();
        assert!(state.dictionary("dim").is_none());
        assert!(state.spatial_index("dim.geo").unwrap().is_empty());
        assert_eq!(state.parse_errors(), 0);
    }

    #[test]
    fn test_snapshot_keeps_index_usable() {
        let index = IncrementalIndex::new(geo_schema(), IncrementalIndexConfig::default()).unwrap();
        index.append(&geo_row(T0, "0,0", 17)).unwrap();
        let first = index.snapshot();
        index.append(&geo_row(T0 + DAY, "1,3", 29)).unwrap();
        let second = index.snapshot();

        assert_eq!(first.row_count(), 1);
        assert_eq!(second.row_count(), 2);
        assert_ne!(first.id(), second.id());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_reads_alongside_appends_see_whole_rows() {
        const ROWS: i64 = 2000;
        let index = IncrementalIndex::new(geo_schema(), IncrementalIndexConfig::default()).unwrap();
        let done = std::sync::atomic::AtomicBool::new(false);

        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..ROWS {
                    let geo = format!("{},{}", i % 50, i / 50);
                    index.append(&geo_row(T0 + i, &geo, i)).unwrap();
                }
                done.store(true, Ordering::Release);
            });

            let mut observed = 0;
            while !done.load(Ordering::Acquire) || observed < ROWS as usize {
                {
                    let state = index.read();
                    let rows = state.row_count();
                    assert!(rows >= observed);
                    assert_eq!(state.columns().timestamps().len(), rows);
                    assert_eq!(state.metric("val").unwrap().len(), rows);
                    assert_eq!(state.postings("dim", "foo").map_or(0, |p| p.len()), rows as u64);
                    assert_eq!(state.spatial_index("dim.geo").unwrap().len(), rows);
                    observed = rows;
                }
                let snapshot = index.snapshot();
                assert_eq!(snapshot.metric("val").unwrap().len(), snapshot.row_count());
                assert!(snapshot.row_count() >= observed);
            }
        });

        assert_eq!(index.len(), ROWS as usize);
    }

    #[test]
    fn test_invalid_schema_rejected() {
        let schema = Arc::new(
            IndexSchema::new().with_spatial_dimension(SpatialDimensionSpec::delimited("g", 0)),
        );
        assert!(IncrementalIndex::new(schema, IncrementalIndexConfig::default()).is_err());
    }
}
