//! Data source - one live index plus its persisted segments

use crate::incremental::{IncrementalIndex, IncrementalIndexConfig};
use crate::merge::SegmentMerger;
use crate::query::{QueryResult, TimeseriesEngine, TimeseriesQuery};
use crate::schema::IndexSchema;
use crate::segment::{self, Segment, SegmentHandle, SegmentMeta, SegmentReader};
use crate::{GeoFluxError, InputRow, Result, RowId};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A persisted segment and its file
#[derive(Clone)]
struct LoadedSegment {
    handle: SegmentHandle,
    segment: Arc<Segment>,
}

struct Inner {
    /// Index receiving appends
    live: Arc<IncrementalIndex>,
    /// Indexes swapped out but not yet written, oldest first
    frozen: Vec<Arc<IncrementalIndex>>,
    /// Persisted segments in sequence order
    segments: Vec<LoadedSegment>,
}

/// A named collection of rows sharing one schema
pub struct DataSource {
    name: String,
    dir: PathBuf,
    schema: Arc<IndexSchema>,
    index_config: IncrementalIndexConfig,
    compaction_trigger: usize,
    inner: RwLock<Inner>,
    /// Serializes persist and compaction
    persist_lock: Mutex<()>,
    next_seq: AtomicU64,
}

impl DataSource {
    /// Create or reopen the data source `name` under `data_dir`
    pub fn open(
        name: &str,
        data_dir: &Path,
        schema: IndexSchema,
        index_config: IncrementalIndexConfig,
        compaction_trigger: usize,
    ) -> Result<Self> {
        schema.validate()?;
        let dir = data_dir.join(name);
        std::fs::create_dir_all(&dir)?;

        let schema_json = serde_json::to_vec_pretty(&schema)
            .map_err(|e| GeoFluxError::Internal(e.to_string()))?;
        std::fs::write(dir.join(crate::config::SCHEMA_FILE_NAME), schema_json)?;

        let (segments, next_seq) = Self::load_segments(&dir)?;
        let schema = Arc::new(schema);
        let live = Arc::new(IncrementalIndex::new(schema.clone(), index_config.clone())?);

        info!(
            "Opened data source {} with {} segments",
            name,
            segments.len()
        );

        Ok(Self {
            name: name.to_string(),
            dir,
            schema,
            index_config,
            compaction_trigger,
            inner: RwLock::new(Inner {
                live,
                frozen: Vec::new(),
                segments,
            }),
            persist_lock: Mutex::new(()),
            next_seq: AtomicU64::new(next_seq),
        })
    }

    /// Read the schema stored in a data source directory
    pub fn read_schema(dir: &Path) -> Result<IndexSchema> {
        let data = std::fs::read(dir.join(crate::config::SCHEMA_FILE_NAME))?;
        serde_json::from_slice(&data).map_err(|e| GeoFluxError::InvalidFormat(e.to_string()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn schema(&self) -> &Arc<IndexSchema> {
        &self.schema
    }

    /// Append a row to the live index
    ///
    /// A full live index is persisted and the append retried once on its
    /// replacement.
    pub fn append(&self, row: &InputRow) -> Result<RowId> {
        match self.append_live(row) {
            Err(GeoFluxError::CapacityExceeded { .. }) => {
                debug!("Live index of {} is full, persisting", self.name);
                self.persist()?;
                self.append_live(row)
            }
            other => other,
        }
    }

    /// Append rows in order, stopping at the first failure
    pub fn append_batch(&self, rows: &[InputRow]) -> Result<usize> {
        for row in rows {
            self.append(row)?;
        }
        Ok(rows.len())
    }

    fn append_live(&self, row: &InputRow) -> Result<RowId> {
        // The read guard keeps the live index from being swapped mid-append
        let inner = self.inner.read();
        inner.live.append(row)
    }

    /// Swap in a fresh live index and write the old one as a segment
    ///
    /// Returns `None` when there was nothing to write.
    pub fn persist(&self) -> Result<Option<SegmentHandle>> {
        let _guard = self.persist_lock.lock();

        {
            let mut inner = self.inner.write();
            if !inner.live.is_empty() {
                let fresh = Arc::new(IncrementalIndex::new(
                    self.schema.clone(),
                    self.index_config.clone(),
                )?);
                let old = std::mem::replace(&mut inner.live, fresh);
                inner.frozen.push(old);
            }
        }

        let frozen = self.inner.read().frozen.clone();
        let mut written = None;
        for index in frozen {
            let segment = index.snapshot();
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            let handle = segment::persist(&segment, &self.dir, seq)?;

            let mut inner = self.inner.write();
            inner.frozen.retain(|f| !Arc::ptr_eq(f, &index));
            inner.segments.push(LoadedSegment {
                handle: handle.clone(),
                segment: Arc::new(segment),
            });
            written = Some(handle);
        }

        if written.is_some() && self.segment_count() >= self.compaction_trigger {
            self.compact_locked()?;
        }
        Ok(written)
    }

    /// Merge every persisted segment into one
    ///
    /// Returns the merged segment, or `None` with fewer than two segments.
    pub fn compact(&self) -> Result<Option<SegmentHandle>> {
        let _guard = self.persist_lock.lock();
        self.compact_locked()
    }

    fn compact_locked(&self) -> Result<Option<SegmentHandle>> {
        let inputs = self.inner.read().segments.clone();
        if inputs.len() < 2 {
            return Ok(None);
        }

        let readers: Vec<&dyn SegmentReader> = inputs
            .iter()
            .map(|s| s.segment.as_ref() as &dyn SegmentReader)
            .collect();
        let merged = SegmentMerger::merge(&readers)?;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let handle = segment::persist(&merged, &self.dir, seq)?;

        self.inner.write().segments = vec![LoadedSegment {
            handle: handle.clone(),
            segment: Arc::new(merged),
        }];

        for input in &inputs {
            if let Err(e) = std::fs::remove_file(&input.handle.path) {
                warn!("Failed to remove compacted segment {:?}: {}", input.handle.path, e);
            }
        }

        info!(
            "Compacted {} segments of {} into {} ({} rows)",
            inputs.len(),
            self.name,
            handle.id(),
            handle.meta.row_count
        );
        Ok(Some(handle))
    }

    /// Run `query` over every segment and the live index
    pub fn query(&self, query: &TimeseriesQuery) -> Result<QueryResult> {
        self.query_with(query, &TimeseriesEngine::new())
    }

    /// Run `query` on a caller-supplied engine
    pub fn query_with(&self, query: &TimeseriesQuery, engine: &TimeseriesEngine) -> Result<QueryResult> {
        let (segments, indexes) = {
            let inner = self.inner.read();
            let segments: Vec<Arc<Segment>> =
                inner.segments.iter().map(|s| s.segment.clone()).collect();
            let indexes: Vec<Arc<IncrementalIndex>> = inner
                .frozen
                .iter()
                .chain(std::iter::once(&inner.live))
                .cloned()
                .collect();
            (segments, indexes)
        };

        let states: Vec<_> = indexes.iter().map(|index| index.read()).collect();
        let mut readers: Vec<&dyn SegmentReader> = segments
            .iter()
            .map(|s| s.as_ref() as &dyn SegmentReader)
            .collect();
        readers.extend(states.iter().map(|state| &**state as &dyn SegmentReader));

        engine.run(query, &readers)
    }

    /// Number of persisted segments
    pub fn segment_count(&self) -> usize {
        self.inner.read().segments.len()
    }

    /// Metadata of the persisted segments in sequence order
    pub fn segments(&self) -> Vec<SegmentMeta> {
        self.inner
            .read()
            .segments
            .iter()
            .map(|s| s.handle.meta.clone())
            .collect()
    }

    pub fn stats(&self) -> DataSourceStats {
        let inner = self.inner.read();
        let unpersisted = inner.frozen.iter().chain(std::iter::once(&inner.live));
        let (live_rows, parse_errors) = unpersisted.fold((0, 0), |(rows, errors), index| {
            (rows + index.len(), errors + index.parse_errors())
        });

        DataSourceStats {
            name: self.name.clone(),
            live_rows,
            parse_errors,
            segments: inner.segments.len(),
            segment_rows: inner.segments.iter().map(|s| s.handle.meta.row_count).sum(),
            size_bytes: inner.segments.iter().map(|s| s.handle.meta.file_size).sum(),
        }
    }

    fn load_segments(dir: &Path) -> Result<(Vec<LoadedSegment>, u64)> {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with("seg_") && name.ends_with(".tmp") {
                // Left by a persist interrupted before its rename
                warn!("Removing incomplete segment {:?}", path);
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!("Failed to remove {:?}: {}", path, e);
                }
                continue;
            }
            if let Some(seq) = segment::parse_segment_seq(name) {
                found.push((seq, path));
            }
        }
        found.sort_by_key(|(seq, _)| *seq);
        let next_seq = found.last().map_or(0, |(seq, _)| seq + 1);

        let mut segments = Vec::with_capacity(found.len());
        for (_, path) in found {
            match Self::load_segment(&path) {
                Ok(loaded) => segments.push(loaded),
                Err(e) => warn!("Failed to load segment {:?}: {}", path, e),
            }
        }
        Ok((segments, next_seq))
    }

    fn load_segment(path: &Path) -> Result<LoadedSegment> {
        let segment = segment::load(path)?;
        let file_size = std::fs::metadata(path)?.len();
        let handle = SegmentHandle {
            path: path.to_path_buf(),
            meta: SegmentMeta {
                id: segment.id(),
                row_count: segment.row_count(),
                time_range: segment.time_range(),
                file_size,
            },
        };
        Ok(LoadedSegment {
            handle,
            segment: Arc::new(segment),
        })
    }
}

/// Data source statistics
#[derive(Debug, Clone, Serialize)]
pub struct DataSourceStats {
    pub name: String,
    /// Rows not yet written to a segment
    pub live_rows: usize,
    pub parse_errors: u64,
    pub segments: usize,
    pub segment_rows: usize,
    pub size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::query::{AggregatorSpec, Granularity, QueryValue};
    use crate::spatial::Bound;
    use crate::testutil::{self, DAY, T0};
    use crate::Interval;
    use tempfile::TempDir;

    fn open(dir: &TempDir, max_rows: usize, trigger: usize) -> DataSource {
        DataSource::open(
            "geo",
            dir.path(),
            (*testutil::schema()).clone(),
            IncrementalIndexConfig {
                max_rows,
                strict_parsing: false,
            },
            trigger,
        )
        .unwrap()
    }

    fn box_query() -> TimeseriesQuery {
        TimeseriesQuery::new("geo")
            .with_interval(Interval::new(T0, T0 + 6 * DAY))
            .with_granularity(Granularity::Day)
            .with_filter(Filter::spatial(
                "dim.geo",
                Bound::rectangular(vec![0.0, 0.0], vec![9.0, 9.0]),
            ))
            .with_aggregator(AggregatorSpec::count("rows"))
            .with_aggregator(AggregatorSpec::long_sum("val", "val"))
    }

    fn vals(result: &QueryResult) -> Vec<i64> {
        result
            .rows
            .iter()
            .filter_map(|r| r.get("val").and_then(QueryValue::as_i64))
            .collect()
    }

    #[test]
    fn test_persist_and_query() {
        let dir = TempDir::new().unwrap();
        let ds = open(&dir, 100, 10);
        assert!(ds.persist().unwrap().is_none());

        let rows = testutil::fixed_rows();
        ds.append_batch(&rows[..3]).unwrap();
        let handle = ds.persist().unwrap().unwrap();
        assert_eq!(handle.meta.row_count, 3);
        ds.append_batch(&rows[3..]).unwrap();

        // Three rows persisted, three live
        let stats = ds.stats();
        assert_eq!(stats.segments, 1);
        assert_eq!(stats.segment_rows, 3);
        assert_eq!(stats.live_rows, 3);
        assert_eq!(vals(&ds.query(&box_query()).unwrap()), vec![17, 29, 13, 91, 47]);
    }

    #[test]
    fn test_full_index_rolls_over() {
        let dir = TempDir::new().unwrap();
        let ds = open(&dir, 2, 10);
        ds.append_batch(&testutil::fixed_rows()).unwrap();

        assert_eq!(ds.segment_count(), 2);
        assert_eq!(ds.stats().live_rows, 2);
        assert_eq!(vals(&ds.query(&box_query()).unwrap()), vec![17, 29, 13, 91, 47]);
    }

    #[test]
    fn test_compaction_removes_inputs() {
        let dir = TempDir::new().unwrap();
        let ds = open(&dir, 100, 3);
        for row in testutil::fixed_rows() {
            ds.append(&row).unwrap();
            ds.persist().unwrap();
        }

        // Compacted after the third and fifth persist
        assert_eq!(ds.segment_count(), 2);
        let segment_files = |ds: &DataSource| {
            std::fs::read_dir(ds.dir())
                .unwrap()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().map_or(false, |x| x == "geos"))
                .count()
        };
        assert_eq!(segment_files(&ds), 2);
        assert_eq!(ds.stats().segment_rows, 6);
        assert_eq!(vals(&ds.query(&box_query()).unwrap()), vec![17, 29, 13, 91, 47]);

        let handle = ds.compact().unwrap().unwrap();
        assert_eq!(handle.meta.row_count, 6);
        assert_eq!(segment_files(&ds), 1);
        assert_eq!(vals(&ds.query(&box_query()).unwrap()), vec![17, 29, 13, 91, 47]);
        assert!(ds.compact().unwrap().is_none());
    }

    #[test]
    fn test_reopen_loads_segments() {
        let dir = TempDir::new().unwrap();
        {
            let ds = open(&dir, 100, 10);
            let rows = testutil::fixed_rows();
            ds.append_batch(&rows[..2]).unwrap();
            ds.persist().unwrap();
            ds.append_batch(&rows[2..]).unwrap();
            ds.persist().unwrap();
        }

        let schema = DataSource::read_schema(&dir.path().join("geo")).unwrap();
        assert_eq!(schema, *testutil::schema());

        let ds = open(&dir, 100, 10);
        assert_eq!(ds.segment_count(), 2);
        assert_eq!(vals(&ds.query(&box_query()).unwrap()), vec![17, 29, 13, 91, 47]);

        let handle = ds.compact().unwrap().unwrap();
        assert_eq!(handle.meta.row_count, 6);
        assert_eq!(ds.segments().len(), 1);
    }

    #[test]
    fn test_corrupt_segment_is_skipped() {
        let dir = TempDir::new().unwrap();
        {
            let ds = open(&dir, 100, 10);
            ds.append_batch(&testutil::fixed_rows()).unwrap();
            let handle = ds.persist().unwrap().unwrap();
            std::fs::write(&handle.path, b"not a segment").unwrap();
        }

        let ds = open(&dir, 100, 10);
        assert_eq!(ds.segment_count(), 0);
        assert!(ds.query(&box_query()).unwrap().is_empty());
    }

    #[test]
    fn test_incomplete_segment_removed_on_open() {
        let dir = TempDir::new().unwrap();
        let (handle, leftover) = {
            let ds = open(&dir, 100, 10);
            ds.append_batch(&testutil::fixed_rows()).unwrap();
            let handle = ds.persist().unwrap().unwrap();
            let leftover = handle.path.with_extension("tmp");
            std::fs::write(&leftover, b"half written").unwrap();
            (handle, leftover)
        };

        let ds = open(&dir, 100, 10);
        assert!(!leftover.exists());
        assert!(handle.path.exists());
        assert_eq!(ds.segment_count(), 1);
        assert_eq!(vals(&ds.query(&box_query()).unwrap()), vec![17, 29, 13, 91, 47]);
    }
}
