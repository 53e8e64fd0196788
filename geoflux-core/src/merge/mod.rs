//! Segment merging
//!
//! Concatenates the rows of several segments into one new segment. Row ids
//! are shifted by the number of rows in the preceding inputs, dictionaries
//! are re-derived in first-seen order and every spatial index is bulk-loaded
//! again over the unioned points. Rows are never deduplicated.

use crate::schema::IndexSchema;
use crate::segment::{ColumnSet, MetricColumn, Segment, SegmentReader};
use crate::spatial::KdTree;
use crate::{GeoFluxError, Result, RowId};
use rayon::prelude::*;
use roaring::RoaringBitmap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Segment merger
pub struct SegmentMerger;

impl SegmentMerger {
    /// Merge `inputs` in order into a single segment
    pub fn merge(inputs: &[&dyn SegmentReader]) -> Result<Segment> {
        let schema = Self::merged_schema(inputs)?;

        let total_rows: usize = inputs.iter().map(|s| s.row_count()).sum();
        if total_rows > RowId::MAX as usize {
            return Err(GeoFluxError::CapacityExceeded {
                max_rows: RowId::MAX as usize,
            });
        }
        let mut offsets = Vec::with_capacity(inputs.len());
        let mut next: RowId = 0;
        for input in inputs {
            offsets.push(next);
            next += input.row_count() as RowId;
        }

        let mut columns = ColumnSet::new(&schema);

        for input in inputs {
            for &ts in input.columns().timestamps() {
                columns.push_timestamp(ts);
            }
        }

        for (input, &offset) in inputs.iter().zip(&offsets) {
            for name in input.dimension_names() {
                let Some(source) = input.columns().dimension(name) else {
                    continue;
                };
                let target = columns.dimension_mut(name);
                for (value, rows) in source.iter() {
                    let shifted: RoaringBitmap = rows.iter().map(|r| r + offset).collect();
                    target.add_rows(value, &shifted);
                }
            }
        }

        let trees: Vec<(String, KdTree)> = schema
            .spatial_dimensions
            .par_iter()
            .map(|spec| {
                let mut entries = Vec::new();
                for (input, &offset) in inputs.iter().zip(&offsets) {
                    if let Some(tree) = input.spatial_index(&spec.name) {
                        entries.extend(tree.entries().map(|(p, r)| (p.clone(), r + offset)));
                    }
                }
                (spec.name.clone(), KdTree::bulk_load(spec.arity, entries))
            })
            .collect();
        for (name, tree) in trees {
            columns.set_spatial(name, tree);
        }

        for spec in &schema.metrics {
            let mut merged = MetricColumn::new(spec.metric_type);
            for input in inputs {
                match input.metric(&spec.name) {
                    Some(column) => merged.extend_from(column),
                    None => merged.push_zeros(input.row_count()),
                }
            }
            columns.set_metric(spec.name.clone(), merged);
        }

        let segment = Segment::from_parts(Uuid::new_v4(), Arc::new(schema), columns);
        info!(
            "Merged {} segments ({} rows) into segment {}",
            inputs.len(),
            total_rows,
            segment.id()
        );
        Ok(segment)
    }

    /// Union of the input schemas
    ///
    /// A dimension that one input declares spatial must not appear as a
    /// plain dimension in an input that does not.
    pub fn merged_schema(inputs: &[&dyn SegmentReader]) -> Result<IndexSchema> {
        let mut schema = IndexSchema::new();
        for input in inputs {
            schema = schema.merge(input.schema())?;
        }

        for spec in &schema.spatial_dimensions {
            for input in inputs {
                let declared = input.schema().spatial_dimension(&spec.name).is_some();
                if !declared && input.dictionary(&spec.name).is_some() {
                    return Err(GeoFluxError::IncompatibleSchema(format!(
                        "dimension {} is spatial in one segment and plain in another",
                        spec.name
                    )));
                }
            }
        }
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incremental::{IncrementalIndex, IncrementalIndexConfig};
    use crate::schema::{MetricSpec, SpatialDimensionSpec};
    use crate::spatial::Bound;
    use crate::InputRow;

    fn index_with(schema: IndexSchema, rows: &[(i64, &str, &str, i64)]) -> Segment {
        let index = IncrementalIndex::new(Arc::new(schema), IncrementalIndexConfig::default()).unwrap();
        for (ts, dim, geo, val) in rows {
            index
                .append(
                    &InputRow::new(*ts)
                        .with_dimension("dim", *dim)
                        .with_dimension("dim.geo", *geo)
                        .with_metric("val", *val),
                )
                .unwrap();
        }
        index.snapshot()
    }

    fn geo_schema() -> IndexSchema {
        IndexSchema::new()
            .with_spatial_dimension(SpatialDimensionSpec::delimited("dim.geo", 2))
            .with_metric(MetricSpec::long("val"))
    }

    #[test]
    fn test_merge_remaps_rows() {
        let a = index_with(geo_schema(), &[(1, "foo", "0,0", 17), (2, "boo", "1,3", 29)]);
        let b = index_with(geo_schema(), &[(3, "zoo", "4,2", 13), (4, "foo", "_mmx.unknown", 501)]);

        let merged = SegmentMerger::merge(&[&a, &b]).unwrap();
        assert_eq!(merged.row_count(), 4);
        assert_eq!(merged.columns().timestamps(), &[1, 2, 3, 4]);

        let dict = merged.dictionary("dim").unwrap();
        assert_eq!(dict.iter().map(|(_, v)| v).collect::<Vec<_>>(), vec!["foo", "boo", "zoo"]);
        assert_eq!(
            merged.postings("dim", "foo").unwrap().iter().collect::<Vec<_>>(),
            vec![0, 3]
        );
        assert_eq!(merged.rows_with_dimension("dim.geo").unwrap().len(), 4);

        let hits = merged
            .spatial_index("dim.geo")
            .unwrap()
            .query(&Bound::rectangular(vec![0.0, 0.0], vec![9.0, 9.0]));
        assert_eq!(hits.iter().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(merged.metric("val").unwrap(), &MetricColumn::Long(vec![17, 29, 13, 501]));
    }

    #[test]
    fn test_merge_fills_missing_metrics() {
        let a = index_with(geo_schema(), &[(1, "foo", "0,0", 17)]);
        let b = index_with(
            geo_schema().with_metric(MetricSpec::double("ratio")),
            &[(2, "boo", "1,1", 3)],
        );
        let merged = SegmentMerger::merge(&[&a, &b]).unwrap();
        assert_eq!(merged.metric("ratio").unwrap(), &MetricColumn::Double(vec![0.0, 0.0]));
        assert_eq!(merged.schema().metrics.len(), 2);
    }

    #[test]
    fn test_merge_rejects_arity_mismatch() {
        let a = index_with(geo_schema(), &[(1, "foo", "0,0", 17)]);
        let schema3 = IndexSchema::new()
            .with_spatial_dimension(SpatialDimensionSpec::delimited("dim.geo", 3))
            .with_metric(MetricSpec::long("val"));
        let b = index_with(schema3, &[(2, "foo", "0,0,0", 1)]);

        let err = SegmentMerger::merge(&[&a, &b]).unwrap_err();
        assert!(matches!(err, GeoFluxError::IncompatibleSchema(_)));
        assert_eq!(a.row_count(), 1);
    }

    #[test]
    fn test_merge_rejects_spatial_vs_plain() {
        let a = index_with(geo_schema(), &[(1, "foo", "0,0", 17)]);
        let plain = IndexSchema::new().with_metric(MetricSpec::long("val"));
        let b = index_with(plain, &[(2, "foo", "0,0", 1)]);

        assert!(matches!(
            SegmentMerger::merge(&[&a, &b]),
            Err(GeoFluxError::IncompatibleSchema(_))
        ));
    }

    #[test]
    fn test_merge_of_nothing() {
        let merged = SegmentMerger::merge(&[]).unwrap();
        assert!(merged.is_empty());
    }
}
