//! Columnar row storage
//!
//! A [`ColumnSet`] holds timestamps, dictionary-encoded dimensions with their
//! posting lists, one spatial index per declared spatial dimension and typed
//! metric columns. Incremental indexes append to one; segments freeze one.

use crate::dictionary::Dictionary;
use crate::schema::{IndexSchema, MetricType};
use crate::spatial::KdTree;
use crate::{RowId, TimeRange, Timestamp};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One dictionary-encoded dimension
#[derive(Debug, Clone, Default)]
pub struct DimensionColumn {
    dictionary: Dictionary,
    /// Posting list per dictionary id
    postings: Vec<RoaringBitmap>,
    /// Rows carrying at least one value
    present: RoaringBitmap,
}

impl DimensionColumn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a column from a frozen dictionary and its posting lists
    pub(crate) fn from_parts(dictionary: Dictionary, postings: Vec<RoaringBitmap>) -> Self {
        let mut present = RoaringBitmap::new();
        for bitmap in &postings {
            present |= bitmap;
        }
        Self {
            dictionary,
            postings,
            present,
        }
    }

    /// Record that `row` carries `value`
    pub(crate) fn add(&mut self, row: RowId, value: &str) {
        let id = self.slot(value);
        self.postings[id].insert(row);
        self.present.insert(row);
    }

    /// Record that every row in `rows` carries `value`
    pub(crate) fn add_rows(&mut self, value: &str, rows: &RoaringBitmap) {
        let id = self.slot(value);
        self.postings[id] |= rows;
        self.present |= rows;
    }

    fn slot(&mut self, value: &str) -> usize {
        let id = self.dictionary.get_or_insert(value) as usize;
        if id == self.postings.len() {
            self.postings.push(RoaringBitmap::new());
        }
        id
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    /// Rows carrying `value`
    pub fn postings(&self, value: &str) -> Option<&RoaringBitmap> {
        self.dictionary
            .id_of(value)
            .and_then(|id| self.postings_by_id(id))
    }

    /// Rows carrying the value with dictionary id `id`
    pub fn postings_by_id(&self, id: u32) -> Option<&RoaringBitmap> {
        self.postings.get(id as usize)
    }

    /// Rows carrying any value
    pub fn present(&self) -> &RoaringBitmap {
        &self.present
    }

    /// `(value, rows)` pairs in dictionary id order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RoaringBitmap)> {
        self.dictionary
            .iter()
            .zip(&self.postings)
            .map(|((_, value), rows)| (value, rows))
    }
}

/// Typed metric values indexed by row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetricColumn {
    Long(Vec<i64>),
    Double(Vec<f64>),
}

impl MetricColumn {
    pub fn new(metric_type: MetricType) -> Self {
        match metric_type {
            MetricType::Long => MetricColumn::Long(Vec::new()),
            MetricType::Double => MetricColumn::Double(Vec::new()),
        }
    }

    pub fn metric_type(&self) -> MetricType {
        match self {
            MetricColumn::Long(_) => MetricType::Long,
            MetricColumn::Double(_) => MetricType::Double,
        }
    }

    pub(crate) fn push_long(&mut self, value: i64) {
        match self {
            MetricColumn::Long(values) => values.push(value),
            MetricColumn::Double(values) => values.push(value as f64),
        }
    }

    pub(crate) fn push_double(&mut self, value: f64) {
        match self {
            MetricColumn::Long(values) => values.push(value as i64),
            MetricColumn::Double(values) => values.push(value),
        }
    }

    /// Append `count` zero values
    pub(crate) fn push_zeros(&mut self, count: usize) {
        match self {
            MetricColumn::Long(values) => values.resize(values.len() + count, 0),
            MetricColumn::Double(values) => values.resize(values.len() + count, 0.0),
        }
    }

    /// Append every value of `other`, converting to this column's type
    pub(crate) fn extend_from(&mut self, other: &MetricColumn) {
        match (self, other) {
            (MetricColumn::Long(dst), MetricColumn::Long(src)) => dst.extend_from_slice(src),
            (MetricColumn::Double(dst), MetricColumn::Double(src)) => dst.extend_from_slice(src),
            (MetricColumn::Long(dst), MetricColumn::Double(src)) => {
                dst.extend(src.iter().map(|v| *v as i64))
            }
            (MetricColumn::Double(dst), MetricColumn::Long(src)) => {
                dst.extend(src.iter().map(|v| *v as f64))
            }
        }
    }

    /// Value at `row` as i64; 0 past the end
    pub fn long(&self, row: RowId) -> i64 {
        match self {
            MetricColumn::Long(values) => values.get(row as usize).copied().unwrap_or(0),
            MetricColumn::Double(values) => {
                values.get(row as usize).map_or(0, |v| *v as i64)
            }
        }
    }

    /// Value at `row` as f64; 0.0 past the end
    pub fn double(&self, row: RowId) -> f64 {
        match self {
            MetricColumn::Long(values) => values.get(row as usize).map_or(0.0, |v| *v as f64),
            MetricColumn::Double(values) => values.get(row as usize).copied().unwrap_or(0.0),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MetricColumn::Long(values) => values.len(),
            MetricColumn::Double(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// All columns of one index or segment
#[derive(Debug, Clone)]
pub struct ColumnSet {
    timestamps: Vec<Timestamp>,
    /// Dimension names in first-seen order
    dimension_order: Vec<String>,
    dimensions: HashMap<String, DimensionColumn>,
    spatial: BTreeMap<String, KdTree>,
    metrics: BTreeMap<String, MetricColumn>,
    time_range: Option<TimeRange>,
}

impl ColumnSet {
    /// Empty columns for `schema`: one spatial index per spatial dimension
    /// and one column per declared metric
    pub fn new(schema: &IndexSchema) -> Self {
        Self {
            timestamps: Vec::new(),
            dimension_order: Vec::new(),
            dimensions: HashMap::new(),
            spatial: schema
                .spatial_dimensions
                .iter()
                .map(|s| (s.name.clone(), KdTree::new(s.arity)))
                .collect(),
            metrics: schema
                .metrics
                .iter()
                .map(|m| (m.name.clone(), MetricColumn::new(m.metric_type)))
                .collect(),
            time_range: None,
        }
    }

    /// Start a new row and return its id
    pub(crate) fn push_timestamp(&mut self, timestamp: Timestamp) -> RowId {
        let row = self.timestamps.len() as RowId;
        self.timestamps.push(timestamp);
        match &mut self.time_range {
            Some(range) => range.extend(timestamp),
            None => self.time_range = Some(TimeRange::new(timestamp, timestamp)),
        }
        row
    }

    /// Column for `name`, created on first use
    pub(crate) fn dimension_mut(&mut self, name: &str) -> &mut DimensionColumn {
        if !self.dimensions.contains_key(name) {
            self.dimension_order.push(name.to_string());
        }
        self.dimensions.entry(name.to_string()).or_default()
    }

    pub(crate) fn insert_dimension(&mut self, name: String, column: DimensionColumn) {
        if !self.dimensions.contains_key(&name) {
            self.dimension_order.push(name.clone());
        }
        self.dimensions.insert(name, column);
    }

    pub(crate) fn spatial_mut(&mut self, name: &str) -> Option<&mut KdTree> {
        self.spatial.get_mut(name)
    }

    pub(crate) fn set_spatial(&mut self, name: String, tree: KdTree) {
        self.spatial.insert(name, tree);
    }

    pub(crate) fn metric_mut(&mut self, name: &str) -> Option<&mut MetricColumn> {
        self.metrics.get_mut(name)
    }

    pub(crate) fn set_metric(&mut self, name: String, column: MetricColumn) {
        self.metrics.insert(name, column);
    }

    /// Replace every spatial index with a bulk-loaded copy of itself
    pub(crate) fn rebuild_spatial(&mut self) {
        for tree in self.spatial.values_mut() {
            let entries = tree.entries().map(|(p, r)| (p.clone(), r)).collect();
            *tree = KdTree::bulk_load(tree.arity(), entries);
        }
    }

    pub fn row_count(&self) -> usize {
        self.timestamps.len()
    }

    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    pub fn timestamp(&self, row: RowId) -> Option<Timestamp> {
        self.timestamps.get(row as usize).copied()
    }

    pub fn time_range(&self) -> Option<TimeRange> {
        self.time_range
    }

    pub fn dimension_names(&self) -> &[String] {
        &self.dimension_order
    }

    pub fn dimension(&self, name: &str) -> Option<&DimensionColumn> {
        self.dimensions.get(name)
    }

    pub fn spatial_index(&self, name: &str) -> Option<&KdTree> {
        self.spatial.get(name)
    }

    pub fn spatial_indexes(&self) -> impl Iterator<Item = (&str, &KdTree)> {
        self.spatial.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn metric(&self, name: &str) -> Option<&MetricColumn> {
        self.metrics.get(name)
    }

    pub fn metrics(&self) -> impl Iterator<Item = (&str, &MetricColumn)> {
        self.metrics.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Every row id, as a bitmap
    pub fn all_rows(&self) -> RoaringBitmap {
        let mut rows = RoaringBitmap::new();
        if !self.timestamps.is_empty() {
            rows.insert_range(0..self.timestamps.len() as u32);
        }
        rows
    }
}
