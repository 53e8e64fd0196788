//! Segment writer
//!
//! File layout:
//! - Header (32 bytes): magic, format version, row count, min/max timestamp
//! - Body: lz4-compressed bincode [`SegmentRecord`]
//! - Footer (24 bytes): body offset, body length, CRC32 of the body, magic

use super::{segment_file_name, MetricColumn, Segment, SegmentHandle, SegmentMeta, SegmentReader, FORMAT_VERSION};
use crate::schema::IndexSchema;
use crate::spatial::SpatialPoint;
use crate::{GeoFluxError, Result, RowId, Timestamp};
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

pub(super) const MAGIC: &[u8; 4] = b"GEOS";
pub(super) const HEADER_SIZE: usize = 32;
pub(super) const FOOTER_SIZE: usize = 24;

/// Logical content of a segment file
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct SegmentRecord {
    pub id: Uuid,
    pub schema: IndexSchema,
    pub timestamps: Vec<Timestamp>,
    pub dimensions: Vec<DimensionRecord>,
    pub spatial: Vec<SpatialRecord>,
    pub metrics: Vec<(String, MetricColumn)>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct DimensionRecord {
    pub name: String,
    pub values: Vec<String>,
    /// Portable roaring bytes, one per value
    pub postings: Vec<Vec<u8>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct SpatialRecord {
    pub name: String,
    pub arity: usize,
    pub points: Vec<(SpatialPoint, RowId)>,
}

impl SegmentRecord {
    fn from_segment(segment: &Segment) -> Result<Self> {
        let columns = segment.columns();

        let mut dimensions = Vec::with_capacity(columns.dimension_names().len());
        for name in columns.dimension_names() {
            let Some(column) = columns.dimension(name) else {
                continue;
            };
            let mut postings = Vec::with_capacity(column.dictionary().len());
            for (_, rows) in column.iter() {
                let mut buf = Vec::with_capacity(rows.serialized_size());
                rows.serialize_into(&mut buf)?;
                postings.push(buf);
            }
            dimensions.push(DimensionRecord {
                name: name.clone(),
                values: column.dictionary().clone().into(),
                postings,
            });
        }

        let spatial = columns
            .spatial_indexes()
            .map(|(name, tree)| SpatialRecord {
                name: name.to_string(),
                arity: tree.arity(),
                points: tree.entries().map(|(p, r)| (p.clone(), r)).collect(),
            })
            .collect();

        let metrics = columns
            .metrics()
            .map(|(name, column)| (name.to_string(), column.clone()))
            .collect();

        Ok(Self {
            id: segment.id(),
            schema: segment.schema().clone(),
            timestamps: columns.timestamps().to_vec(),
            dimensions,
            spatial,
            metrics,
        })
    }
}

/// Write `segment` into `dir` as sequence number `seq`
pub fn persist(segment: &Segment, dir: &Path, seq: u64) -> Result<SegmentHandle> {
    let record = SegmentRecord::from_segment(segment)?;
    let encoded =
        bincode::serialize(&record).map_err(|e| GeoFluxError::InvalidFormat(e.to_string()))?;
    let body = lz4_flex::compress_prepend_size(&encoded);
    let checksum = crc32fast::hash(&body);

    let time_range = segment.time_range();
    let (min_ts, max_ts) = time_range.map_or((i64::MAX, i64::MIN), |r| (r.start, r.end));

    let mut header = BytesMut::with_capacity(HEADER_SIZE);
    header.put_slice(MAGIC);
    header.put_u32_le(FORMAT_VERSION);
    header.put_u64_le(segment.row_count() as u64);
    header.put_i64_le(min_ts);
    header.put_i64_le(max_ts);

    let mut footer = BytesMut::with_capacity(FOOTER_SIZE);
    footer.put_u64_le(HEADER_SIZE as u64);
    footer.put_u64_le(body.len() as u64);
    footer.put_u32_le(checksum);
    footer.put_slice(MAGIC);

    let path = dir.join(segment_file_name(seq, segment.id()));
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = BufWriter::new(File::create(&tmp_path)?);
        file.write_all(&header)?;
        file.write_all(&body)?;
        file.write_all(&footer)?;
        file.flush()?;
        file.get_ref().sync_all()?;
    }
    fs::rename(&tmp_path, &path)?;

    let file_size = (header.len() + body.len() + footer.len()) as u64;
    info!(
        "Persisted segment {} ({} rows, {} bytes) to {:?}",
        segment.id(),
        segment.row_count(),
        file_size,
        path
    );

    Ok(SegmentHandle {
        path,
        meta: SegmentMeta {
            id: segment.id(),
            row_count: segment.row_count(),
            time_range,
            file_size,
        },
    })
}
