//! Segment loader

use super::writer::{SegmentRecord, FOOTER_SIZE, HEADER_SIZE, MAGIC};
use super::{ColumnSet, DimensionColumn, Segment, FORMAT_VERSION};
use crate::dictionary::Dictionary;
use crate::spatial::KdTree;
use crate::{GeoFluxError, Result};
use bytes::Buf;
use roaring::RoaringBitmap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Read a persisted segment, verifying its framing and checksum
pub fn load(path: &Path) -> Result<Segment> {
    let data = fs::read(path)?;
    if data.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(GeoFluxError::InvalidFormat(format!(
            "Segment file too short: {} bytes",
            data.len()
        )));
    }

    let mut header = &data[..HEADER_SIZE];
    if &header[..4] != MAGIC {
        return Err(GeoFluxError::InvalidFormat("Invalid segment header".into()));
    }
    header.advance(4);
    let version = header.get_u32_le();
    if version != FORMAT_VERSION {
        return Err(GeoFluxError::InvalidFormat(format!(
            "Unsupported version: {}",
            version
        )));
    }
    let row_count = header.get_u64_le() as usize;

    let mut footer = &data[data.len() - FOOTER_SIZE..];
    let body_offset = footer.get_u64_le() as usize;
    let body_len = footer.get_u64_le() as usize;
    let expected = footer.get_u32_le();
    if footer != MAGIC {
        return Err(GeoFluxError::InvalidFormat("Invalid segment footer".into()));
    }

    let body_end = body_offset
        .checked_add(body_len)
        .filter(|end| *end <= data.len() - FOOTER_SIZE)
        .ok_or_else(|| GeoFluxError::Corruption("Segment body out of bounds".into()))?;
    let body = &data[body_offset..body_end];

    let actual = crc32fast::hash(body);
    if actual != expected {
        return Err(GeoFluxError::ChecksumMismatch { expected, actual });
    }

    let decoded = lz4_flex::decompress_size_prepended(body)
        .map_err(|e| GeoFluxError::Compression(e.to_string()))?;
    let record: SegmentRecord =
        bincode::deserialize(&decoded).map_err(|e| GeoFluxError::InvalidFormat(e.to_string()))?;

    if record.timestamps.len() != row_count {
        return Err(GeoFluxError::Corruption(format!(
            "Header says {} rows, body has {}",
            row_count,
            record.timestamps.len()
        )));
    }

    let segment = rebuild(record)?;
    debug!("Loaded segment {} ({} rows) from {:?}", segment.id(), row_count, path);
    Ok(segment)
}

fn rebuild(record: SegmentRecord) -> Result<Segment> {
    let row_count = record.timestamps.len();
    let mut columns = ColumnSet::new(&record.schema);
    for ts in record.timestamps {
        columns.push_timestamp(ts);
    }

    for dim in record.dimensions {
        if dim.values.len() != dim.postings.len() {
            return Err(GeoFluxError::Corruption(format!(
                "Dimension {} has {} values but {} posting lists",
                dim.name,
                dim.values.len(),
                dim.postings.len()
            )));
        }
        let postings = dim
            .postings
            .iter()
            .map(|bytes| RoaringBitmap::deserialize_from(&bytes[..]))
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| GeoFluxError::Corruption(format!("Posting list for {}: {}", dim.name, e)))?;
        let dictionary = Dictionary::from(dim.values);
        columns.insert_dimension(dim.name, DimensionColumn::from_parts(dictionary, postings));
    }

    for spatial in record.spatial {
        let tree = KdTree::bulk_load(spatial.arity, spatial.points);
        columns.set_spatial(spatial.name, tree);
    }

    for (name, column) in record.metrics {
        if column.len() != row_count {
            return Err(GeoFluxError::Corruption(format!(
                "Metric {} has {} values for {} rows",
                name,
                column.len(),
                row_count
            )));
        }
        columns.set_metric(name, column);
    }

    Ok(Segment::from_parts(record.id, Arc::new(record.schema), columns))
}
