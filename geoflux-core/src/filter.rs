//! Filter expressions and their evaluation against a segment

use crate::segment::SegmentReader;
use crate::spatial::Bound;
use crate::{GeoFluxError, Result};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

/// Filter expression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Filter {
    /// Rows with a point of `dimension` inside `bound`
    Spatial { dimension: String, bound: Bound },
    /// Intersection of the children
    And { fields: Vec<Filter> },
    /// Union of the children
    Or { fields: Vec<Filter> },
    /// Every row of the segment not matched by the child
    Not { field: Box<Filter> },
}

impl Filter {
    pub fn spatial(dimension: impl Into<String>, bound: Bound) -> Self {
        Filter::Spatial {
            dimension: dimension.into(),
            bound,
        }
    }

    pub fn and(fields: Vec<Filter>) -> Self {
        Filter::And { fields }
    }

    pub fn or(fields: Vec<Filter>) -> Self {
        Filter::Or { fields }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(field: Filter) -> Self {
        Filter::Not {
            field: Box::new(field),
        }
    }
}

/// Evaluates filters to row sets
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Check a filter against the segments it will run on
    ///
    /// Fails when a spatial filter names a dimension no segment declares
    /// spatial, when its bound has the wrong arity or is geometrically
    /// invalid, or when a connective has no children.
    pub fn validate(filter: &Filter, segments: &[&dyn SegmentReader]) -> Result<()> {
        match filter {
            Filter::Spatial { dimension, bound } => {
                let declared = segments
                    .iter()
                    .find_map(|s| s.schema().spatial_dimension(dimension));
                let Some(spec) = declared else {
                    return Err(GeoFluxError::MalformedFilter(format!(
                        "{} is not a spatial dimension",
                        dimension
                    )));
                };
                bound
                    .validate()
                    .map_err(|reason| GeoFluxError::MalformedFilter(format!("{}: {}", dimension, reason)))?;
                if bound.arity() != spec.arity {
                    return Err(GeoFluxError::MalformedFilter(format!(
                        "{} has arity {} but the bound has {}",
                        dimension,
                        spec.arity,
                        bound.arity()
                    )));
                }
                Ok(())
            }
            Filter::And { fields } | Filter::Or { fields } => {
                if fields.is_empty() {
                    return Err(GeoFluxError::MalformedFilter(
                        "and/or filter needs at least one field".into(),
                    ));
                }
                fields
                    .iter()
                    .try_for_each(|f| Self::validate(f, segments))
            }
            Filter::Not { field } => Self::validate(field, segments),
        }
    }

    /// Rows of `segment` matching `filter`
    pub fn evaluate(segment: &dyn SegmentReader, filter: &Filter) -> RoaringBitmap {
        match filter {
            Filter::Spatial { dimension, bound } => {
                let (Some(tree), Some(present)) = (
                    segment.spatial_index(dimension),
                    segment.rows_with_dimension(dimension),
                ) else {
                    return RoaringBitmap::new();
                };
                tree.query(bound) & present
            }
            Filter::And { fields } => {
                let mut iter = fields.iter();
                let Some(first) = iter.next() else {
                    return segment.all_rows();
                };
                let mut rows = Self::evaluate(segment, first);
                for field in iter {
                    if rows.is_empty() {
                        break;
                    }
                    rows &= Self::evaluate(segment, field);
                }
                rows
            }
            Filter::Or { fields } => {
                let mut rows = RoaringBitmap::new();
                for field in fields {
                    rows |= Self::evaluate(segment, field);
                }
                rows
            }
            Filter::Not { field } => segment.all_rows() - Self::evaluate(segment, field),
        }
    }
}
