//! Spatial indexing
//!
//! Points parsed from spatial dimension values are kept in a k-d tree per
//! dimension. Queries take a [`Bound`] and return the matching row set.

mod bound;
mod kdtree;
mod point;

pub use bound::Bound;
pub use kdtree::KdTree;
pub use point::{Rect, SpatialPoint};
