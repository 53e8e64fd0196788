//! Spatial points and axis-aligned rectangles

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered sequence of `k` finite coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialPoint(Vec<f64>);

impl SpatialPoint {
    /// Create a point; returns `None` if any coordinate is not finite
    pub fn new(coords: Vec<f64>) -> Option<Self> {
        if coords.is_empty() || coords.iter().any(|c| !c.is_finite()) {
            return None;
        }
        Some(Self(coords))
    }

    /// Parse a comma-separated coordinate string of the expected arity
    pub fn parse(value: &str, arity: usize) -> Result<Self, String> {
        let coords = value
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<f64>()
                    .map_err(|_| format!("coordinate {:?} is not a number", part.trim()))
            })
            .collect::<Result<Vec<f64>, String>>()?;

        if coords.len() != arity {
            return Err(format!(
                "expected {} coordinates, found {}",
                arity,
                coords.len()
            ));
        }
        Self::new(coords).ok_or_else(|| "coordinates must be finite".to_string())
    }

    /// Number of axes
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn coords(&self) -> &[f64] {
        &self.0
    }

    pub fn get(&self, axis: usize) -> f64 {
        self.0[axis]
    }

    /// Squared Euclidean distance to another coordinate slice of equal arity
    pub fn distance_sq(&self, other: &[f64]) -> f64 {
        self.0
            .iter()
            .zip(other)
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }
}

impl fmt::Display for SpatialPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

/// Axis-aligned bounding rectangle
#[derive(Debug, Clone, PartialEq)]
pub struct Rect {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
}

impl Rect {
    /// Degenerate rectangle around one point
    pub fn from_point(point: &SpatialPoint) -> Self {
        Self {
            min: point.coords().to_vec(),
            max: point.coords().to_vec(),
        }
    }

    /// Grow to cover `point`
    pub fn expand(&mut self, point: &SpatialPoint) {
        for (axis, &c) in point.coords().iter().enumerate() {
            if c < self.min[axis] {
                self.min[axis] = c;
            }
            if c > self.max[axis] {
                self.max[axis] = c;
            }
        }
    }

    /// Grow to cover another rectangle
    pub fn union(&mut self, other: &Rect) {
        for axis in 0..self.min.len() {
            self.min[axis] = self.min[axis].min(other.min[axis]);
            self.max[axis] = self.max[axis].max(other.max[axis]);
        }
    }

    /// Check if two rectangles share at least one point
    pub fn intersects(&self, other: &Rect) -> bool {
        (0..self.min.len()).all(|axis| {
            self.min[axis] <= other.max[axis] && self.max[axis] >= other.min[axis]
        })
    }

    /// Check if `other` lies entirely inside this rectangle
    pub fn covers(&self, other: &Rect) -> bool {
        (0..self.min.len()).all(|axis| {
            self.min[axis] <= other.min[axis] && self.max[axis] >= other.max[axis]
        })
    }

    /// Check if a point lies inside (inclusive)
    pub fn contains(&self, coords: &[f64]) -> bool {
        coords
            .iter()
            .enumerate()
            .all(|(axis, &c)| self.min[axis] <= c && c <= self.max[axis])
    }

    /// Squared distance from `coords` to the nearest point of the rectangle
    pub fn min_distance_sq(&self, coords: &[f64]) -> f64 {
        coords
            .iter()
            .enumerate()
            .map(|(axis, &c)| {
                let d = if c < self.min[axis] {
                    self.min[axis] - c
                } else if c > self.max[axis] {
                    c - self.max[axis]
                } else {
                    0.0
                };
                d * d
            })
            .sum()
    }

    /// Squared distance from `coords` to the farthest corner of the rectangle
    pub fn max_distance_sq(&self, coords: &[f64]) -> f64 {
        coords
            .iter()
            .enumerate()
            .map(|(axis, &c)| {
                let d = (c - self.min[axis]).abs().max((self.max[axis] - c).abs());
                d * d
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point() {
        let p = SpatialPoint::parse("1.0, 3.0", 2).unwrap();
        assert_eq!(p.coords(), &[1.0, 3.0]);
        assert_eq!(p.to_string(), "1,3");

        assert!(SpatialPoint::parse("_mmx.unknown", 2).is_err());
        assert!(SpatialPoint::parse("1.0,2.0,3.0", 2).is_err());
        assert!(SpatialPoint::parse("1.0,NaN", 2).is_err());
        assert!(SpatialPoint::parse("1.0,inf", 2).is_err());
        assert!(SpatialPoint::parse("", 2).is_err());
    }

    #[test]
    fn test_rect_predicates() {
        let mut rect = Rect::from_point(&SpatialPoint::new(vec![0.0, 0.0]).unwrap());
        rect.expand(&SpatialPoint::new(vec![4.0, 2.0]).unwrap());
        assert_eq!(rect.min, vec![0.0, 0.0]);
        assert_eq!(rect.max, vec![4.0, 2.0]);

        let inner = Rect { min: vec![1.0, 1.0], max: vec![2.0, 2.0] };
        let outside = Rect { min: vec![5.0, 5.0], max: vec![6.0, 6.0] };
        assert!(rect.covers(&inner));
        assert!(rect.intersects(&inner));
        assert!(!rect.intersects(&outside));
        assert!(rect.contains(&[4.0, 2.0]));
        assert!(!rect.contains(&[4.1, 2.0]));

        assert_eq!(rect.min_distance_sq(&[6.0, 2.0]), 4.0);
        assert_eq!(rect.min_distance_sq(&[2.0, 1.0]), 0.0);
        assert_eq!(rect.max_distance_sq(&[0.0, 0.0]), 20.0);
    }
}
