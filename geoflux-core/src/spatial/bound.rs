//! Query bounds over spatial points

use super::point::{Rect, SpatialPoint};
use serde::{Deserialize, Serialize};

/// Geometric predicate used by spatial filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Bound {
    /// Every point within Euclidean `radius` of `coords`
    #[serde(rename_all = "camelCase")]
    Radius { coords: Vec<f64>, radius: f64 },
    /// Every point with `min_coords[i] <= p[i] <= max_coords[i]` on each axis
    #[serde(rename_all = "camelCase")]
    Rectangular {
        min_coords: Vec<f64>,
        max_coords: Vec<f64>,
    },
    /// Every 2-D point inside or on the boundary of the polygon
    #[serde(rename_all = "camelCase")]
    Polygon {
        abscissa: Vec<f64>,
        ordinate: Vec<f64>,
    },
}

impl Bound {
    pub fn radius(coords: Vec<f64>, radius: f64) -> Self {
        Bound::Radius { coords, radius }
    }

    pub fn rectangular(min_coords: Vec<f64>, max_coords: Vec<f64>) -> Self {
        Bound::Rectangular {
            min_coords,
            max_coords,
        }
    }

    pub fn polygon(abscissa: Vec<f64>, ordinate: Vec<f64>) -> Self {
        Bound::Polygon { abscissa, ordinate }
    }

    /// Number of axes the bound is defined over
    pub fn arity(&self) -> usize {
        match self {
            Bound::Radius { coords, .. } => coords.len(),
            Bound::Rectangular { min_coords, .. } => min_coords.len(),
            Bound::Polygon { .. } => 2,
        }
    }

    /// Check the bound is geometrically meaningful
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Bound::Radius { coords, radius } => {
                if coords.is_empty() || coords.iter().any(|c| !c.is_finite()) {
                    return Err("radius bound needs finite center coordinates".into());
                }
                if !radius.is_finite() || *radius < 0.0 {
                    return Err(format!("radius must be finite and non-negative, got {}", radius));
                }
            }
            Bound::Rectangular {
                min_coords,
                max_coords,
            } => {
                if min_coords.is_empty() || min_coords.len() != max_coords.len() {
                    return Err(format!(
                        "rectangular bound has {} min and {} max coordinates",
                        min_coords.len(),
                        max_coords.len()
                    ));
                }
                for (axis, (lo, hi)) in min_coords.iter().zip(max_coords).enumerate() {
                    if lo.is_nan() || hi.is_nan() || lo > hi {
                        return Err(format!("rectangular bound axis {} has min {} > max {}", axis, lo, hi));
                    }
                }
            }
            Bound::Polygon { abscissa, ordinate } => {
                if abscissa.len() != ordinate.len() {
                    return Err("polygon abscissa and ordinate lengths differ".into());
                }
                if abscissa.len() < 3 {
                    return Err("polygon needs at least 3 vertices".into());
                }
                if abscissa.iter().chain(ordinate).any(|c| !c.is_finite()) {
                    return Err("polygon vertices must be finite".into());
                }
            }
        }
        Ok(())
    }

    /// Exact membership test for one point
    pub fn contains(&self, point: &SpatialPoint) -> bool {
        match self {
            Bound::Radius { coords, radius } => point.distance_sq(coords) <= radius * radius,
            Bound::Rectangular {
                min_coords,
                max_coords,
            } => point
                .coords()
                .iter()
                .enumerate()
                .all(|(axis, &c)| min_coords[axis] <= c && c <= max_coords[axis]),
            Bound::Polygon { abscissa, ordinate } => {
                polygon_contains(abscissa, ordinate, point.get(0), point.get(1))
            }
        }
    }

    /// Whether any point of `rect` could match; used to prune subtrees
    pub fn intersects(&self, rect: &Rect) -> bool {
        match self {
            Bound::Radius { coords, radius } => rect.min_distance_sq(coords) <= radius * radius,
            Bound::Rectangular {
                min_coords,
                max_coords,
            } => rect.intersects(&Rect {
                min: min_coords.clone(),
                max: max_coords.clone(),
            }),
            Bound::Polygon { abscissa, ordinate } => {
                rect.intersects(&polygon_extent(abscissa, ordinate))
            }
        }
    }

    /// Whether every point of `rect` matches, so a subtree can be taken whole
    pub fn covers(&self, rect: &Rect) -> bool {
        match self {
            Bound::Radius { coords, radius } => rect.max_distance_sq(coords) <= radius * radius,
            Bound::Rectangular {
                min_coords,
                max_coords,
            } => Rect {
                min: min_coords.clone(),
                max: max_coords.clone(),
            }
            .covers(rect),
            Bound::Polygon { .. } => false,
        }
    }
}

fn polygon_extent(abscissa: &[f64], ordinate: &[f64]) -> Rect {
    let fold = |vals: &[f64]| {
        vals.iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    };
    let (min_x, max_x) = fold(abscissa);
    let (min_y, max_y) = fold(ordinate);
    Rect {
        min: vec![min_x, min_y],
        max: vec![max_x, max_y],
    }
}

fn polygon_contains(xs: &[f64], ys: &[f64], x: f64, y: f64) -> bool {
    let n = xs.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi, xj, yj) = (xs[i], ys[i], xs[j], ys[j]);

        // on the edge counts as inside
        let cross = (xj - xi) * (y - yi) - (yj - yi) * (x - xi);
        if cross.abs() <= f64::EPSILON
            && x >= xi.min(xj)
            && x <= xi.max(xj)
            && y >= yi.min(yj)
            && y <= yi.max(yj)
        {
            return true;
        }

        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(x: f64, y: f64) -> SpatialPoint {
        SpatialPoint::new(vec![x, y]).unwrap()
    }

    #[test]
    fn test_radius_bound() {
        let bound = Bound::radius(vec![0.0, 0.0], 5.0);
        assert!(bound.contains(&pt(0.0, 0.0)));
        assert!(bound.contains(&pt(1.0, 3.0)));
        assert!(bound.contains(&pt(4.0, 2.0)));
        assert!(bound.contains(&pt(3.0, 4.0)));
        assert!(!bound.contains(&pt(7.0, 3.0)));

        let zero = Bound::radius(vec![1.0, 3.0], 0.0);
        assert!(zero.contains(&pt(1.0, 3.0)));
        assert!(!zero.contains(&pt(1.0, 3.000001)));
    }

    #[test]
    fn test_rectangular_bound() {
        let bound = Bound::rectangular(vec![0.0, 0.0], vec![9.0, 9.0]);
        assert!(bound.contains(&pt(0.0, 0.0)));
        assert!(bound.contains(&pt(9.0, 9.0)));
        assert!(bound.contains(&pt(8.0, 6.0)));
        assert!(!bound.contains(&pt(10.5, 3.0)));
    }

    #[test]
    fn test_polygon_bound() {
        let square = Bound::polygon(vec![0.0, 4.0, 4.0, 0.0], vec![0.0, 0.0, 4.0, 4.0]);
        assert!(square.contains(&pt(2.0, 2.0)));
        assert!(square.contains(&pt(4.0, 2.0)));
        assert!(square.contains(&pt(0.0, 0.0)));
        assert!(!square.contains(&pt(4.5, 2.0)));

        let triangle = Bound::polygon(vec![0.0, 10.0, 0.0], vec![0.0, 0.0, 10.0]);
        assert!(triangle.contains(&pt(1.0, 3.0)));
        assert!(!triangle.contains(&pt(8.0, 6.0)));
    }

    #[test]
    fn test_pruning_predicates() {
        let rect = Rect { min: vec![10.0, 10.0], max: vec![20.0, 20.0] };
        let far = Bound::radius(vec![0.0, 0.0], 5.0);
        assert!(!far.intersects(&rect));
        assert!(!far.covers(&rect));

        let big = Bound::radius(vec![15.0, 15.0], 100.0);
        assert!(big.intersects(&rect));
        assert!(big.covers(&rect));

        let boxed = Bound::rectangular(vec![0.0, 0.0], vec![15.0, 15.0]);
        assert!(boxed.intersects(&rect));
        assert!(!boxed.covers(&rect));
    }

    #[test]
    fn test_bound_validation() {
        assert!(Bound::radius(vec![0.0, 0.0], -1.0).validate().is_err());
        assert!(Bound::radius(vec![], 1.0).validate().is_err());
        assert!(Bound::rectangular(vec![0.0, 5.0], vec![9.0, 1.0]).validate().is_err());
        assert!(Bound::rectangular(vec![0.0], vec![9.0, 1.0]).validate().is_err());
        assert!(Bound::polygon(vec![0.0, 1.0], vec![0.0, 1.0]).validate().is_err());
        assert!(Bound::rectangular(vec![0.0, 0.0], vec![9.0, 9.0]).validate().is_ok());
    }

    #[test]
    fn test_bound_json() {
        let bound: Bound =
            serde_json::from_str(r#"{"type":"rectangular","minCoords":[0,0],"maxCoords":[9,9]}"#)
                .unwrap();
        assert_eq!(bound, Bound::rectangular(vec![0.0, 0.0], vec![9.0, 9.0]));

        let bound: Bound =
            serde_json::from_str(r#"{"type":"radius","coords":[0.0,0.0],"radius":5}"#).unwrap();
        assert_eq!(bound.arity(), 2);
    }
}
