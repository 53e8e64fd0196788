//! Index schema: spatial dimensions and typed metrics
//!
//! Plain dimensions are discovered from the rows themselves; only spatial
//! dimensions and metrics need to be declared up front.

use crate::{GeoFluxError, Result};
use serde::{Deserialize, Serialize};

/// Storage type of a metric column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Long,
    Double,
}

/// Declared metric column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
}

impl MetricSpec {
    pub fn long(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metric_type: MetricType::Long,
        }
    }

    pub fn double(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metric_type: MetricType::Double,
        }
    }
}

/// Declared spatial dimension
///
/// With no `source_dims` the dimension's own values are comma-separated
/// coordinate strings. Otherwise the coordinates are taken from the first
/// value of each source dimension, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpatialDimensionSpec {
    pub name: String,
    #[serde(default)]
    pub source_dims: Vec<String>,
    pub arity: usize,
}

impl SpatialDimensionSpec {
    /// Spatial dimension whose values are delimited coordinate strings
    pub fn delimited(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            source_dims: Vec::new(),
            arity,
        }
    }

    /// Spatial dimension assembled from one dimension per axis
    pub fn from_dims<I, S>(name: impl Into<String>, source_dims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let source_dims: Vec<String> = source_dims.into_iter().map(Into::into).collect();
        Self {
            name: name.into(),
            arity: source_dims.len(),
            source_dims,
        }
    }
}

/// Schema of an incremental index or segment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSchema {
    #[serde(default)]
    pub spatial_dimensions: Vec<SpatialDimensionSpec>,
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
}

impl IndexSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_spatial_dimension(mut self, spec: SpatialDimensionSpec) -> Self {
        self.spatial_dimensions.push(spec);
        self
    }

    pub fn with_metric(mut self, spec: MetricSpec) -> Self {
        self.metrics.push(spec);
        self
    }

    /// Look up a spatial dimension by name
    pub fn spatial_dimension(&self, name: &str) -> Option<&SpatialDimensionSpec> {
        self.spatial_dimensions.iter().find(|s| s.name == name)
    }

    /// Look up a metric by name
    pub fn metric(&self, name: &str) -> Option<&MetricSpec> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// Reject duplicate names, zero arity and name clashes between metrics and spatial dimensions
    pub fn validate(&self) -> Result<()> {
        for (i, spatial) in self.spatial_dimensions.iter().enumerate() {
            if spatial.arity == 0 {
                return Err(GeoFluxError::Config(format!(
                    "Spatial dimension {} has zero arity",
                    spatial.name
                )));
            }
            if !spatial.source_dims.is_empty() && spatial.source_dims.len() != spatial.arity {
                return Err(GeoFluxError::Config(format!(
                    "Spatial dimension {} declares arity {} but {} source dimensions",
                    spatial.name,
                    spatial.arity,
                    spatial.source_dims.len()
                )));
            }
            if self.spatial_dimensions[..i].iter().any(|s| s.name == spatial.name) {
                return Err(GeoFluxError::Config(format!(
                    "Duplicate spatial dimension {}",
                    spatial.name
                )));
            }
            if self.metric(&spatial.name).is_some() {
                return Err(GeoFluxError::Config(format!(
                    "{} declared as both metric and spatial dimension",
                    spatial.name
                )));
            }
        }
        for (i, metric) in self.metrics.iter().enumerate() {
            if self.metrics[..i].iter().any(|m| m.name == metric.name) {
                return Err(GeoFluxError::Config(format!(
                    "Duplicate metric {}",
                    metric.name
                )));
            }
        }
        Ok(())
    }

    /// Union of two schemas, first-seen order
    ///
    /// Fails when both declare the same spatial dimension with different
    /// arity or the same metric with different types.
    pub fn merge(&self, other: &IndexSchema) -> Result<IndexSchema> {
        let mut merged = self.clone();

        for spatial in &other.spatial_dimensions {
            match merged.spatial_dimension(&spatial.name) {
                Some(existing) if existing.arity != spatial.arity => {
                    return Err(GeoFluxError::IncompatibleSchema(format!(
                        "spatial dimension {} has arity {} and {}",
                        spatial.name, existing.arity, spatial.arity
                    )));
                }
                Some(_) => {}
                None => merged.spatial_dimensions.push(spatial.clone()),
            }
        }

        for metric in &other.metrics {
            match merged.metric(&metric.name) {
                Some(existing) if existing.metric_type != metric.metric_type => {
                    return Err(GeoFluxError::IncompatibleSchema(format!(
                        "metric {} has types {:?} and {:?}",
                        metric.name, existing.metric_type, metric.metric_type
                    )));
                }
                Some(_) => {}
                None => merged.metrics.push(metric.clone()),
            }
        }

        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geo_schema() -> IndexSchema {
        IndexSchema::new()
            .with_spatial_dimension(SpatialDimensionSpec::delimited("dim.geo", 2))
            .with_metric(MetricSpec::long("val"))
    }

    #[test]
    fn test_schema_validate() {
        assert!(geo_schema().validate().is_ok());

        let zero = IndexSchema::new().with_spatial_dimension(SpatialDimensionSpec::delimited("g", 0));
        assert!(matches!(zero.validate(), Err(GeoFluxError::Config(_))));

        let dup = geo_schema().with_metric(MetricSpec::double("val"));
        assert!(dup.validate().is_err());

        let clash = geo_schema().with_metric(MetricSpec::long("dim.geo"));
        assert!(clash.validate().is_err());
    }

    #[test]
    fn test_schema_merge() {
        let other = IndexSchema::new()
            .with_spatial_dimension(SpatialDimensionSpec::from_dims("loc", ["lat", "lon"]))
            .with_metric(MetricSpec::double("ratio"))
            .with_metric(MetricSpec::long("val"));

        let merged = geo_schema().merge(&other).unwrap();
        assert_eq!(merged.spatial_dimensions.len(), 2);
        assert_eq!(merged.metrics.len(), 2);
        assert_eq!(merged.metrics[0].name, "val");
        assert_eq!(merged.spatial_dimension("loc").unwrap().arity, 2);
    }

    #[test]
    fn test_schema_merge_conflicts() {
        let arity3 = IndexSchema::new().with_spatial_dimension(SpatialDimensionSpec::delimited("dim.geo", 3));
        assert!(matches!(
            geo_schema().merge(&arity3),
            Err(GeoFluxError::IncompatibleSchema(_))
        ));

        let double_val = IndexSchema::new().with_metric(MetricSpec::double("val"));
        assert!(matches!(
            geo_schema().merge(&double_val),
            Err(GeoFluxError::IncompatibleSchema(_))
        ));
    }

    #[test]
    fn test_schema_json() {
        let json = r#"{
            "spatialDimensions": [{"name": "dim.geo", "arity": 2}],
            "metrics": [{"name": "val", "type": "long"}]
        }"#;
        let schema: IndexSchema = serde_json::from_str(json).unwrap();
        assert_eq!(schema, geo_schema());
    }
}
