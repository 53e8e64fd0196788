//! Storage engine - registry of data sources

use super::{DataSource, DataSourceStats, StorageConfig};
use crate::query::{QueryResult, TimeseriesEngine, TimeseriesQuery};
use crate::schema::IndexSchema;
use crate::{GeoFluxError, InputRow, Result};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// GeoFlux storage engine
pub struct StorageEngine {
    config: StorageConfig,
    datasources: RwLock<HashMap<String, Arc<DataSource>>>,
}

impl StorageEngine {
    /// Create a storage engine, reopening every data source under `data_dir`
    pub fn new(config: StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let engine = Self {
            config,
            datasources: RwLock::new(HashMap::new()),
        };
        engine.load_datasources()?;

        Ok(engine)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Create a data source
    pub fn create_datasource(&self, name: &str, schema: IndexSchema) -> Result<Arc<DataSource>> {
        validate_name(name)?;
        let mut datasources = self.datasources.write();

        if datasources.contains_key(name) {
            return Err(GeoFluxError::Config(format!(
                "Data source {} already exists",
                name
            )));
        }

        let ds = Arc::new(self.open(name, schema)?);
        datasources.insert(name.to_string(), ds.clone());

        info!("Created data source: {}", name);

        Ok(ds)
    }

    /// Get a data source by name
    pub fn get_datasource(&self, name: &str) -> Option<Arc<DataSource>> {
        self.datasources.read().get(name).cloned()
    }

    fn datasource(&self, name: &str) -> Result<Arc<DataSource>> {
        self.get_datasource(name)
            .ok_or_else(|| GeoFluxError::DataSourceNotFound(name.to_string()))
    }

    /// Drop a data source and its files
    pub fn drop_datasource(&self, name: &str) -> Result<()> {
        let removed = self.datasources.write().remove(name);
        let ds = removed.ok_or_else(|| GeoFluxError::DataSourceNotFound(name.to_string()))?;

        if ds.dir().exists() {
            std::fs::remove_dir_all(ds.dir())?;
        }

        info!("Dropped data source: {}", name);

        Ok(())
    }

    /// Data source names, sorted
    pub fn list_datasources(&self) -> Vec<String> {
        let mut names: Vec<String> = self.datasources.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Append rows to a data source
    pub fn append(&self, name: &str, rows: &[InputRow]) -> Result<usize> {
        self.datasource(name)?.append_batch(rows)
    }

    /// Persist the live index of every data source
    pub fn persist_all(&self) -> Result<()> {
        let datasources: Vec<_> = self.datasources.read().values().cloned().collect();
        for ds in datasources {
            ds.persist()?;
        }
        Ok(())
    }

    /// Run a query against the data source it names
    pub fn query(&self, query: &TimeseriesQuery) -> Result<QueryResult> {
        self.query_with(query, &TimeseriesEngine::new())
    }

    /// Run a query on a caller-supplied engine
    pub fn query_with(&self, query: &TimeseriesQuery, engine: &TimeseriesEngine) -> Result<QueryResult> {
        self.datasource(&query.data_source)?.query_with(query, engine)
    }

    /// Get engine statistics
    pub fn stats(&self) -> EngineStats {
        let datasources = self.datasources.read();
        let mut ds_stats: Vec<_> = datasources.values().map(|ds| ds.stats()).collect();
        ds_stats.sort_by(|a, b| a.name.cmp(&b.name));

        EngineStats {
            datasource_count: ds_stats.len(),
            total_rows: ds_stats.iter().map(|s| s.live_rows + s.segment_rows).sum(),
            total_segments: ds_stats.iter().map(|s| s.segments).sum(),
            total_size_bytes: ds_stats.iter().map(|s| s.size_bytes).sum(),
            datasources: ds_stats,
        }
    }

    fn open(&self, name: &str, schema: IndexSchema) -> Result<DataSource> {
        DataSource::open(
            name,
            &self.config.data_dir,
            schema,
            self.config.index.clone(),
            self.config.compaction_trigger,
        )
    }

    fn load_datasources(&self) -> Result<()> {
        for entry in std::fs::read_dir(&self.config.data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !entry.path().join(crate::config::SCHEMA_FILE_NAME).exists() {
                continue;
            }

            let opened = DataSource::read_schema(&entry.path()).and_then(|schema| self.open(&name, schema));
            match opened {
                Ok(ds) => {
                    self.datasources.write().insert(name.clone(), Arc::new(ds));
                    info!("Loaded data source: {}", name);
                }
                Err(e) => {
                    warn!("Failed to load data source {}: {}", name, e);
                }
            }
        }

        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(GeoFluxError::Config(format!("Invalid data source name: {:?}", name)))
    }
}

/// Storage engine statistics
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub datasource_count: usize,
    pub total_rows: usize,
    pub total_segments: usize,
    pub total_size_bytes: u64,
    pub datasources: Vec<DataSourceStats>,
}
