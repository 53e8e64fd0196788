//! Storage - named data sources and their persisted segments

mod datasource;
mod engine;

pub use datasource::{DataSource, DataSourceStats};
pub use engine::{EngineStats, StorageEngine};

use crate::incremental::IncrementalIndexConfig;
use std::path::PathBuf;

/// Storage engine configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Data directory, one subdirectory per data source
    pub data_dir: PathBuf,
    /// Configuration of every live index
    pub index: IncrementalIndexConfig,
    /// Persisted segments that trigger a compaction
    pub compaction_trigger: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            index: IncrementalIndexConfig::default(),
            compaction_trigger: crate::config::COMPACTION_TRIGGER,
        }
    }
}
