//! Server configuration

use geoflux_core::incremental::IncrementalIndexConfig;
use geoflux_core::storage::StorageConfig;
use geoflux_core::GeoFluxError;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// HTTP listen address
    pub http_addr: SocketAddr,
    /// Data directory
    pub data_dir: PathBuf,
    /// Rows per live index before it is persisted
    pub max_rows: usize,
    /// Reject rows with unparsable values
    pub strict_parsing: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8086)),
            data_dir: PathBuf::from("data"),
            max_rows: geoflux_core::config::MAX_ROWS_PER_INDEX,
            strict_parsing: false,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `GEOFLUX_*` environment variables
    pub fn from_env() -> Result<Self, GeoFluxError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, GeoFluxError> {
        let mut config = Self::default();

        if let Some(addr) = lookup("GEOFLUX_HTTP_ADDR") {
            config.http_addr = addr
                .parse()
                .map_err(|_| GeoFluxError::Config(format!("Invalid GEOFLUX_HTTP_ADDR: {}", addr)))?;
        }
        if let Some(dir) = lookup("GEOFLUX_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(rows) = lookup("GEOFLUX_MAX_ROWS") {
            config.max_rows = rows
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| GeoFluxError::Config(format!("Invalid GEOFLUX_MAX_ROWS: {}", rows)))?;
        }
        if let Some(strict) = lookup("GEOFLUX_STRICT_PARSING") {
            config.strict_parsing = match strict.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(GeoFluxError::Config(format!(
                        "Invalid GEOFLUX_STRICT_PARSING: {}",
                        strict
                    )))
                }
            };
        }

        Ok(config)
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            data_dir: self.data_dir.clone(),
            index: IncrementalIndexConfig {
                max_rows: self.max_rows,
                strict_parsing: self.strict_parsing,
            },
            ..Default::default()
        }
    }
}
