//! Error types for GeoFlux

use thiserror::Error;

/// Result type alias for GeoFlux operations
pub type Result<T> = std::result::Result<T, GeoFluxError>;

/// GeoFlux error types
#[derive(Error, Debug)]
pub enum GeoFluxError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Invalid data format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Compression/decompression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Incremental index is full and must be persisted before more rows fit
    #[error("Capacity exceeded: index already holds {max_rows} rows")]
    CapacityExceeded { max_rows: usize },

    /// Row rejected by strict parsing
    #[error("Parse rejected for dimension {dimension} (value {value:?}): {reason}")]
    ParseRejected {
        dimension: String,
        value: String,
        reason: String,
    },

    /// Segments disagree on a dimension or metric definition
    #[error("Incompatible schema: {0}")]
    IncompatibleSchema(String),

    /// Filter references an unknown dimension or carries an invalid bound
    #[error("Malformed filter: {0}")]
    MalformedFilter(String),

    /// Query is structurally invalid
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Query abandoned through its cancellation token
    #[error("Query cancelled during {0}")]
    Cancelled(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data source not found
    #[error("Data source not found: {0}")]
    DataSourceNotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GeoFluxError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, GeoFluxError::Io(_))
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            GeoFluxError::Corruption(_) | GeoFluxError::ChecksumMismatch { .. }
        )
    }

    /// Check if the caller, not the engine, is at fault
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            GeoFluxError::CapacityExceeded { .. }
                | GeoFluxError::ParseRejected { .. }
                | GeoFluxError::IncompatibleSchema(_)
                | GeoFluxError::MalformedFilter(_)
                | GeoFluxError::InvalidQuery(_)
                | GeoFluxError::Config(_)
        )
    }
}
