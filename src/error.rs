//! Error types for Funnel Flux

use thiserror::Error;

/// Errors that can occur while computing funnel metrics
#[derive(Debug, Error)]
pub enum FunnelError {
    #[error("Failed to read input: {0}")]
    InputRead(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Malformed event at index {index} (id: {}): {field}", .id.as_deref().unwrap_or("unknown"))]
    MalformedEvent {
        index: usize,
        id: Option<String>,
        field: String,
    },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Cannot start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl From<std::io::Error> for FunnelError {
    fn from(e: std::io::Error) -> Self {
        FunnelError::InputRead(e.to_string())
    }
}
