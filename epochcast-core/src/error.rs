//! Error types for the Epochcast core library.
//!
//! Uses `thiserror` for public API error types with structured variants covering
//! message delivery, chart rendering, and configuration.

use std::path::PathBuf;

/// Top-level error type for the Epochcast core library.
#[derive(Debug, thiserror::Error)]
pub enum EpochcastError {
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from sending text or images to the chat endpoint.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("HTTP request failed: {message}")]
    Http { message: String },

    #[error("Telegram API error ({status}): {description}")]
    Api { status: u16, description: String },

    #[error("Response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Failed to read image {path}: {message}")]
    ImageRead { path: PathBuf, message: String },

    #[error("Invalid proxy '{url}': {message}")]
    Proxy { url: String, message: String },
}

/// Errors from building or rasterizing a metrics chart.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("No epochs recorded yet")]
    EmptyHistory,

    #[error("No training metric to chart")]
    NoMetrics,

    #[error("Metric '{name}' was never reported")]
    MissingMetric { name: String },

    #[error("Metric '{name}' has {values} values for {epochs} epochs")]
    LengthMismatch {
        name: String,
        epochs: usize,
        values: usize,
    },

    #[error("Failed to load font {path}: {message}")]
    FontLoad { path: PathBuf, message: String },

    #[error("Drawing failed: {message}")]
    Backend { message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::ParseError {
            message: err.to_string(),
        }
    }
}

/// A type alias for results using the top-level `EpochcastError`.
pub type Result<T> = std::result::Result<T, EpochcastError>;
