//! Error types for the CANEdge parser

use thiserror::Error;

/// Errors that can occur while parsing and routing CAN log records
#[derive(Debug, Error)]
pub enum CanParseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration file: {0}")]
    ConfigError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnv(String),

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Timestamp out of range: {0}")]
    TimestampOutOfRange(String),

    #[error("Date parse error: {0}")]
    DateParseError(String),

    #[error("Invalid COB-ID: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid latency annotation: {0}")]
    InvalidLatency(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Missing field {field} in record")]
    MissingField { field: String },
}

impl CanParseError {
    /// Errors that only invalidate a single record; the file keeps going.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            CanParseError::TimestampOutOfRange(_)
                | CanParseError::InvalidIdentifier(_)
                | CanParseError::InvalidPayload(_)
                | CanParseError::InvalidLatency(_)
                | CanParseError::MissingField { .. }
        )
    }
}
