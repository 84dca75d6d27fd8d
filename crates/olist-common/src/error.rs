//! Error types shared across the Olist crates

use thiserror::Error;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, OlistError>;

/// Errors raised by shared configuration and environment handling
#[derive(Error, Debug)]
pub enum OlistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl OlistError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
