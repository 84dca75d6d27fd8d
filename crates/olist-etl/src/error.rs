//! Error types for load runs
//!
//! Only run-level failures are errors. A record that is rejected or whose
//! reference cannot be resolved is counted in [`crate::LoadResult`] instead.

use std::path::PathBuf;
use thiserror::Error;

pub type EtlResult<T> = std::result::Result<T, EtlError>;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Source file not found or unreadable: {}", path.display())]
    SourceNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed header in {}: {reason}", path.display())]
    MalformedHeader { path: PathBuf, reason: String },

    #[error("Failed to read {} at line {line}: {message}", path.display())]
    SourceRead {
        path: PathBuf,
        line: u64,
        message: String,
    },

    #[error("Failed to load lookup table {table}: {source}")]
    Lookup {
        table: String,
        #[source]
        source: Box<EtlError>,
    },

    #[error(
        "Write to {table} failed on batch {batch} after {committed_batches} committed batches \
         ({committed_rows} rows): {source}"
    )]
    WriteFailure {
        table: String,
        batch: usize,
        committed_batches: usize,
        committed_rows: u64,
        #[source]
        source: Box<EtlError>,
    },

    #[error(
        "Load of {table} aborted after {committed_batches} committed batches \
         ({committed_rows} rows): {source}"
    )]
    Aborted {
        table: String,
        committed_batches: usize,
        committed_rows: u64,
        #[source]
        source: Box<EtlError>,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unexpected value in column {column}: {message}")]
    Decode { column: usize, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error(transparent)]
    Common(#[from] olist_common::OlistError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Committed batch and row counts for a run that failed after writing
    /// began.
    pub fn committed(&self) -> Option<(usize, u64)> {
        match self {
            EtlError::WriteFailure {
                committed_batches,
                committed_rows,
                ..
            }
            | EtlError::Aborted {
                committed_batches,
                committed_rows,
                ..
            } => Some((*committed_batches, *committed_rows)),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for EtlError {
    fn from(err: config::ConfigError) -> Self {
        EtlError::Config(err.to_string())
    }
}
