//! Error taxonomy for the analysis pipeline.
//!
//! Only [`SourceError`] and [`PipelineError`] ever reach a caller of the batch
//! or cache APIs. The remaining types describe failures that are absorbed
//! locally: they are logged, counted, and the affected document, text, or
//! comment is excluded or degraded.

use std::path::PathBuf;

use thiserror::Error;

/// A single document could not be read or decoded. The document is skipped.
#[derive(Debug, Error)]
pub enum DocumentReadError {
    #[error("failed to read document {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed document {key}: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("document {key} does not exist")]
    Missing { key: String },
}

impl DocumentReadError {
    pub fn key(&self) -> &str {
        match self {
            DocumentReadError::Io { key, .. }
            | DocumentReadError::Malformed { key, .. }
            | DocumentReadError::Missing { key } => key,
        }
    }
}

/// The text scorer failed on one input. Callers substitute the neutral result.
#[derive(Debug, Clone, Error)]
#[error("scoring failed: {message}")]
pub struct ScoringError {
    pub message: String,
}

impl ScoringError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A comment's `publish_time` did not match the expected layout.
#[derive(Debug, Error)]
#[error("unparsable publish_time {value:?}: {source}")]
pub struct TimeParseError {
    pub value: String,
    #[source]
    pub source: chrono::ParseError,
}

/// Durable cache storage failed.
#[derive(Debug, Error)]
pub enum CacheIoError {
    #[error("failed to read cache file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write cache file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove cache file {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache file {} is not a valid analysis result: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode analysis result: {0}")]
    Encode(#[source] serde_json::Error),
}

/// The document source as a whole cannot be enumerated.
#[derive(Debug, Error)]
#[error("document source {location} is unreadable: {source}")]
pub struct SourceError {
    pub location: String,
    #[source]
    pub source: std::io::Error,
}

/// Errors surfaced by batch runs and cache population.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("analysis run was cancelled")]
    Cancelled,

    #[error("worker pool failure: {0}")]
    Worker(String),
}
