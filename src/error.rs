//! Error types for Reel

use std::io;
use thiserror::Error;

/// Result type for Reel operations
pub type Result<T> = std::result::Result<T, ReelError>;

/// Errors that can occur in Reel
#[derive(Debug, Error)]
pub enum ReelError {
    /// I/O error while creating, reading or writing a cassette
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Cassette content could not be parsed
    #[error("Malformed cassette at line {line}: {reason}")]
    MalformedCassette {
        /// 1-based line number of the offending record
        line: usize,
        /// Parser message
        reason: String,
    },

    /// Cassette file not found
    #[error("Cassette file not found: {0}")]
    FileNotFound(String),

    /// Append attempted after the recorder was stopped
    #[error("Recorder is closed")]
    RecorderClosed,

    /// Remote origin could not be reached or did not answer in time
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// No unconsumed interaction was accepted by the comparator
    #[error("No recorded match for {method} {uri} ({remaining} interactions unconsumed)")]
    NoMatch {
        /// Request method
        method: String,
        /// Request URI
        uri: String,
        /// Interactions still available
        remaining: usize,
    },

    /// Every interaction in the cassette has been consumed
    #[error("Cassette exhausted: all {consumed} interactions already replayed")]
    Exhausted {
        /// Number of interactions served so far
        consumed: usize,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Request/response too large
    #[error("Data too large: {size} bytes exceeds limit of {limit} bytes")]
    DataTooLarge {
        /// Actual size
        size: usize,
        /// Size limit
        limit: usize,
    },

    /// Inbound request could not be turned into an outbound one
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl ReelError {
    /// Whether this error means replay found nothing to serve
    #[must_use]
    pub fn is_no_recorded_match(&self) -> bool {
        matches!(self, Self::NoMatch { .. } | Self::Exhausted { .. })
    }
}
