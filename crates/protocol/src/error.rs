//! Error types for the protocol crate.

use thiserror::Error;

use crate::types::{MovieId, SearchMode};

/// Errors raised while encoding or decoding a wire payload
///
/// Every variant except `Encode` is a decode failure: the payload that
/// reached a consumer cannot be turned into a command.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Not valid JSON, or a required field is missing
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// The operation tag is not one of NEW, UPDATE, DELETE, GET
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// A GET carried an id that is not a reserved sentinel
    #[error("Invalid search id {0}: expected -1 (title) or -2 (genres)")]
    InvalidSentinel(MovieId),

    /// An entity command carried a non-positive id
    #[error("Invalid movie id {0}: entity ids must be positive")]
    InvalidId(MovieId),

    /// The explicit search mode disagrees with the sentinel id
    #[error("Search mode {mode} conflicts with sentinel id {sentinel}")]
    Conflict { mode: SearchMode, sentinel: MovieId },

    #[error("Failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),
}

impl CodecError {
    /// Unknown operations are dropped by consumers rather than reported
    pub fn is_unknown_operation(&self) -> bool {
        matches!(self, CodecError::UnknownOperation(_))
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, CodecError>;
