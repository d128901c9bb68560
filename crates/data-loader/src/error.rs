//! Error types for the data-loader crate.
//!
//! Rust error handling concepts demonstrated:
//! - thiserror for defining custom error types
//! - Enum variants for different error cases
//! - Error messages with context

use thiserror::Error;

/// Errors that can occur while reading an upload
///
/// Rust concept: Using an enum for errors lets us handle different cases.
/// Every per-line variant carries the 1-based line number so a caller can
/// point at the offending row of the upload.
#[derive(Error, Debug)]
pub enum DataLoadError {
    /// File could not be found or opened
    #[error("Failed to open file: {path}")]
    FileNotFound { path: String },

    /// I/O error occurred while reading file
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Line couldn't be parsed
    #[error("Parse error at line {line} in {file}: {reason}")]
    ParseError {
        file: String,
        line: usize,
        reason: String,
    },

    /// Expected number of fields in a line doesn't match actual
    #[error("Expected at least {expected} fields but found {found} in line {line}")]
    FieldCountMismatch {
        expected: usize,
        found: usize,
        line: usize,
    },

    /// A field parsed but its value is out of range
    #[error("Invalid value for {field} at line {line}: {value}")]
    InvalidValue {
        field: String,
        value: String,
        line: usize,
    },

    /// The upload contained no data rows
    #[error("Upload is empty")]
    Empty,
}

impl DataLoadError {
    /// Line the error points at, if it is a per-line error
    pub fn line(&self) -> Option<usize> {
        match self {
            DataLoadError::ParseError { line, .. }
            | DataLoadError::FieldCountMismatch { line, .. }
            | DataLoadError::InvalidValue { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, DataLoadError>;
