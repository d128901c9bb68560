//! Error types for the server crate.
//!
//! Two families:
//! - `DispatchError`: raised on the worker side while applying a command.
//!   Never returned to a caller; its text goes to the error channel.
//! - `EmitError`: raised on the caller side before or while publishing.

use thiserror::Error;

use broker::BrokerError;
use protocol::{CodecError, MovieId};
use store::StoreError;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Decode error: {0}")]
    Decode(#[from] CodecError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Publish error: {0}")]
    Publish(#[from] BrokerError),
}

impl DispatchError {
    pub fn missing_id() -> Self {
        DispatchError::Validation("missing id".to_string())
    }

    pub fn not_found(id: MovieId) -> Self {
        DispatchError::Validation(format!("entity not found: {}", id))
    }

    pub fn rating_out_of_range(rating: f32) -> Self {
        DispatchError::Validation(format!("rating {} outside 0.5..=5.0", rating))
    }
}

#[derive(Error, Debug)]
pub enum EmitError {
    #[error("Movie id is missing")]
    MissingId,

    #[error("Movie id must be positive, got {0}")]
    InvalidId(MovieId),

    #[error("Rating {0} outside 0.5..=5.0")]
    RatingOutOfRange(f32),

    #[error("Field '{0}' must not be blank")]
    Blank(&'static str),

    #[error("Encode error: {0}")]
    Codec(#[from] CodecError),

    #[error("Publish error: {0}")]
    Publish(#[from] BrokerError),
}

pub type Result<T> = std::result::Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_text_for_error_channel() {
        assert_eq!(DispatchError::missing_id().to_string(), "Validation error: missing id");
        assert_eq!(
            DispatchError::not_found(7).to_string(),
            "Validation error: entity not found: 7"
        );
        assert_eq!(
            DispatchError::rating_out_of_range(50.0).to_string(),
            "Validation error: rating 50 outside 0.5..=5.0"
        );
        assert_eq!(
            DispatchError::from(CodecError::InvalidSentinel(3)).to_string(),
            "Decode error: Invalid search id 3: expected -1 (title) or -2 (genres)"
        );
    }
}
