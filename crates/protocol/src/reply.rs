//! Messages carried on the response channel.
//!
//! A search produces one `Match` per located movie followed by a single
//! `Complete` carrying the number of matches sent. Both are tagged with the
//! correlation id of the originating search.

use serde::{Deserialize, Serialize};

use crate::error::{CodecError, Result};
use crate::types::{CorrelationId, MovieEntity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchReply {
    #[serde(rename_all = "camelCase")]
    Match {
        correlation_id: CorrelationId,
        movie: MovieEntity,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        correlation_id: CorrelationId,
        total: usize,
    },
}

impl SearchReply {
    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            SearchReply::Match { correlation_id, .. } => *correlation_id,
            SearchReply::Complete { correlation_id, .. } => *correlation_id,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(CodecError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}
