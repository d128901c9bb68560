//! # Protocol Crate
//!
//! Wire types and codecs shared by every component of the movie command bus.
//!
//! ## Components
//!
//! - **types**: `MovieCommand` (a sum type over NEW/UPDATE/DELETE/GET),
//!   `MovieEntity`, `Rating`, search modes and correlation ids
//! - **codec**: `encode`/`decode` for commands, the legacy sentinel-id
//!   convention, and the routing key used for partition placement
//! - **reply**: `SearchReply` messages for the response channel
//!
//! ## Example Usage
//!
//! ```ignore
//! use protocol::{codec, MovieCommand, SearchMode};
//!
//! let command = MovieCommand::search(SearchMode::Title, "incep");
//! let bytes = codec::encode(&command)?;
//! let key = codec::routing_key(&command);
//! assert_eq!(codec::decode(&bytes)?, command);
//! ```

pub mod codec;
pub mod error;
pub mod reply;
pub mod types;

pub use codec::{decode, encode, routing_key};
pub use error::{CodecError, Result};
pub use reply::SearchReply;
pub use types::{
    CorrelationId, MovieCommand, MovieEntity, MovieId, MoviePayload, Operation, Rating,
    SearchMode, SearchRequest, UserId, RATING_RANGE, SEARCH_BY_GENRES, SEARCH_BY_TITLE,
};
