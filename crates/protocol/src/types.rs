//! Core wire and domain types for the movie command bus.
//!
//! Every message that crosses a channel is built from the types in this
//! module. The command itself is a sum type: an entity command carries a
//! `MoviePayload`, a search carries a `SearchRequest` with its own
//! correlation id. The legacy "sentinel id" convention only exists at the
//! codec boundary (see `codec.rs`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CodecError;

// =============================================================================
// Type Aliases
// =============================================================================

/// Primary key of a persisted movie.
///
/// Signed because the legacy wire format overloads negative values as
/// search sentinels. Real entity ids are always positive.
pub type MovieId = i64;

/// Unique identifier for a user submitting ratings
pub type UserId = u32;

/// Token linking a search command to every reply it produces
pub type CorrelationId = Uuid;

/// Legacy wire id meaning "search by title"
pub const SEARCH_BY_TITLE: MovieId = -1;

/// Legacy wire id meaning "search by genres"
pub const SEARCH_BY_GENRES: MovieId = -2;

// =============================================================================
// Operation Tags
// =============================================================================

/// The operation tag carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    New,
    Update,
    Delete,
    Get,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::New => "NEW",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Get => "GET",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEW" => Ok(Operation::New),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            "GET" => Ok(Operation::Get),
            _ => Err(CodecError::UnknownOperation(s.to_string())),
        }
    }
}

/// Which field a search matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SearchMode {
    Title,
    Genres,
}

impl SearchMode {
    /// The legacy sentinel id for this mode
    pub fn sentinel(self) -> MovieId {
        match self {
            SearchMode::Title => SEARCH_BY_TITLE,
            SearchMode::Genres => SEARCH_BY_GENRES,
        }
    }

    /// Map a legacy sentinel id back to its mode.
    ///
    /// Returns `None` for every id that is not a reserved sentinel,
    /// including positive entity ids.
    pub fn from_sentinel(id: MovieId) -> Option<Self> {
        match id {
            SEARCH_BY_TITLE => Some(SearchMode::Title),
            SEARCH_BY_GENRES => Some(SearchMode::Genres),
            _ => None,
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Title => f.write_str("title"),
            SearchMode::Genres => f.write_str("genres"),
        }
    }
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "title" => Ok(SearchMode::Title),
            "genres" | "genre" => Ok(SearchMode::Genres),
            other => Err(format!("unknown search mode '{}', expected title or genres", other)),
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Fields of an entity command (NEW, UPDATE, DELETE).
///
/// `id` stays optional here: a payload can arrive without one, and both the
/// emitter and the dispatcher must be able to reject it explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoviePayload {
    pub id: Option<MovieId>,
    pub title: String,
    pub genres: String,
}

impl MoviePayload {
    pub fn new(id: MovieId, title: impl Into<String>, genres: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            title: title.into(),
            genres: genres.into(),
        }
    }
}

/// A search request, isolated from every other search by its correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub correlation_id: CorrelationId,
    pub mode: SearchMode,
    /// Case-insensitive substring to look for
    pub query: String,
}

impl SearchRequest {
    /// Create a search with a freshly minted correlation id
    pub fn new(mode: SearchMode, query: impl Into<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            mode,
            query: query.into(),
        }
    }

    /// Whether `movie` satisfies this search
    pub fn matches(&self, movie: &MovieEntity) -> bool {
        let haystack = match self.mode {
            SearchMode::Title => &movie.title,
            SearchMode::Genres => &movie.genres,
        };
        haystack.to_lowercase().contains(&self.query.to_lowercase())
    }
}

/// A command travelling over the command channel.
///
/// Rust concept: an enum with data replaces the overloaded integer id.
/// A search can never be mistaken for an entity key because it is a
/// different variant altogether.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MovieCommand {
    New(MoviePayload),
    Update(MoviePayload),
    Delete(MoviePayload),
    Get(SearchRequest),
}

impl MovieCommand {
    pub fn search(mode: SearchMode, query: impl Into<String>) -> Self {
        MovieCommand::Get(SearchRequest::new(mode, query))
    }

    pub fn operation(&self) -> Operation {
        match self {
            MovieCommand::New(_) => Operation::New,
            MovieCommand::Update(_) => Operation::Update,
            MovieCommand::Delete(_) => Operation::Delete,
            MovieCommand::Get(_) => Operation::Get,
        }
    }

    /// The entity id of an entity command, `None` for searches and for
    /// payloads that arrived without one.
    pub fn entity_id(&self) -> Option<MovieId> {
        match self {
            MovieCommand::New(p) | MovieCommand::Update(p) | MovieCommand::Delete(p) => p.id,
            MovieCommand::Get(_) => None,
        }
    }

    /// The id as the legacy wire format would carry it: the entity key,
    /// or the sentinel for a search.
    pub fn wire_id(&self) -> Option<MovieId> {
        match self {
            MovieCommand::Get(search) => Some(search.mode.sentinel()),
            _ => self.entity_id(),
        }
    }
}

// =============================================================================
// Persisted Records
// =============================================================================

/// A persisted movie record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieEntity {
    pub id: MovieId,
    pub title: String,
    pub genres: String,
    #[serde(default)]
    pub average_rating: Option<f32>,
    /// Number of ratings folded into `average_rating`
    #[serde(default)]
    pub rating_count: u32,
}

impl MovieEntity {
    pub fn new(id: MovieId, title: impl Into<String>, genres: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            genres: genres.into(),
            average_rating: None,
            rating_count: 0,
        }
    }

    /// Fold one more rating into the running average
    pub fn apply_rating(&mut self, rating: f32) {
        let count = self.rating_count as f32;
        let current = self.average_rating.unwrap_or(0.0);
        self.average_rating = Some((current * count + rating) / (count + 1.0));
        self.rating_count += 1;
    }
}

impl fmt::Display for MovieEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} [{}]", self.id, self.title, self.genres)
    }
}

/// A single user rating for a movie.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub user_id: UserId,
    pub movie_id: MovieId,
    /// Rating value from 0.5 to 5.0
    pub rating: f32,
    /// Unix timestamp when the rating was made
    pub timestamp: i64,
}

/// Lowest and highest accepted rating value
pub const RATING_RANGE: RangeInclusive<f32> = 0.5..=5.0;

impl Rating {
    /// Whether the value lies in `RATING_RANGE`
    pub fn in_range(&self) -> bool {
        RATING_RANGE.contains(&self.rating)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_mapping() {
        assert_eq!(SearchMode::from_sentinel(-1), Some(SearchMode::Title));
        assert_eq!(SearchMode::from_sentinel(-2), Some(SearchMode::Genres));
        assert_eq!(SearchMode::from_sentinel(-3), None);
        assert_eq!(SearchMode::from_sentinel(1), None);
        assert_eq!(SearchMode::Genres.sentinel(), SEARCH_BY_GENRES);
    }

    #[test]
    fn test_operation_parsing() {
        assert_eq!("NEW".parse::<Operation>().unwrap(), Operation::New);
        assert_eq!("delete".parse::<Operation>().unwrap(), Operation::Delete);
        assert!(matches!(
            "PATCH".parse::<Operation>(),
            Err(CodecError::UnknownOperation(tag)) if tag == "PATCH"
        ));
    }

    #[test]
    fn test_search_matches_case_insensitive() {
        let movie = MovieEntity::new(1, "Inception", "Sci-Fi|Thriller");

        assert!(SearchRequest::new(SearchMode::Title, "incep").matches(&movie));
        assert!(SearchRequest::new(SearchMode::Genres, "sci").matches(&movie));
        assert!(!SearchRequest::new(SearchMode::Title, "sci").matches(&movie));
    }

    #[test]
    fn test_apply_rating_running_average() {
        let mut movie = MovieEntity::new(1, "Dune", "Sci-Fi");
        movie.apply_rating(4.0);
        movie.apply_rating(2.0);
        movie.apply_rating(3.0);

        assert_eq!(movie.rating_count, 3);
        assert!((movie.average_rating.unwrap() - 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_rating_range() {
        let mut rating = Rating {
            user_id: 1,
            movie_id: 1,
            rating: 0.5,
            timestamp: 0,
        };
        assert!(rating.in_range());
        rating.rating = 5.0;
        assert!(rating.in_range());
        rating.rating = 50.0;
        assert!(!rating.in_range());
        rating.rating = -1.0;
        assert!(!rating.in_range());
    }

    #[test]
    fn test_wire_id() {
        let search = MovieCommand::search(SearchMode::Genres, "drama");
        assert_eq!(search.wire_id(), Some(SEARCH_BY_GENRES));
        assert_eq!(search.entity_id(), None);

        let create = MovieCommand::New(MoviePayload::new(7, "Heat", "Crime"));
        assert_eq!(create.wire_id(), Some(7));
        assert_eq!(create.operation(), Operation::New);
    }
}
