//! Command Codec: `MovieCommand` <-> wire bytes.
//!
//! The wire format is a flat JSON object with named fields:
//!
//! ```text
//! {"operation":"UPDATE","id":5,"title":"Dune Part Two","genres":"Sci-Fi"}
//! {"operation":"GET","id":-1,"title":"incep","genres":"","correlationId":"…","mode":"TITLE"}
//! ```
//!
//! Searches still carry their legacy sentinel id (`-1` title, `-2` genres)
//! next to the explicit `mode` and `correlationId`, so a consumer that only
//! knows the sentinel convention can read them. Decoding accepts payloads
//! carrying either form, and rejects a GET whose id is not a sentinel.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CodecError, Result};
use crate::types::*;

/// Routing key used when an entity command arrived without an id
pub const UNKEYED: &str = "unkeyed";

/// Flat wire record. Field names, not positions, carry meaning.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCommand {
    #[serde(alias = "movieType")]
    operation: String,
    #[serde(default, alias = "Id")]
    id: Option<MovieId>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    genres: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mode: Option<SearchMode>,
}

impl From<&MovieCommand> for WireCommand {
    fn from(command: &MovieCommand) -> Self {
        match command {
            MovieCommand::New(p) | MovieCommand::Update(p) | MovieCommand::Delete(p) => {
                WireCommand {
                    operation: command.operation().as_str().to_string(),
                    id: command.wire_id(),
                    title: Some(p.title.clone()),
                    genres: Some(p.genres.clone()),
                    correlation_id: None,
                    mode: None,
                }
            }
            MovieCommand::Get(search) => {
                // The query rides in the field it searches, the other stays empty
                let (title, genres) = match search.mode {
                    SearchMode::Title => (search.query.clone(), String::new()),
                    SearchMode::Genres => (String::new(), search.query.clone()),
                };
                WireCommand {
                    operation: Operation::Get.as_str().to_string(),
                    id: command.wire_id(),
                    title: Some(title),
                    genres: Some(genres),
                    correlation_id: Some(search.correlation_id),
                    mode: Some(search.mode),
                }
            }
        }
    }
}

/// Encode a command into its wire payload
pub fn encode(command: &MovieCommand) -> Result<Vec<u8>> {
    serde_json::to_vec(&WireCommand::from(command)).map_err(CodecError::Encode)
}

/// Decode a wire payload into a command
///
/// # Errors
/// - `Malformed` for invalid JSON or a missing `operation`
/// - `UnknownOperation` for an unrecognised tag
/// - `InvalidId` for a non-positive id on NEW/UPDATE/DELETE
/// - `InvalidSentinel` / `Conflict` for an inconsistent GET
pub fn decode(bytes: &[u8]) -> Result<MovieCommand> {
    let wire: WireCommand =
        serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;

    match wire.operation.parse::<Operation>()? {
        Operation::New => entity_payload(wire).map(MovieCommand::New),
        Operation::Update => entity_payload(wire).map(MovieCommand::Update),
        Operation::Delete => entity_payload(wire).map(MovieCommand::Delete),
        Operation::Get => search_request(wire).map(MovieCommand::Get),
    }
}

fn entity_payload(wire: WireCommand) -> Result<MoviePayload> {
    // A missing id is left for the dispatcher to reject; a negative one
    // would collide with the search sentinels
    if let Some(id) = wire.id {
        if id <= 0 {
            return Err(CodecError::InvalidId(id));
        }
    }
    Ok(MoviePayload {
        id: wire.id,
        title: wire.title.unwrap_or_default(),
        genres: wire.genres.unwrap_or_default(),
    })
}

fn search_request(wire: WireCommand) -> Result<SearchRequest> {
    let from_sentinel = match wire.id {
        Some(id) => Some(SearchMode::from_sentinel(id).ok_or(CodecError::InvalidSentinel(id))?),
        None => None,
    };

    let mode = match (wire.mode, from_sentinel) {
        (Some(mode), Some(sentinel_mode)) if mode != sentinel_mode => {
            return Err(CodecError::Conflict {
                mode,
                sentinel: sentinel_mode.sentinel(),
            });
        }
        (Some(mode), _) | (None, Some(mode)) => mode,
        (None, None) => {
            return Err(CodecError::Malformed(
                "search carries neither a mode nor a sentinel id".to_string(),
            ));
        }
    };

    let query = match mode {
        SearchMode::Title => wire.title,
        SearchMode::Genres => wire.genres,
    }
    .unwrap_or_default();

    Ok(SearchRequest {
        // Legacy payloads have no correlation id; give them one so their
        // replies can still be told apart
        correlation_id: wire.correlation_id.unwrap_or_else(Uuid::new_v4),
        mode,
        query,
    })
}

/// Partition key for a command.
///
/// Entity commands route by entity id, so every command for one movie lands
/// on the same partition and is applied in publish order. Searches route by
/// correlation id: concurrent searches do not queue behind each other.
pub fn routing_key(command: &MovieCommand) -> String {
    match command {
        MovieCommand::Get(search) => search.correlation_id.to_string(),
        _ => command
            .entity_id()
            .map(|id| id.to_string())
            .unwrap_or_else(|| UNKEYED.to_string()),
    }
}

pub fn encode_rating(rating: &Rating) -> Result<Vec<u8>> {
    serde_json::to_vec(rating).map_err(CodecError::Encode)
}

pub fn decode_rating(bytes: &[u8]) -> Result<Rating> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_str(json: &str) -> Result<MovieCommand> {
        decode(json.as_bytes())
    }

    #[test]
    fn test_round_trip_entity_commands() {
        let commands = vec![
            MovieCommand::New(MoviePayload::new(5, "Dune", "Sci-Fi")),
            MovieCommand::Update(MoviePayload::new(5, "Dune Part Two", "Sci-Fi")),
            MovieCommand::Delete(MoviePayload::new(5, "", "")),
            MovieCommand::Update(MoviePayload {
                id: None,
                title: "No Id".to_string(),
                genres: "Drama".to_string(),
            }),
        ];

        for command in commands {
            let bytes = encode(&command).unwrap();
            assert_eq!(decode(&bytes).unwrap(), command);
        }
    }

    #[test]
    fn test_round_trip_search_keeps_correlation_id() {
        let command = MovieCommand::search(SearchMode::Genres, "sci");
        let decoded = decode(&encode(&command).unwrap()).unwrap();
        assert_eq!(decoded, command);
    }

    #[test]
    fn test_search_is_encoded_with_sentinel() {
        let command = MovieCommand::search(SearchMode::Title, "Incep");
        let json: serde_json::Value = serde_json::from_slice(&encode(&command).unwrap()).unwrap();

        assert_eq!(json["operation"], "GET");
        assert_eq!(json["id"], -1);
        assert_eq!(json["title"], "Incep");
        assert_eq!(json["genres"], "");
        assert_eq!(json["mode"], "TITLE");
    }

    #[test]
    fn test_decode_legacy_sentinel_payload() {
        let command =
            decode_str(r#"{"id":-2,"movieType":"GET","title":"","genres":"drama"}"#).unwrap();

        match command {
            MovieCommand::Get(search) => {
                assert_eq!(search.mode, SearchMode::Genres);
                assert_eq!(search.query, "drama");
            }
            other => panic!("expected a search, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_positive_id_on_get() {
        let result = decode_str(r#"{"operation":"GET","id":3,"title":"x","genres":""}"#);
        assert!(matches!(result, Err(CodecError::InvalidSentinel(3))));
    }

    #[test]
    fn test_decode_rejects_conflicting_mode() {
        let result = decode_str(r#"{"operation":"GET","id":-1,"title":"x","mode":"GENRES"}"#);
        assert!(matches!(result, Err(CodecError::Conflict { .. })));
    }

    #[test]
    fn test_decode_rejects_negative_entity_id() {
        let result = decode_str(r#"{"operation":"NEW","id":-1,"title":"x","genres":"y"}"#);
        assert!(matches!(result, Err(CodecError::InvalidId(-1))));
    }

    #[test]
    fn test_decode_unknown_operation() {
        let result = decode_str(r#"{"operation":"PATCH","id":1}"#);
        assert!(result.unwrap_err().is_unknown_operation());
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(decode_str("not json"), Err(CodecError::Malformed(_))));
        // operation is required
        assert!(matches!(
            decode_str(r#"{"id":1,"title":"x"}"#),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            decode_str(r#"{"operation":"GET","title":"x"}"#),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_null_id_is_kept_for_validation() {
        let command = decode_str(r#"{"operation":"DELETE","id":null}"#).unwrap();
        assert_eq!(command.entity_id(), None);
        assert_eq!(routing_key(&command), UNKEYED);
    }

    #[test]
    fn test_routing_keys() {
        let update = MovieCommand::Update(MoviePayload::new(42, "A", "B"));
        assert_eq!(routing_key(&update), "42");

        let first = MovieCommand::search(SearchMode::Title, "a");
        let second = MovieCommand::search(SearchMode::Title, "a");
        // Same mode, different requests: no shared key
        assert_ne!(routing_key(&first), routing_key(&second));
    }

    #[test]
    fn test_rating_codec() {
        let rating = Rating {
            user_id: 1,
            movie_id: 31,
            rating: 2.5,
            timestamp: 1260759144,
        };
        let decoded = decode_rating(&encode_rating(&rating).unwrap()).unwrap();
        assert_eq!(decoded, rating);
        assert!(decode_rating(b"{}").is_err());
    }
}
