//! Command Emitter: caller input to well-formed commands on the channel.
//!
//! Validation that can be done without the store happens here, before
//! anything is published. A successful return is a transport-level
//! acknowledgement only: the command is on the log, not yet applied.

use std::sync::Arc;

use tracing::{debug, info};

use broker::{Publisher, SendReceipt};
use protocol::{
    codec, CorrelationId, MovieCommand, MovieId, MoviePayload, Operation, Rating, SearchMode,
    SearchRequest,
};

use crate::error::EmitError;

pub type Result<T> = std::result::Result<T, EmitError>;

/// Movie fields as a caller supplies them.
///
/// `operation` is whatever the caller claimed; each emitter endpoint
/// decides the operation that is actually sent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MovieRequest {
    pub id: Option<MovieId>,
    pub operation: Option<Operation>,
    pub title: String,
    pub genres: String,
}

impl MovieRequest {
    pub fn new(id: MovieId, title: impl Into<String>, genres: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            operation: None,
            title: title.into(),
            genres: genres.into(),
        }
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }
}

impl From<MoviePayload> for MovieRequest {
    fn from(payload: MoviePayload) -> Self {
        Self {
            id: payload.id,
            operation: None,
            title: payload.title,
            genres: payload.genres,
        }
    }
}

/// Caller-side publisher of commands and ratings
#[derive(Clone)]
pub struct CommandEmitter {
    publisher: Arc<dyn Publisher>,
    commands_topic: String,
    ratings_topic: String,
}

impl CommandEmitter {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        commands_topic: impl Into<String>,
        ratings_topic: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            commands_topic: commands_topic.into(),
            ratings_topic: ratings_topic.into(),
        }
    }

    /// Publish a command, keyed by its routing key.
    ///
    /// Entity commands without an id are rejected here.
    pub async fn submit(&self, command: &MovieCommand) -> Result<SendReceipt> {
        if !matches!(command, MovieCommand::Get(_)) && command.entity_id().is_none() {
            return Err(EmitError::MissingId);
        }

        let key = codec::routing_key(command);
        let payload = codec::encode(command)?;
        let receipt = self
            .publisher
            .send(&self.commands_topic, Some(&key), payload)
            .await?;

        debug!(
            operation = %command.operation(),
            key = %key,
            partition = receipt.partition,
            offset = receipt.offset,
            "Command accepted"
        );
        Ok(receipt)
    }

    pub async fn create(&self, request: MovieRequest) -> Result<SendReceipt> {
        let payload = Self::prepare(request, Operation::New, true)?;
        self.submit(&MovieCommand::New(payload)).await
    }

    pub async fn update(&self, request: MovieRequest) -> Result<SendReceipt> {
        let payload = Self::prepare(request, Operation::Update, true)?;
        self.submit(&MovieCommand::Update(payload)).await
    }

    pub async fn delete(&self, request: MovieRequest) -> Result<SendReceipt> {
        let payload = Self::prepare(request, Operation::Delete, false)?;
        self.submit(&MovieCommand::Delete(payload)).await
    }

    /// Publish a search under a new correlation id.
    ///
    /// Callers that want the results must register the id with the
    /// aggregator first; see `publish_search`.
    pub async fn search(&self, mode: SearchMode, query: impl Into<String>) -> Result<(CorrelationId, SendReceipt)> {
        let request = SearchRequest::new(mode, query);
        let correlation_id = request.correlation_id;
        let receipt = self.publish_search(request).await?;
        Ok((correlation_id, receipt))
    }

    /// Publish a search whose correlation id is already registered
    pub async fn publish_search(&self, request: SearchRequest) -> Result<SendReceipt> {
        self.submit(&MovieCommand::Get(request)).await
    }

    /// Publish a rating keyed by movie id
    pub async fn send_rating(&self, rating: &Rating) -> Result<SendReceipt> {
        if !rating.in_range() {
            return Err(EmitError::RatingOutOfRange(rating.rating));
        }
        let key = rating.movie_id.to_string();
        let payload = codec::encode_rating(rating)?;
        Ok(self
            .publisher
            .send(&self.ratings_topic, Some(&key), payload)
            .await?)
    }

    fn prepare(request: MovieRequest, endpoint: Operation, require_fields: bool) -> Result<MoviePayload> {
        if let Some(claimed) = request.operation {
            if claimed != endpoint {
                info!(%claimed, %endpoint, "Claimed operation differs from endpoint, sending endpoint's");
            }
        }

        let id = request.id.ok_or(EmitError::MissingId)?;
        if id <= 0 {
            return Err(EmitError::InvalidId(id));
        }
        if require_fields {
            if request.title.trim().is_empty() {
                return Err(EmitError::Blank("title"));
            }
            if request.genres.trim().is_empty() {
                return Err(EmitError::Blank("genres"));
            }
        }

        Ok(MoviePayload {
            id: Some(id),
            title: request.title,
            genres: request.genres,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker::InMemoryBroker;

    fn setup() -> (CommandEmitter, InMemoryBroker) {
        let broker = InMemoryBroker::new();
        broker.create_topic("movies", 3).unwrap();
        broker.create_topic("ratings", 3).unwrap();
        let emitter = CommandEmitter::new(Arc::new(broker.clone()), "movies", "ratings");
        (emitter, broker)
    }

    #[tokio::test]
    async fn test_missing_id_is_rejected_before_publishing() {
        let (emitter, broker) = setup();
        let request = MovieRequest {
            title: "Heat".to_string(),
            genres: "Crime".to_string(),
            ..Default::default()
        };

        assert!(matches!(emitter.create(request.clone()).await, Err(EmitError::MissingId)));
        assert!(matches!(emitter.delete(request).await, Err(EmitError::MissingId)));
        assert!(broker.is_empty("movies"));
    }

    #[tokio::test]
    async fn test_non_positive_id_is_rejected_before_publishing() {
        let (emitter, broker) = setup();

        let result = emitter.create(MovieRequest::new(0, "Heat", "Crime")).await;
        assert!(matches!(result, Err(EmitError::InvalidId(0))));
        let result = emitter.delete(MovieRequest::new(-1, "", "")).await;
        assert!(matches!(result, Err(EmitError::InvalidId(-1))));
        assert!(broker.is_empty("movies"));
    }

    #[tokio::test]
    async fn test_out_of_range_rating_is_rejected() {
        let (emitter, broker) = setup();

        for value in [50.0, -1.0, 0.0] {
            let rating = Rating {
                user_id: 3,
                movie_id: 42,
                rating: value,
                timestamp: 0,
            };
            let result = emitter.send_rating(&rating).await;
            assert!(matches!(result, Err(EmitError::RatingOutOfRange(r)) if r == value));
        }
        assert!(broker.is_empty("ratings"));
    }

    #[tokio::test]
    async fn test_blank_fields_are_rejected() {
        let (emitter, broker) = setup();

        let result = emitter.update(MovieRequest::new(1, "  ", "Drama")).await;
        assert!(matches!(result, Err(EmitError::Blank("title"))));
        let result = emitter.create(MovieRequest::new(1, "Heat", "")).await;
        assert!(matches!(result, Err(EmitError::Blank("genres"))));

        // DELETE only needs the id
        emitter.delete(MovieRequest::new(1, "", "")).await.unwrap();
        assert_eq!(broker.len("movies"), 1);
    }

    #[tokio::test]
    async fn test_claimed_operation_is_corrected() {
        let (emitter, broker) = setup();
        let request = MovieRequest::new(7, "Heat", "Crime").with_operation(Operation::Delete);

        emitter.create(request).await.unwrap();

        let command = codec::decode(&broker.records("movies")[0].payload).unwrap();
        assert_eq!(command.operation(), Operation::New);
    }

    #[tokio::test]
    async fn test_same_entity_same_partition() {
        let (emitter, _) = setup();

        let created = emitter.create(MovieRequest::new(42, "Dune", "Sci-Fi")).await.unwrap();
        let updated = emitter.update(MovieRequest::new(42, "Dune II", "Sci-Fi")).await.unwrap();
        let deleted = emitter.delete(MovieRequest::new(42, "", "")).await.unwrap();

        assert_eq!(created.partition, updated.partition);
        assert_eq!(updated.partition, deleted.partition);
        assert!(created.offset < updated.offset && updated.offset < deleted.offset);
    }

    #[tokio::test]
    async fn test_search_and_rating() {
        let (emitter, broker) = setup();

        let (correlation_id, _) = emitter.search(SearchMode::Title, "incep").await.unwrap();
        let commands = broker.records("movies");
        let expected_key = correlation_id.to_string();
        assert_eq!(commands[0].key.as_deref(), Some(expected_key.as_str()));

        let rating = Rating {
            user_id: 3,
            movie_id: 42,
            rating: 4.5,
            timestamp: 0,
        };
        emitter.send_rating(&rating).await.unwrap();
        let ratings = broker.records("ratings");
        assert_eq!(ratings[0].key.as_deref(), Some("42"));
        assert_eq!(codec::decode_rating(&ratings[0].payload).unwrap(), rating);
    }
}
