//! Response Publisher: puts search results on the response channel.

use std::sync::Arc;

use tracing::debug;

use broker::{Publisher, SendReceipt};
use protocol::{CorrelationId, MovieEntity, SearchReply};

use crate::error::Result;

/// Emits `SearchReply` messages keyed by correlation id, so every reply
/// of one search lands on one partition in order.
#[derive(Clone)]
pub struct ResponsePublisher {
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl ResponsePublisher {
    pub fn new(publisher: Arc<dyn Publisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    /// Publish one located movie for the search `correlation_id`
    pub async fn publish_match(
        &self,
        correlation_id: CorrelationId,
        movie: MovieEntity,
    ) -> Result<SendReceipt> {
        debug!(%correlation_id, movie_id = movie.id, "Publishing match");
        self.send(SearchReply::Match {
            correlation_id,
            movie,
        })
        .await
    }

    /// Publish the completion marker after the last match
    pub async fn publish_complete(
        &self,
        correlation_id: CorrelationId,
        total: usize,
    ) -> Result<SendReceipt> {
        debug!(%correlation_id, total, "Publishing completion");
        self.send(SearchReply::Complete {
            correlation_id,
            total,
        })
        .await
    }

    async fn send(&self, reply: SearchReply) -> Result<SendReceipt> {
        let key = reply.correlation_id().to_string();
        let payload = reply.encode()?;
        Ok(self.publisher.send(&self.topic, Some(&key), payload).await?)
    }
}
