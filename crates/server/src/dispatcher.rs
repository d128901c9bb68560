//! # Command Dispatcher
//!
//! Consumes the command channel and applies each command to the store.
//!
//! ## Learning Goals
//!
//! This component teaches you:
//! - Matching on a sum type instead of decoding an overloaded integer
//! - Catching every error at one boundary so the consume loop never dies
//! - Stopping a long-lived task with a `watch` shutdown signal
//!
//! ## Behaviour per operation
//! - NEW: insert; an existing id is never overwritten, the record is
//!   stored under a freshly assigned id instead
//! - UPDATE / DELETE: the id must be present and must exist
//! - GET: every match is published individually, then a completion marker
//! - Unknown operation tags are logged and dropped

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use broker::{Record, Subscription};
use protocol::{
    codec, CorrelationId, MovieCommand, MovieEntity, MovieId, MoviePayload, SearchMode,
    SearchRequest,
};
use store::MovieStore;

use crate::error::{DispatchError, Result};
use crate::error_channel::ErrorPublisher;
use crate::publisher::ResponsePublisher;

/// What applying one command did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Created(MovieId),
    /// NEW collided with an existing id and was stored under `assigned`
    Reassigned { requested: MovieId, assigned: MovieId },
    Updated(MovieId),
    Deleted(MovieId),
    Searched {
        correlation_id: CorrelationId,
        matches: usize,
    },
    /// Not applied and not reported (unknown operation tag)
    Dropped(String),
}

/// Worker-side command handler.
#[derive(Clone)]
pub struct CommandDispatcher {
    store: Arc<dyn MovieStore>,
    responses: ResponsePublisher,
    errors: ErrorPublisher,
}

impl CommandDispatcher {
    pub fn new(store: Arc<dyn MovieStore>, responses: ResponsePublisher, errors: ErrorPublisher) -> Self {
        Self {
            store,
            responses,
            errors,
        }
    }

    /// Decode and apply one wire payload.
    pub async fn handle(&self, payload: &[u8]) -> Result<DispatchOutcome> {
        let command = match codec::decode(payload) {
            Ok(command) => command,
            Err(e) if e.is_unknown_operation() => {
                warn!(error = %e, "Dropping command with invalid operation");
                return Ok(DispatchOutcome::Dropped(e.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        self.apply(command).await
    }

    /// Apply an already decoded command
    pub async fn apply(&self, command: MovieCommand) -> Result<DispatchOutcome> {
        match command {
            MovieCommand::New(payload) => self.create(payload).await,
            MovieCommand::Update(payload) => self.update(payload).await,
            MovieCommand::Delete(payload) => self.delete(payload).await,
            MovieCommand::Get(search) => self.search(search).await,
        }
    }

    /// Handle one record, sending any failure to the error channel.
    ///
    /// Returns `None` when the command failed.
    pub async fn process(&self, record: &Record) -> Option<DispatchOutcome> {
        match self.handle(&record.payload).await {
            Ok(outcome) => {
                debug!(partition = record.partition, offset = record.offset, ?outcome, "Dispatched");
                Some(outcome)
            }
            Err(e) => {
                error!(
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Command failed"
                );
                if let Err(report_err) = self.errors.report(&e.to_string()).await {
                    error!(error = %report_err, "Failed to publish to error channel");
                }
                None
            }
        }
    }

    /// Consume `subscription` until shutdown or the broker closes.
    pub async fn run(&self, mut subscription: Box<dyn Subscription>, mut shutdown: watch::Receiver<bool>) {
        info!("Command dispatcher started");
        let mut processed = 0u64;
        loop {
            tokio::select! {
                record = subscription.next() => match record {
                    Some(record) => {
                        self.process(&record).await;
                        processed += 1;
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        info!(processed, "Command dispatcher stopped");
    }

    #[instrument(skip(self, payload), fields(id = ?payload.id))]
    async fn create(&self, payload: MoviePayload) -> Result<DispatchOutcome> {
        let id = payload.id.ok_or_else(DispatchError::missing_id)?;

        if !self.store.contains(id).await? {
            self.store
                .put(MovieEntity::new(id, payload.title, payload.genres))
                .await?;
            info!("Created movie");
            return Ok(DispatchOutcome::Created(id));
        }

        let assigned = self.next_free_id().await?;
        self.store
            .put(MovieEntity::new(assigned, payload.title, payload.genres))
            .await?;
        warn!(assigned, "Movie id already taken, stored under a new id");
        Ok(DispatchOutcome::Reassigned {
            requested: id,
            assigned,
        })
    }

    /// First free key at or after `count() + 1`
    async fn next_free_id(&self) -> Result<MovieId> {
        let mut candidate = self.store.count().await? as MovieId + 1;
        while self.store.contains(candidate).await? {
            candidate += 1;
        }
        Ok(candidate)
    }

    /// Check that an UPDATE/DELETE names an existing movie
    async fn existing(&self, id: Option<MovieId>) -> Result<MovieEntity> {
        let id = id.ok_or_else(DispatchError::missing_id)?;
        self.store
            .get(id)
            .await?
            .ok_or_else(|| DispatchError::not_found(id))
    }

    #[instrument(skip(self, payload), fields(id = ?payload.id))]
    async fn update(&self, payload: MoviePayload) -> Result<DispatchOutcome> {
        let current = self.existing(payload.id).await?;
        let id = current.id;
        self.store
            .put(MovieEntity {
                title: payload.title,
                genres: payload.genres,
                ..current
            })
            .await?;
        info!("Updated movie");
        Ok(DispatchOutcome::Updated(id))
    }

    #[instrument(skip(self, payload), fields(id = ?payload.id))]
    async fn delete(&self, payload: MoviePayload) -> Result<DispatchOutcome> {
        let current = self.existing(payload.id).await?;
        self.store.delete(current.id).await?;
        info!("Deleted movie");
        Ok(DispatchOutcome::Deleted(current.id))
    }

    #[instrument(skip(self, search), fields(correlation_id = %search.correlation_id, mode = %search.mode))]
    async fn search(&self, search: SearchRequest) -> Result<DispatchOutcome> {
        let found = match search.mode {
            SearchMode::Title => self.store.find_by_title_contains(&search.query).await?,
            SearchMode::Genres => self.store.find_by_genres_contains(&search.query).await?,
        };
        let total = found.len();

        for movie in found {
            self.responses.publish_match(search.correlation_id, movie).await?;
        }
        self.responses
            .publish_complete(search.correlation_id, total)
            .await?;

        info!(total, "Search answered");
        Ok(DispatchOutcome::Searched {
            correlation_id: search.correlation_id,
            matches: total,
        })
    }
}
