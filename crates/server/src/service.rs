//! # Movie Service
//!
//! Wires every component to its channels and store, explicitly.
//!
//! ## Learning Goals
//!
//! This component teaches you:
//! - Spawning long-lived tokio tasks and stopping them with one `watch`
//! - Coercing `Arc<B>` into the trait objects each component needs
//! - Using `anyhow::Context` at the outermost library layer
//!
//! ## Tasks
//! 1. Command dispatcher (shared consumer group, one per worker)
//! 2. Rating consumer
//! 3. Response aggregator (own consumer group, sees every reply)
//! 4. Error listener (own consumer group, sees every report)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use broker::{Broker, Publisher, SendReceipt};
use protocol::{MovieCommand, MoviePayload, Rating, SearchMode, SearchRequest};
use store::MovieStore;

use crate::aggregator::{ResponseAggregator, SearchOutcome};
use crate::config::ServiceConfig;
use crate::dispatcher::CommandDispatcher;
use crate::emitter::{CommandEmitter, MovieRequest};
use crate::error_channel::{ErrorListener, ErrorPublisher};
use crate::publisher::ResponsePublisher;
use crate::ratings::RatingConsumer;

/// What an upload managed to publish
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub sent: usize,
    /// One message per row the emitter refused
    pub rejected: Vec<String>,
}

pub struct MovieService {
    config: ServiceConfig,
    emitter: CommandEmitter,
    aggregator: ResponseAggregator,
    errors: ErrorListener,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MovieService {
    /// Create topics, subscribe every listener, and spawn the worker tasks.
    ///
    /// Subscriptions are opened before this returns, so nothing published
    /// afterwards is missed.
    pub async fn start<B>(config: ServiceConfig, broker: Arc<B>, store: Arc<dyn MovieStore>) -> Result<Self>
    where
        B: Broker + 'static,
    {
        let topics = &config.topics;
        for topic in [&topics.commands, &topics.responses, &topics.errors, &topics.ratings] {
            broker
                .create_topic(topic, config.partitions)
                .await
                .with_context(|| format!("Failed to create topic {}", topic))?;
        }

        let publisher: Arc<dyn Publisher> = broker.clone();
        let error_publisher = ErrorPublisher::new(publisher.clone(), topics.errors.clone());
        let dispatcher = CommandDispatcher::new(
            store.clone(),
            ResponsePublisher::new(publisher.clone(), topics.responses.clone()),
            error_publisher.clone(),
        );
        let ratings = RatingConsumer::new(store, error_publisher);
        let aggregator = ResponseAggregator::new();
        let errors = ErrorListener::new(config.error_history);
        let emitter = CommandEmitter::new(publisher, topics.commands.clone(), topics.ratings.clone());

        let command_sub = broker
            .subscribe(&topics.commands, &config.consumer_group)
            .await
            .context("Failed to subscribe to command channel")?;
        let rating_sub = broker
            .subscribe(&topics.ratings, &format!("{}-ratings", config.consumer_group))
            .await
            .context("Failed to subscribe to ratings channel")?;
        // Every service instance needs every reply and every error report,
        // so those listeners get groups of their own
        let instance = Uuid::new_v4();
        let response_sub = broker
            .subscribe(&topics.responses, &format!("aggregator-{}", instance))
            .await
            .context("Failed to subscribe to response channel")?;
        let error_sub = broker
            .subscribe(&topics.errors, &format!("error-listener-{}", instance))
            .await
            .context("Failed to subscribe to error channel")?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(4);

        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { dispatcher.run(command_sub, rx).await }));

        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { ratings.run(rating_sub, rx).await }));

        let rx = shutdown_rx.clone();
        let listener = aggregator.clone();
        tasks.push(tokio::spawn(async move { listener.run(response_sub, rx).await }));

        let listener = errors.clone();
        tasks.push(tokio::spawn(async move { listener.run(error_sub, shutdown_rx).await }));

        info!(
            commands = %config.topics.commands,
            partitions = config.partitions,
            "Movie service started"
        );

        Ok(Self {
            config,
            emitter,
            aggregator,
            errors,
            shutdown,
            tasks,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn emitter(&self) -> &CommandEmitter {
        &self.emitter
    }

    pub fn aggregator(&self) -> &ResponseAggregator {
        &self.aggregator
    }

    /// The error channel listener
    pub fn errors(&self) -> &ErrorListener {
        &self.errors
    }

    /// Publish a command. The receipt means "on the channel", not "applied".
    pub async fn submit(&self, command: &MovieCommand) -> Result<SendReceipt> {
        Ok(self.emitter.submit(command).await?)
    }

    pub async fn create(&self, request: MovieRequest) -> Result<SendReceipt> {
        Ok(self.emitter.create(request).await?)
    }

    pub async fn update(&self, request: MovieRequest) -> Result<SendReceipt> {
        Ok(self.emitter.update(request).await?)
    }

    pub async fn delete(&self, request: MovieRequest) -> Result<SendReceipt> {
        Ok(self.emitter.delete(request).await?)
    }

    pub async fn rate(&self, rating: &Rating) -> Result<SendReceipt> {
        Ok(self.emitter.send_rating(rating).await?)
    }

    /// Publish a search and wait at most `timeout` for its results.
    pub async fn await_search_result(
        &self,
        mode: SearchMode,
        query: impl Into<String>,
        timeout: Duration,
    ) -> Result<SearchOutcome> {
        let request = SearchRequest::new(mode, query);
        let handle = self.aggregator.register(request.correlation_id);
        self.emitter
            .publish_search(request)
            .await
            .context("Failed to publish search")?;
        Ok(handle.await_results(timeout).await)
    }

    /// Search with the configured timeout
    pub async fn search(&self, mode: SearchMode, query: impl Into<String>) -> Result<SearchOutcome> {
        self.await_search_result(mode, query, self.config.search_timeout())
            .await
    }

    /// Parse a movie CSV upload and emit one NEW per row.
    ///
    /// A parse error rejects the whole upload. Rows the emitter refuses
    /// are reported and the rest are still sent.
    pub async fn upload_movies(&self, csv: &str) -> Result<UploadReport> {
        let movies = data_loader::parse_movies(csv).context("Failed to parse movie upload")?;
        self.publish_movies(movies).await
    }

    /// Emit one NEW per parsed movie row, e.g. from `data_loader::load_movies`
    pub async fn publish_movies(&self, movies: Vec<MoviePayload>) -> Result<UploadReport> {
        let mut report = UploadReport::default();
        for (row, movie) in movies.into_iter().enumerate() {
            match self.emitter.create(MovieRequest::from(movie)).await {
                Ok(_) => report.sent += 1,
                Err(e) => {
                    warn!(row = row + 1, error = %e, "Upload row rejected");
                    report.rejected.push(format!("row {}: {}", row + 1, e));
                }
            }
        }
        info!(sent = report.sent, rejected = report.rejected.len(), "Movie upload published");
        Ok(report)
    }

    /// Parse a rating CSV upload and emit one rating per row
    pub async fn upload_ratings(&self, csv: &str) -> Result<UploadReport> {
        let ratings = data_loader::parse_ratings(csv).context("Failed to parse rating upload")?;
        self.publish_ratings(&ratings).await
    }

    /// Emit every rating in order
    pub async fn publish_ratings(&self, ratings: &[Rating]) -> Result<UploadReport> {
        let mut report = UploadReport::default();
        for rating in ratings {
            self.emitter
                .send_rating(rating)
                .await
                .context("Failed to publish rating")?;
            report.sent += 1;
        }
        info!(sent = report.sent, "Rating upload published");
        Ok(report)
    }

    /// Stop every task and wait for them to finish
    pub async fn shutdown(self) -> Result<()> {
        // Receivers may already be gone if the broker closed first
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            task.await.context("Worker task panicked")?;
        }
        info!("Movie service stopped");
        Ok(())
    }
}
