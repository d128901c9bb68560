//! Rating consumer: folds ratings into each movie's running average.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info};

use broker::{Record, Subscription};
use protocol::{codec, MovieEntity};
use store::MovieStore;

use crate::error::{DispatchError, Result};
use crate::error_channel::ErrorPublisher;

#[derive(Clone)]
pub struct RatingConsumer {
    store: Arc<dyn MovieStore>,
    errors: ErrorPublisher,
}

impl RatingConsumer {
    pub fn new(store: Arc<dyn MovieStore>, errors: ErrorPublisher) -> Self {
        Self { store, errors }
    }

    /// Decode one rating and apply it, returning the updated movie
    pub async fn handle(&self, payload: &[u8]) -> Result<MovieEntity> {
        let rating = codec::decode_rating(payload)?;
        if !rating.in_range() {
            return Err(DispatchError::rating_out_of_range(rating.rating));
        }
        let mut movie = self
            .store
            .get(rating.movie_id)
            .await?
            .ok_or_else(|| DispatchError::not_found(rating.movie_id))?;

        movie.apply_rating(rating.rating);
        self.store.put(movie.clone()).await?;
        debug!(
            movie_id = movie.id,
            user_id = rating.user_id,
            average = ?movie.average_rating,
            "Applied rating"
        );
        Ok(movie)
    }

    /// Same as `handle`, with failures sent to the error channel
    pub async fn process(&self, record: &Record) -> Option<MovieEntity> {
        match self.handle(&record.payload).await {
            Ok(movie) => Some(movie),
            Err(e) => {
                error!(offset = record.offset, error = %e, "Rating failed");
                if let Err(report_err) = self.errors.report(&e.to_string()).await {
                    error!(error = %report_err, "Failed to publish to error channel");
                }
                None
            }
        }
    }

    pub async fn run(&self, mut subscription: Box<dyn Subscription>, mut shutdown: watch::Receiver<bool>) {
        info!("Rating consumer started");
        loop {
            tokio::select! {
                record = subscription.next() => match record {
                    Some(record) => {
                        self.process(&record).await;
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("Rating consumer stopped");
    }
}
