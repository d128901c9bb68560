//! # Store Crate
//!
//! Keyed persistence for movie records.
//!
//! ## Learning Goals
//!
//! This crate teaches you:
//! - Putting an async trait at a persistence seam (`async-trait`)
//! - Sharing mutable state across tasks with `tokio::sync::RwLock`
//! - Keeping scan results deterministic with an ordered map
//!
//! The dispatcher is the only writer. Everything else reads through it.

use async_trait::async_trait;
use thiserror::Error;

use protocol::{MovieEntity, MovieId};

pub mod memory;

pub use memory::InMemoryMovieStore;

/// Errors raised by a store backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Keyed store of movie records.
///
/// ## Design Note
/// - `Send + Sync` so one store can be shared by every worker task
/// - Scans are case-insensitive substring matches, returned in id order
#[async_trait]
pub trait MovieStore: Send + Sync {
    async fn get(&self, id: MovieId) -> Result<Option<MovieEntity>>;

    /// Whether a record with `id` exists
    async fn contains(&self, id: MovieId) -> Result<bool> {
        Ok(self.get(id).await?.is_some())
    }

    /// Insert or replace the record keyed by `movie.id`
    async fn put(&self, movie: MovieEntity) -> Result<()>;

    /// Remove the record keyed by `id`, returning it if it existed
    async fn delete(&self, id: MovieId) -> Result<Option<MovieEntity>>;

    async fn count(&self) -> Result<usize>;

    async fn find_by_title_contains(&self, needle: &str) -> Result<Vec<MovieEntity>>;

    async fn find_by_genres_contains(&self, needle: &str) -> Result<Vec<MovieEntity>>;
}
