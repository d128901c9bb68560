//! In-memory `MovieStore` backed by an ordered map.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use protocol::{MovieEntity, MovieId};

use crate::{MovieStore, Result, StoreError};

/// Movie records keyed by id.
///
/// `BTreeMap` keeps scans in id order without sorting on every query.
#[derive(Default)]
pub struct InMemoryMovieStore {
    movies: RwLock<BTreeMap<MovieId, MovieEntity>>,
    offline: AtomicBool,
}

impl InMemoryMovieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `movies`
    pub fn with_movies(movies: impl IntoIterator<Item = MovieEntity>) -> Self {
        let map = movies.into_iter().map(|m| (m.id, m)).collect();
        Self {
            movies: RwLock::new(map),
            offline: AtomicBool::new(false),
        }
    }

    /// Take the store offline. Every call fails with `Unavailable` until
    /// it is brought back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        Ok(())
    }

    async fn scan<F>(&self, needle: &str, field: F) -> Result<Vec<MovieEntity>>
    where
        F: Fn(&MovieEntity) -> &str,
    {
        self.check_online()?;
        let needle = needle.to_lowercase();
        let movies = self.movies.read().await;
        Ok(movies
            .values()
            .filter(|m| field(m).to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MovieStore for InMemoryMovieStore {
    async fn get(&self, id: MovieId) -> Result<Option<MovieEntity>> {
        self.check_online()?;
        Ok(self.movies.read().await.get(&id).cloned())
    }

    async fn put(&self, movie: MovieEntity) -> Result<()> {
        self.check_online()?;
        debug!(id = movie.id, "Storing movie");
        self.movies.write().await.insert(movie.id, movie);
        Ok(())
    }

    async fn delete(&self, id: MovieId) -> Result<Option<MovieEntity>> {
        self.check_online()?;
        Ok(self.movies.write().await.remove(&id))
    }

    async fn count(&self) -> Result<usize> {
        self.check_online()?;
        Ok(self.movies.read().await.len())
    }

    async fn find_by_title_contains(&self, needle: &str) -> Result<Vec<MovieEntity>> {
        self.scan(needle, |m| m.title.as_str()).await
    }

    async fn find_by_genres_contains(&self, needle: &str) -> Result<Vec<MovieEntity>> {
        self.scan(needle, |m| m.genres.as_str()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_replaces_existing() {
        let store = InMemoryMovieStore::new();
        store.put(MovieEntity::new(1, "Dune", "Sci-Fi")).await.unwrap();
        store.put(MovieEntity::new(1, "Dune Part Two", "Sci-Fi")).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get(1).await.unwrap().unwrap().title, "Dune Part Two");
    }

    #[tokio::test]
    async fn test_offline_store_fails() {
        let store = InMemoryMovieStore::with_movies(vec![MovieEntity::new(1, "Heat", "Crime")]);
        store.set_offline(true);

        assert!(matches!(store.get(1).await, Err(StoreError::Unavailable(_))));
        assert!(store.find_by_title_contains("heat").await.is_err());

        store.set_offline(false);
        assert!(store.contains(1).await.unwrap());
    }
}
