//! End-to-end scenarios: caller -> command channel -> dispatcher -> store,
//! and searches answered over the response channel.
//!
//! Most scenarios run with a single partition so that commands for
//! different keys are applied in publish order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use broker::{InMemoryBroker, Publisher};
use protocol::{MovieEntity, SearchMode};
use server::{MovieRequest, MovieService, SearchOutcome, ServiceConfig};
use store::{InMemoryMovieStore, MovieStore};

const WAIT: Duration = Duration::from_secs(2);

// ============================================================================
// Test Fixtures
// ============================================================================

struct Harness {
    service: MovieService,
    broker: Arc<InMemoryBroker>,
    store: Arc<InMemoryMovieStore>,
}

async fn start(partitions: usize, movies: Vec<MovieEntity>) -> Harness {
    let broker = Arc::new(InMemoryBroker::new());
    let store = Arc::new(InMemoryMovieStore::with_movies(movies));
    let config = ServiceConfig::default().with_partitions(partitions);
    let service = MovieService::start(config, broker.clone(), store.clone())
        .await
        .unwrap();
    Harness {
        service,
        broker,
        store,
    }
}

fn catalogue() -> Vec<MovieEntity> {
    vec![
        MovieEntity::new(1, "Inception", "Sci-Fi|Thriller"),
        MovieEntity::new(2, "Amadeus", "Drama|Music"),
        MovieEntity::new(3, "Interstellar", "Sci-Fi|Drama"),
    ]
}

/// Poll `condition` until it holds or `WAIT` elapses
async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

fn titles(outcome: &SearchOutcome) -> Vec<&str> {
    outcome.movies().iter().map(|m| m.title.as_str()).collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_create_update_delete_lifecycle() {
    let h = start(3, vec![]).await;

    h.service.create(MovieRequest::new(5, "Dune", "Sci-Fi")).await.unwrap();
    h.service
        .update(MovieRequest::new(5, "Dune Part Two", "Sci-Fi"))
        .await
        .unwrap();

    let store = h.store.clone();
    assert!(
        eventually(|| {
            let store = store.clone();
            async move {
                matches!(store.get(5).await, Ok(Some(ref m)) if m.title == "Dune Part Two")
            }
        })
        .await
    );

    h.service.delete(MovieRequest::new(5, "", "")).await.unwrap();
    let store = h.store.clone();
    assert!(
        eventually(|| {
            let store = store.clone();
            async move { matches!(store.get(5).await, Ok(None)) }
        })
        .await
    );
    assert_eq!(h.service.errors().received(), 0);

    // The entity is gone, so a later UPDATE is a validation failure
    h.service
        .update(MovieRequest::new(5, "Dune Messiah", "Sci-Fi"))
        .await
        .unwrap();
    assert!(h.service.errors().wait_for(1, WAIT).await);
    assert_eq!(
        h.service.errors().recent(),
        vec!["Validation error: entity not found: 5".to_string()]
    );
    assert!(h.store.get(5).await.unwrap().is_none());
    h.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_title_and_genre_search() {
    let h = start(1, catalogue()).await;

    let outcome = h
        .service
        .await_search_result(SearchMode::Title, "Incep", WAIT)
        .await
        .unwrap();
    assert!(outcome.is_complete());
    assert_eq!(titles(&outcome), vec!["Inception"]);

    let outcome = h
        .service
        .await_search_result(SearchMode::Genres, "sci", WAIT)
        .await
        .unwrap();
    assert_eq!(titles(&outcome), vec!["Inception", "Interstellar"]);

    let outcome = h
        .service
        .await_search_result(SearchMode::Title, "no such film", WAIT)
        .await
        .unwrap();
    assert_eq!(outcome, SearchOutcome::Complete(vec![]));

    h.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_search_sees_earlier_commands() {
    let h = start(1, vec![]).await;

    h.service
        .create(MovieRequest::new(10, "Amelie", "Comedy|Romance"))
        .await
        .unwrap();
    let outcome = h.service.search(SearchMode::Title, "AME").await.unwrap();

    assert_eq!(titles(&outcome), vec!["Amelie"]);
    h.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_overlapping_searches_are_isolated() {
    let h = start(3, catalogue()).await;

    let (first, second) = tokio::join!(
        h.service.await_search_result(SearchMode::Title, "in", WAIT),
        h.service.await_search_result(SearchMode::Title, "amadeus", WAIT),
    );

    assert_eq!(titles(&first.unwrap()), vec!["Inception", "Interstellar"]);
    assert_eq!(titles(&second.unwrap()), vec!["Amadeus"]);
    assert_eq!(h.service.aggregator().pending(), 0);
    h.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_new_with_existing_id_is_reassigned() {
    let h = start(1, catalogue()).await;

    h.service
        .create(MovieRequest::new(1, "Memento", "Mystery|Thriller"))
        .await
        .unwrap();
    let outcome = h.service.search(SearchMode::Title, "memento").await.unwrap();

    let ids: Vec<i64> = outcome.movies().iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![4]);
    assert_eq!(h.store.count().await.unwrap(), 4);
    assert_eq!(h.store.get(1).await.unwrap().unwrap().title, "Inception");
    h.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_validation_failures_reach_error_channel() {
    let h = start(1, catalogue()).await;

    // The emitter refuses a missing id, so publish the raw payload
    let raw = serde_json::json!({"operation": "UPDATE", "id": null, "title": "X", "genres": "Y"});
    h.broker
        .send("movies", None, serde_json::to_vec(&raw).unwrap())
        .await
        .unwrap();
    h.service.delete(MovieRequest::new(99, "", "")).await.unwrap();
    h.broker
        .send("movies", None, br#"{"operation":"GET","id":3,"title":"x"}"#.to_vec())
        .await
        .unwrap();

    assert!(h.service.errors().wait_for(3, WAIT).await);
    let recent = h.service.errors().recent();
    assert_eq!(recent[0], "Validation error: missing id");
    assert_eq!(recent[1], "Validation error: entity not found: 99");
    assert!(recent[2].starts_with("Decode error"));

    // Failed commands leave the store as it was
    assert_eq!(h.store.count().await.unwrap(), 3);
    assert_eq!(h.store.get(3).await.unwrap().unwrap().title, "Interstellar");
    h.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unknown_operation_is_not_reported() {
    let h = start(1, catalogue()).await;

    h.broker
        .send("movies", Some("1"), br#"{"operation":"PATCH","id":1}"#.to_vec())
        .await
        .unwrap();
    // A search behind it on the single partition proves it was consumed
    let outcome = h.service.search(SearchMode::Title, "amadeus").await.unwrap();

    assert!(outcome.is_complete());
    assert_eq!(h.service.errors().received(), 0);
    h.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_timed_out_search_reports_what_arrived() {
    let h = start(1, catalogue()).await;
    h.store.set_offline(true);

    let outcome = h
        .service
        .await_search_result(SearchMode::Genres, "drama", Duration::from_millis(100))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        SearchOutcome::TimedOut {
            partial: vec![],
            received: 0,
            expected: None
        }
    );
    assert!(h.service.errors().wait_for(1, WAIT).await);
    assert!(h.service.errors().recent()[0].starts_with("Store error"));
    assert_eq!(h.service.aggregator().pending(), 0);
    h.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_every_service_sees_every_error_report() {
    let h = start(1, vec![]).await;
    let other = MovieService::start(
        ServiceConfig::default().with_partitions(1),
        h.broker.clone(),
        Arc::new(InMemoryMovieStore::new()),
    )
    .await
    .unwrap();

    h.broker
        .send("error-topic", None, b"Validation error: missing id".to_vec())
        .await
        .unwrap();
    h.broker
        .send("error-topic", None, b"Validation error: entity not found: 7".to_vec())
        .await
        .unwrap();

    assert!(h.service.errors().wait_for(2, WAIT).await);
    assert!(other.errors().wait_for(2, WAIT).await);
    assert_eq!(h.service.errors().recent(), other.errors().recent());

    other.shutdown().await.unwrap();
    h.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unparseable_reply_is_dropped() {
    let h = start(1, vec![]).await;

    h.broker
        .send("movie-response-topic", None, b"Movie(Id=1, title=Inception)".to_vec())
        .await
        .unwrap();

    let aggregator = h.service.aggregator().clone();
    assert!(eventually(|| {
        let aggregator = aggregator.clone();
        async move { aggregator.parse_failures() == 1 }
    })
    .await);
    h.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_upload_movies_and_ratings() {
    let h = start(3, vec![]).await;

    let movies = "movieId,title,genres\n\
                  1,Toy Story (1995),Adventure|Animation|Children\n\
                  2,\"American President, The (1995)\",Comedy|Drama|Romance\n\
                  ,No Id,Drama\n";
    let report = h.service.upload_movies(movies).await.unwrap();
    assert_eq!(report.sent, 2);
    assert_eq!(report.rejected.len(), 1);

    let store = h.store.clone();
    assert!(
        eventually(|| {
            let store = store.clone();
            async move { matches!(store.count().await, Ok(2)) }
        })
        .await
    );
    assert_eq!(
        h.store.get(2).await.unwrap().unwrap().title,
        "American President, The (1995)"
    );

    let ratings = "userId,movieId,rating,timestamp\n1,1,4.0,964982703\n2,1,5.0,964982224\n3,2,3.0,964983815\n";
    assert_eq!(h.service.upload_ratings(ratings).await.unwrap().sent, 3);

    let store = h.store.clone();
    assert!(
        eventually(|| {
            let store = store.clone();
            async move {
                matches!(store.get(1).await, Ok(Some(ref m)) if m.rating_count == 2)
            }
        })
        .await
    );
    assert_eq!(h.store.get(1).await.unwrap().unwrap().average_rating, Some(4.5));

    assert!(h.service.upload_movies("movieId,title,genres\n1,Broken").await.is_err());
    h.service.shutdown().await.unwrap();
}
