//! # Response Aggregator
//!
//! Collects search replies into per-request result sets.
//!
//! ## Learning Goals
//!
//! This component teaches you:
//! - Handing a caller a handle whose `Drop` cleans up shared state
//! - Signalling completion across tasks with `oneshot`
//! - Bounding a wait with `tokio::time::timeout`
//!
//! ## Flow
//! 1. The caller registers a correlation id *before* publishing its search
//! 2. The listener routes each reply to the accumulator for its id
//! 3. A `Complete { total }` marker plus `total` matches resolves the handle
//! 4. Dropping the handle removes the accumulator, completed or not
//!
//! Replies for ids nobody registered (or that already timed out) are
//! dropped. Replies that do not parse are counted and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use broker::Subscription;
use protocol::{CorrelationId, MovieEntity, SearchReply};

/// Result of waiting on a search
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    /// Every match announced by the completion marker arrived
    Complete(Vec<MovieEntity>),
    /// The wait ran out first
    TimedOut {
        partial: Vec<MovieEntity>,
        received: usize,
        /// `None` if the completion marker never arrived
        expected: Option<usize>,
    },
}

impl SearchOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, SearchOutcome::Complete(_))
    }

    /// The movies received, complete or not
    pub fn movies(&self) -> &[MovieEntity] {
        match self {
            SearchOutcome::Complete(movies) => movies,
            SearchOutcome::TimedOut { partial, .. } => partial,
        }
    }

    pub fn into_movies(self) -> Vec<MovieEntity> {
        match self {
            SearchOutcome::Complete(movies) => movies,
            SearchOutcome::TimedOut { partial, .. } => partial,
        }
    }
}

struct Accumulator {
    matches: Vec<MovieEntity>,
    expected: Option<usize>,
    done: Option<oneshot::Sender<()>>,
}

impl Accumulator {
    fn settle(&mut self) {
        if let Some(expected) = self.expected {
            if self.matches.len() >= expected {
                if let Some(done) = self.done.take() {
                    let _ = done.send(());
                }
            }
        }
    }
}

#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<CorrelationId, Accumulator>>,
    parse_failures: AtomicU64,
    unmatched: AtomicU64,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<CorrelationId, Accumulator>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Routes replies from the response channel to registered searches.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone, Default)]
pub struct ResponseAggregator {
    shared: Arc<Shared>,
}

impl ResponseAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an accumulator for `correlation_id`.
    ///
    /// Must be called before the search is published, otherwise early
    /// replies are dropped as unmatched.
    pub fn register(&self, correlation_id: CorrelationId) -> SearchHandle {
        let (done, receiver) = oneshot::channel();
        self.shared.pending().insert(
            correlation_id,
            Accumulator {
                matches: Vec::new(),
                expected: None,
                done: Some(done),
            },
        );
        debug!(%correlation_id, "Registered search");
        SearchHandle {
            correlation_id,
            receiver,
            shared: self.shared.clone(),
        }
    }

    /// Route one raw reply payload
    pub fn accept(&self, payload: &[u8]) {
        let reply = match SearchReply::decode(payload) {
            Ok(reply) => reply,
            Err(e) => {
                self.shared.parse_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Dropping unparseable reply");
                return;
            }
        };

        let correlation_id = reply.correlation_id();
        let mut pending = self.shared.pending();
        let Some(accumulator) = pending.get_mut(&correlation_id) else {
            self.shared.unmatched.fetch_add(1, Ordering::Relaxed);
            debug!(%correlation_id, "Dropping reply for unknown or expired search");
            return;
        };

        match reply {
            SearchReply::Match { movie, .. } => accumulator.matches.push(movie),
            SearchReply::Complete { total, .. } => accumulator.expected = Some(total),
        }
        accumulator.settle();
    }

    /// Searches currently waiting for replies
    pub fn pending(&self) -> usize {
        self.shared.pending().len()
    }

    /// Replies dropped because they did not parse
    pub fn parse_failures(&self) -> u64 {
        self.shared.parse_failures.load(Ordering::Relaxed)
    }

    /// Replies dropped because no search was waiting for them
    pub fn unmatched(&self) -> u64 {
        self.shared.unmatched.load(Ordering::Relaxed)
    }

    /// Consume the response channel until shutdown or the broker closes
    pub async fn run(&self, mut subscription: Box<dyn Subscription>, mut shutdown: watch::Receiver<bool>) {
        info!("Response aggregator started");
        loop {
            tokio::select! {
                record = subscription.next() => match record {
                    Some(record) => self.accept(&record.payload),
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        info!(
            parse_failures = self.parse_failures(),
            unmatched = self.unmatched(),
            "Response aggregator stopped"
        );
    }
}

/// A caller's claim on one search's results.
pub struct SearchHandle {
    correlation_id: CorrelationId,
    receiver: oneshot::Receiver<()>,
    shared: Arc<Shared>,
}

impl SearchHandle {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Wait for the search to complete, at most `timeout`.
    pub async fn await_results(mut self, timeout: Duration) -> SearchOutcome {
        let completed = matches!(
            tokio::time::timeout(timeout, &mut self.receiver).await,
            Ok(Ok(()))
        );
        let (matches, expected) = self.take();

        if completed {
            debug!(correlation_id = %self.correlation_id, results = matches.len(), "Search complete");
            SearchOutcome::Complete(matches)
        } else {
            warn!(
                correlation_id = %self.correlation_id,
                received = matches.len(),
                ?expected,
                "Search timed out"
            );
            SearchOutcome::TimedOut {
                received: matches.len(),
                partial: matches,
                expected,
            }
        }
    }

    /// Take whatever has arrived so far and stop listening
    pub fn drain_and_clear(mut self) -> Vec<MovieEntity> {
        self.take().0
    }

    fn take(&mut self) -> (Vec<MovieEntity>, Option<usize>) {
        match self.shared.pending().remove(&self.correlation_id) {
            Some(accumulator) => (accumulator.matches, accumulator.expected),
            None => (Vec::new(), None),
        }
    }
}

impl Drop for SearchHandle {
    fn drop(&mut self) {
        self.shared.pending().remove(&self.correlation_id);
    }
}
