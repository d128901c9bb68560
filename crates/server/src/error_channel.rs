//! Error Channel: failures from the worker side, republished as plain text.
//!
//! The listener is terminal. It logs, counts, and keeps a short history for
//! display. Nothing is retried or escalated.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tracing::{error, info};

use broker::{Publisher, SendReceipt, Subscription};

use crate::error::Result;

/// Publishes failure text to the error channel
#[derive(Clone)]
pub struct ErrorPublisher {
    publisher: Arc<dyn Publisher>,
    topic: String,
}

impl ErrorPublisher {
    pub fn new(publisher: Arc<dyn Publisher>, topic: impl Into<String>) -> Self {
        Self {
            publisher,
            topic: topic.into(),
        }
    }

    pub async fn report(&self, message: &str) -> Result<SendReceipt> {
        let receipt = self
            .publisher
            .send(&self.topic, None, message.as_bytes().to_vec())
            .await?;
        Ok(receipt)
    }
}

struct ListenerState {
    received: AtomicUsize,
    recent: Mutex<VecDeque<String>>,
    capacity: usize,
    arrived: Notify,
}

/// Terminal consumer of the error channel.
///
/// Cheap to clone; clones share counters and history.
#[derive(Clone)]
pub struct ErrorListener {
    state: Arc<ListenerState>,
}

impl ErrorListener {
    /// Create a listener keeping the last `capacity` messages
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(ListenerState {
                received: AtomicUsize::new(0),
                recent: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                arrived: Notify::new(),
            }),
        }
    }

    /// Total number of messages seen
    pub fn received(&self) -> usize {
        self.state.received.load(Ordering::SeqCst)
    }

    /// Most recent messages, oldest first
    pub fn recent(&self) -> Vec<String> {
        self.history().iter().cloned().collect()
    }

    /// Record one error message
    pub fn accept(&self, message: &str) {
        error!(error = message, "Received on error channel");
        {
            let mut recent = self.history();
            if self.state.capacity > 0 {
                if recent.len() == self.state.capacity {
                    recent.pop_front();
                }
                recent.push_back(message.to_string());
            }
        }
        self.state.received.fetch_add(1, Ordering::SeqCst);
        self.state.arrived.notify_waiters();
    }

    /// Wait until at least `count` messages have been seen.
    ///
    /// Returns false if `timeout` elapses first.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let arrived = self.state.arrived.notified();
                tokio::pin!(arrived);
                arrived.as_mut().enable();
                if self.received() >= count {
                    return;
                }
                arrived.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    /// Consume the error channel until shutdown or the broker closes
    pub async fn run(&self, mut subscription: Box<dyn Subscription>, mut shutdown: watch::Receiver<bool>) {
        info!("Error listener started");
        loop {
            tokio::select! {
                record = subscription.next() => match record {
                    Some(record) => {
                        let text = String::from_utf8_lossy(&record.payload);
                        self.accept(&text);
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        info!(received = self.received(), "Error listener stopped");
    }

    fn history(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.state
            .recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
