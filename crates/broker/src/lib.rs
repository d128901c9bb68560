//! Log transport for the movie command bus.
//!
//! This crate is the seam between the movie components and the durable,
//! partitioned publish/subscribe log they talk over. It provides:
//! - `Publisher` / `Subscriber` / `Subscription` / `TopicAdmin` traits
//! - `Record` and `SendReceipt` types
//! - `InMemoryBroker`, a single-process implementation with Kafka-like
//!   semantics (partitions, per-key ordering, consumer groups)
//!
//! ## Ordering
//! Records with the same key always land on the same partition, and a
//! partition is delivered in append order. Records with different keys
//! have no relative ordering guarantee.

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;

pub use memory::InMemoryBroker;

/// Errors that can occur when talking to the broker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Topic {0} needs at least one partition")]
    NoPartitions(String),

    #[error("Broker is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, BrokerError>;

/// A record read back from a topic partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl Record {
    /// Get the payload as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Transport-level acknowledgement: the record is on the log.
///
/// This says nothing about whether a consumer has applied it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
}

/// Trait for appending records to a topic.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Append `payload` to `topic`, placed by `key` when one is given.
    async fn send(&self, topic: &str, key: Option<&str>, payload: Vec<u8>) -> Result<SendReceipt>;
}

/// Trait for opening a consumer on a topic.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Join consumer group `group` on `topic`.
    ///
    /// Each group tracks its own offsets, so two groups each see every
    /// record. Subscriptions sharing a group split the partitions between
    /// them, so a partition is only ever read by one member at a time.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>>;
}

/// A pull-based consumer.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next record. Returns `None` once the broker is closed.
    ///
    /// Offsets are committed as records are handed out. The returned record
    /// stays held by this subscription until `next` is called again.
    async fn next(&mut self) -> Option<Record>;
}

/// Trait for provisioning topics.
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    /// Create `name` with `partitions` partitions if it does not exist yet.
    async fn create_topic(&self, name: &str, partitions: usize) -> Result<()>;
}

/// Combined trait for a bidirectional transport.
pub trait Broker: Publisher + Subscriber + TopicAdmin {}

impl<T: Publisher + Subscriber + TopicAdmin> Broker for T {}
