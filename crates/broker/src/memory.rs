//! In-memory partitioned log for tests and single-process deployments.
//!
//! Each topic is a fixed set of append-only partitions. Consumer groups keep
//! one committed offset per partition, and subscribers park on a `Notify`
//! until a new record is appended or the broker closes.
//!
//! ## Group membership
//! Members of a group split the partitions between them: member `i` of `n`
//! owns every partition `p` with `p % n == i`. The split is recomputed when a
//! member joins or leaves. A record handed to a member stays held until that
//! member asks for its next record, and nobody else reads the partition
//! while it is held, so a rebalance never lets two members work on the same
//! partition at once.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::{
    BrokerError, Publisher, Record, Result, SendReceipt, Subscriber, Subscription, TopicAdmin,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Place a key on a partition. Same key, same partition, for the life of
/// the process.
fn partition_for(key: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % partitions as u64) as usize
}

/// Per-group consumption state
struct GroupState {
    /// Committed offset, one slot per partition
    offsets: Vec<u64>,
    /// Member ids in join order
    members: Vec<u64>,
    /// Member currently holding a record from each partition
    held_by: Vec<Option<u64>>,
    next_member: u64,
}

impl GroupState {
    fn new(partitions: usize) -> Self {
        Self {
            offsets: vec![0; partitions],
            members: Vec::new(),
            held_by: vec![None; partitions],
            next_member: 0,
        }
    }

    fn join(&mut self) -> u64 {
        let member = self.next_member;
        self.next_member += 1;
        self.members.push(member);
        member
    }

    fn leave(&mut self, member: u64) {
        self.members.retain(|m| *m != member);
        self.release(member);
    }

    /// Release whatever `member` holds. Returns true if anything was held.
    fn release(&mut self, member: u64) -> bool {
        let mut released = false;
        for slot in self.held_by.iter_mut() {
            if *slot == Some(member) {
                *slot = None;
                released = true;
            }
        }
        released
    }

    fn owns(&self, member: u64, partition: usize) -> bool {
        self.members
            .iter()
            .position(|m| *m == member)
            .is_some_and(|index| partition % self.members.len() == index)
    }

    /// Partitions currently assigned to `member`
    fn assignment(&self, member: u64) -> Vec<usize> {
        (0..self.offsets.len())
            .filter(|p| self.owns(member, *p))
            .collect()
    }
}

struct Topic {
    name: String,
    partitions: Vec<Mutex<Vec<Record>>>,
    groups: Mutex<HashMap<String, Arc<Mutex<GroupState>>>>,
    appended: Notify,
    next_unkeyed: AtomicUsize,
}

impl Topic {
    fn new(name: &str, partitions: usize) -> Self {
        Self {
            name: name.to_string(),
            partitions: (0..partitions).map(|_| Mutex::new(Vec::new())).collect(),
            groups: Mutex::new(HashMap::new()),
            appended: Notify::new(),
            next_unkeyed: AtomicUsize::new(0),
        }
    }

    fn append(&self, key: Option<&str>, payload: Vec<u8>) -> SendReceipt {
        let partition = match key {
            Some(key) => partition_for(key, self.partitions.len()),
            None => self.next_unkeyed.fetch_add(1, Ordering::Relaxed) % self.partitions.len(),
        };

        let offset = {
            let mut log = lock(&self.partitions[partition]);
            let offset = log.len() as u64;
            log.push(Record {
                topic: self.name.clone(),
                partition,
                offset,
                key: key.map(str::to_string),
                payload,
            });
            offset
        };

        self.appended.notify_waiters();

        SendReceipt {
            topic: self.name.clone(),
            partition,
            offset,
        }
    }

    fn group(&self, group: &str) -> Arc<Mutex<GroupState>> {
        let mut groups = lock(&self.groups);
        groups
            .entry(group.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(GroupState::new(self.partitions.len()))))
            .clone()
    }
}

struct BrokerInner {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    closed: AtomicBool,
}

/// In-memory broker.
///
/// Features:
/// - Cheap to clone; clones share the same topics
/// - Fixed partition count per topic, records placed by key hash
/// - Independent consumer groups, each with its own offsets
/// - Partitions split between the members of a group
/// - `close()` wakes every subscriber and ends its stream
///
/// ## Example
///
/// ```ignore
/// let broker = InMemoryBroker::new();
/// broker.create_topic("movies", 3)?;
///
/// let mut sub = broker.subscribe("movies", "worker").await?;
/// broker.send("movies", Some("5"), b"{}".to_vec()).await?;
/// let record = sub.next().await;
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Create a broker that only accepts explicitly created topics.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                topics: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Create `name` with `partitions` partitions. Creating an existing
    /// topic is a no-op.
    pub fn create_topic(&self, name: &str, partitions: usize) -> Result<()> {
        if partitions == 0 {
            return Err(BrokerError::NoPartitions(name.to_string()));
        }
        let mut topics = self
            .inner
            .topics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !topics.contains_key(name) {
            info!(topic = name, partitions, "Created topic");
            topics.insert(name.to_string(), Arc::new(Topic::new(name, partitions)));
        }
        Ok(())
    }

    /// Number of partitions of `name`, if it exists
    pub fn partitions(&self, name: &str) -> Option<usize> {
        self.find_topic(name).map(|t| t.partitions.len())
    }

    /// All records of a topic, partition by partition, in offset order.
    pub fn records(&self, name: &str) -> Vec<Record> {
        match self.find_topic(name) {
            Some(topic) => topic
                .partitions
                .iter()
                .flat_map(|p| lock(p).clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Total number of records appended to a topic.
    pub fn len(&self, name: &str) -> usize {
        self.find_topic(name)
            .map(|t| t.partitions.iter().map(|p| lock(p).len()).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, name: &str) -> bool {
        self.len(name) == 0
    }

    /// Stop accepting records and end every open subscription.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let topics = self
            .inner
            .topics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for topic in topics.values() {
            topic.appended.notify_waiters();
        }
        info!("Broker closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn find_topic(&self, name: &str) -> Option<Arc<Topic>> {
        self.inner
            .topics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    fn topic(&self, name: &str) -> Result<Arc<Topic>> {
        self.find_topic(name)
            .ok_or_else(|| BrokerError::UnknownTopic(name.to_string()))
    }
}

#[async_trait]
impl TopicAdmin for InMemoryBroker {
    async fn create_topic(&self, name: &str, partitions: usize) -> Result<()> {
        InMemoryBroker::create_topic(self, name, partitions)
    }
}

#[async_trait]
impl Publisher for InMemoryBroker {
    async fn send(&self, topic: &str, key: Option<&str>, payload: Vec<u8>) -> Result<SendReceipt> {
        if self.is_closed() {
            return Err(BrokerError::Closed);
        }
        let receipt = self.topic(topic)?.append(key, payload);
        debug!(
            topic,
            key = key.unwrap_or("-"),
            partition = receipt.partition,
            offset = receipt.offset,
            "Appended record"
        );
        Ok(receipt)
    }
}

#[async_trait]
impl Subscriber for InMemoryBroker {
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>> {
        let topic = self.topic(topic)?;
        let state = topic.group(group);
        let member = {
            let mut state = lock(&state);
            let member = state.join();
            debug!(
                topic = %topic.name,
                group,
                member,
                members = state.members.len(),
                assigned = ?state.assignment(member),
                "Joined consumer group"
            );
            member
        };
        Ok(Box::new(MemorySubscription {
            broker: self.clone(),
            topic,
            group: group.to_string(),
            state,
            member,
            cursor: 0,
        }))
    }
}

/// One member of a consumer group on one topic.
struct MemorySubscription {
    broker: InMemoryBroker,
    topic: Arc<Topic>,
    group: String,
    state: Arc<Mutex<GroupState>>,
    member: u64,
    /// Partition to look at first, rotated for fairness
    cursor: usize,
}

impl MemorySubscription {
    /// Release the previous record, then take the next one from a partition
    /// this member owns and nobody else holds.
    fn poll_once(&mut self) -> Option<Record> {
        let partitions = self.topic.partitions.len();
        let mut state = lock(&self.state);
        if state.release(self.member) {
            // A partition that moved to another member may be readable now
            self.topic.appended.notify_waiters();
        }

        for step in 0..partitions {
            let partition = (self.cursor + step) % partitions;
            if !state.owns(self.member, partition) || state.held_by[partition].is_some() {
                continue;
            }
            let log = lock(&self.topic.partitions[partition]);
            let offset = state.offsets[partition] as usize;
            if offset < log.len() {
                state.offsets[partition] += 1;
                state.held_by[partition] = Some(self.member);
                self.cursor = (partition + 1) % partitions;
                return Some(log[offset].clone());
            }
        }
        None
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        lock(&self.state).leave(self.member);
        debug!(topic = %self.topic.name, group = %self.group, member = self.member, "Left consumer group");
        self.topic.appended.notify_waiters();
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<Record> {
        loop {
            // Register interest before checking, so an append between the
            // check and the await is not lost
            let topic = self.topic.clone();
            let appended = topic.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            if self.broker.is_closed() {
                return None;
            }
            if let Some(record) = self.poll_once() {
                return Some(record);
            }

            appended.await;
        }
    }
}
