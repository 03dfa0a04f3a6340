//! Router table structures
//!
//! Topics, work queues, pending requests, and dead letters, plus the
//! fixed-capacity open-addressed table both name spaces live in. Names
//! persist for the life of the process: entries are inserted at
//! `fast_hash(name) mod N` with linear probing and never removed, so a
//! probe chain can never be broken by deletion.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::domain_types::{AgentId, AgentName, CorrelationId, RoutingStrategy, TopicName};
use crate::transport::{FrameHeader, Priority};
use crate::vector;

/// Maximum topics per router.
pub const MAX_TOPICS: usize = 256;

/// Maximum work queues per router.
pub const MAX_WORK_QUEUES: usize = 256;

/// Maximum subscribers per topic.
pub const MAX_SUBSCRIBERS_PER_TOPIC: usize = 64;

/// Maximum workers per work queue.
pub const MAX_WORKERS_PER_QUEUE: usize = 64;

/// Maximum outstanding requests per router.
pub const MAX_PENDING_REQUESTS: usize = 4096;

/// Dead-letter queue capacity.
pub const DLQ_CAPACITY: usize = 8192;

/// Maximum delivery retries for a dead letter.
pub const DLQ_MAX_RETRIES: u8 = 3;

/// Exponential retry backoff per attempt, in milliseconds.
pub const DLQ_RETRY_BACKOFF_MS: [u64; DLQ_MAX_RETRIES as usize] = [100, 400, 1600];

pub(crate) trait NamedEntry {
    fn entry_name(&self) -> &TopicName;
}

/// Fixed-capacity open-addressed table keyed by name.
pub(crate) struct SlotTable<T> {
    slots: Vec<Option<T>>,
    len: usize,
}

impl<T: NamedEntry> SlotTable<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            len: 0,
        }
    }

    fn start_slot(&self, name: &TopicName) -> usize {
        vector::fast_hash(name.as_str().as_bytes()) as usize % self.slots.len()
    }

    pub(crate) fn get(&self, name: &TopicName) -> Option<&T> {
        let start = self.start_slot(name);
        for i in 0..self.slots.len() {
            match &self.slots[(start + i) % self.slots.len()] {
                Some(entry) if entry.entry_name() == name => return Some(entry),
                Some(_) => {}
                None => return None,
            }
        }
        None
    }

    pub(crate) fn get_mut(&mut self, name: &TopicName) -> Option<&mut T> {
        let start = self.start_slot(name);
        let capacity = self.slots.len();
        for i in 0..capacity {
            let idx = (start + i) % capacity;
            match &self.slots[idx] {
                Some(entry) if entry.entry_name() == name => {
                    return self.slots[idx].as_mut();
                }
                Some(_) => {}
                None => return None,
            }
        }
        None
    }

    /// Inserts at the first free probe slot. `Err` means the table is
    /// full; the caller maps that to `CapacityExceeded`.
    pub(crate) fn insert(&mut self, entry: T) -> Result<(), T> {
        if self.len == self.slots.len() {
            return Err(entry);
        }
        let start = self.start_slot(entry.entry_name());
        let capacity = self.slots.len();
        for i in 0..capacity {
            let idx = (start + i) % capacity;
            if self.slots[idx].is_none() {
                self.slots[idx] = Some(entry);
                self.len += 1;
                return Ok(());
            }
        }
        Err(entry)
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

/// One topic subscription.
///
/// Holds only the agent id, a weak reference resolved through discovery
/// at send time; the router never owns agent lifetimes. Delivery
/// counters are atomics so publishes stay on the read lock.
#[derive(Debug)]
pub(crate) struct Subscriber {
    pub(crate) agent_id: AgentId,
    pub(crate) agent_name: AgentName,
    pub(crate) subscribed_at_ns: u64,
    pub(crate) messages_received: AtomicU64,
    pub(crate) queue_depth: AtomicU32,
    pub(crate) active: bool,
}

/// Read-only subscriber view for stats and tests.
#[derive(Debug, Clone)]
pub struct SubscriberInfo {
    /// Subscribed agent.
    pub agent_id: AgentId,
    /// Subscribed agent's name at subscription time.
    pub agent_name: AgentName,
    /// Monotonic subscription timestamp.
    pub subscribed_at_ns: u64,
    /// Frames successfully enqueued to this subscriber.
    pub messages_received: u64,
    /// Last observed inbox depth.
    pub queue_depth: u32,
    /// Whether the subscription is live.
    pub active: bool,
}

pub(crate) struct Topic {
    pub(crate) name: TopicName,
    pub(crate) strategy: RoutingStrategy,
    pub(crate) persistent: bool,
    pub(crate) subscribers: Vec<Subscriber>,
}

impl NamedEntry for Topic {
    fn entry_name(&self) -> &TopicName {
        &self.name
    }
}

impl Topic {
    pub(crate) fn subscriber_info(&self) -> Vec<SubscriberInfo> {
        self.subscribers
            .iter()
            .map(|s| SubscriberInfo {
                agent_id: s.agent_id,
                agent_name: s.agent_name.clone(),
                subscribed_at_ns: s.subscribed_at_ns,
                messages_received: s.messages_received.load(Ordering::Relaxed),
                queue_depth: s.queue_depth.load(Ordering::Relaxed),
                active: s.active,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Worker {
    pub(crate) agent_id: AgentId,
    pub(crate) agent_name: AgentName,
}

pub(crate) struct WorkQueue {
    pub(crate) name: TopicName,
    pub(crate) strategy: RoutingStrategy,
    /// Insertion order; round-robin walks this with the cursor.
    pub(crate) workers: Vec<Worker>,
    pub(crate) cursor: AtomicU64,
}

impl NamedEntry for WorkQueue {
    fn entry_name(&self) -> &TopicName {
        &self.name
    }
}

/// Outstanding request awaiting a response.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Correlation id linking request and response.
    pub correlation: CorrelationId,
    /// Agent awaiting the response.
    pub requester: AgentId,
    /// Agent the request was sent to.
    pub target: AgentId,
    /// Monotonic issue timestamp.
    pub issued_ns: u64,
    /// Time to live in milliseconds.
    pub ttl_ms: u32,
    /// Priority of the request; the response reuses it.
    pub priority: Priority,
    /// Set by a matched response or by the timeout sweep.
    pub completed: bool,
}

impl PendingRequest {
    /// Whether the TTL elapsed at `now_ns`.
    #[must_use]
    pub fn is_expired(&self, now_ns: u64) -> bool {
        let ttl_ns = u64::from(self.ttl_ms).saturating_mul(1_000_000);
        now_ns >= self.issued_ns.saturating_add(ttl_ns)
    }
}

/// A frame the router could not deliver.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Copy of the undeliverable frame's header.
    pub header: FrameHeader,
    /// Owned payload copy.
    pub payload: Bytes,
    /// The recipient the frame was meant for.
    pub intended: AgentId,
    /// Why delivery failed; bounded, human-readable.
    pub reason: String,
    /// Redelivery attempts made so far.
    pub retries: u8,
    /// Monotonic timestamp of the last attempt (or of arrival).
    pub last_retry_ns: u64,
}

impl DeadLetter {
    /// Whether the retry backoff for the next attempt has elapsed.
    #[must_use]
    pub fn is_due(&self, now_ns: u64) -> bool {
        if self.retries >= DLQ_MAX_RETRIES {
            return false;
        }
        let backoff_ns = DLQ_RETRY_BACKOFF_MS[self.retries as usize].saturating_mul(1_000_000);
        now_ns >= self.last_retry_ns.saturating_add(backoff_ns)
    }
}

/// Payload of a `DeadLetter` frame delivered to a requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterNotice {
    /// Failure reason, e.g. `"timeout"`.
    pub reason: String,
    /// The agent the original frame was addressed to.
    pub original_target: u32,
    /// Correlation id of the failed request.
    pub correlation_id: u32,
}
