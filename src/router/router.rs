//! Message router
//!
//! Publish/subscribe over topics, request/response with correlation, and
//! work-queue distribution, using the ring transport for delivery and
//! discovery for target resolution.
//!
//! Lock order within the router: topics < queues < pending < dlq. The
//! discovery lock is always taken on its own; subscriber and worker
//! lists are snapshotted and released before any inbox is resolved.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use tracing::{debug, trace, warn};

use crate::clock::SharedClock;
use crate::discovery::Discovery;
use crate::domain_types::{AgentId, AgentName, CorrelationId, RoutingStrategy, TopicName};
use crate::error::{RouterError, TransportError};
use crate::router::dlq::{DeadLetterQueue, DlqStats};
use crate::router::types::{
    DeadLetter, DeadLetterNotice, MAX_PENDING_REQUESTS, MAX_SUBSCRIBERS_PER_TOPIC, MAX_TOPICS,
    MAX_WORK_QUEUES, MAX_WORKERS_PER_QUEUE, PendingRequest, SlotTable, Subscriber, SubscriberInfo,
    Topic, Worker, WorkQueue,
};
use crate::transport::{Frame, FrameFlags, FrameHeader, FrameParams, MsgType, Priority};
use crate::vector;

/// Reason attached to frames diverted because a subscriber's inbox was
/// full.
pub const REASON_BACKPRESSURE: &str = "subscriber backpressure";

/// Reason attached to frames whose recipient no longer resolves.
pub const REASON_DEPARTED: &str = "subscriber departed";

/// Reason attached to dead letters produced by the pending sweep.
pub const REASON_TIMEOUT: &str = "timeout";

/// Reason attached to frames abandoned during agent shutdown.
pub const REASON_SHUTDOWN: &str = "shutdown";

/// Router counters, all monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouterStats {
    /// Publish calls accepted.
    pub published: u64,
    /// Frames successfully enqueued to recipients.
    pub delivered: u64,
    /// Frames diverted to the dead-letter queue.
    pub dead_lettered: u64,
    /// Requests issued.
    pub requests: u64,
    /// Responses matched to a pending request.
    pub responses: u64,
    /// Pending requests expired by the sweep.
    pub timeouts: u64,
    /// Routing errors (corrupt frames, overflow rejections).
    pub routing_errors: u64,
    /// Topics created.
    pub topics: usize,
    /// Work queues created.
    pub work_queues: usize,
    /// Outstanding pending requests.
    pub pending: usize,
    /// Dead-letter queue counters.
    pub dlq: DlqStats,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    dead_lettered: AtomicU64,
    requests: AtomicU64,
    responses: AtomicU64,
    timeouts: AtomicU64,
    routing_errors: AtomicU64,
}

/// The message router.
///
/// Owns the topic and work-queue tables, the pending-request table, and
/// the dead-letter queue; resolves recipients through [`Discovery`] by
/// id only and never holds agent lifetimes.
pub struct Router {
    topics: RwLock<SlotTable<Topic>>,
    queues: RwLock<SlotTable<WorkQueue>>,
    pending: DashMap<CorrelationId, PendingRequest>,
    next_correlation: AtomicU32,
    next_message_id: AtomicU32,
    dlq: Arc<DeadLetterQueue>,
    discovery: Arc<Discovery>,
    clock: SharedClock,
    counters: Counters,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("stats", &self.stats())
            .finish()
    }
}

impl Router {
    /// Creates a router bound to a discovery registry and clock.
    #[must_use]
    pub fn new(discovery: Arc<Discovery>, clock: SharedClock) -> Self {
        Self {
            topics: RwLock::new(SlotTable::new(MAX_TOPICS)),
            queues: RwLock::new(SlotTable::new(MAX_WORK_QUEUES)),
            pending: DashMap::new(),
            next_correlation: AtomicU32::new(1),
            next_message_id: AtomicU32::new(1),
            dlq: Arc::new(DeadLetterQueue::new()),
            discovery,
            clock,
            counters: Counters::default(),
        }
    }

    pub(crate) fn dlq_handle(&self) -> Arc<DeadLetterQueue> {
        Arc::clone(&self.dlq)
    }

    fn next_message_id(&self) -> u32 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Topics
    // ------------------------------------------------------------------

    /// Creates a topic.
    ///
    /// Idempotent when `(strategy, persistent)` match the existing
    /// topic.
    ///
    /// # Errors
    ///
    /// [`RouterError::TopicExists`] on a parameter mismatch,
    /// [`RouterError::CapacityExceeded`] when the table is full.
    pub fn create_topic(
        &self,
        name: TopicName,
        strategy: RoutingStrategy,
        persistent: bool,
    ) -> Result<(), RouterError> {
        let mut topics = self.topics.write();
        if let Some(existing) = topics.get(&name) {
            if existing.strategy == strategy && existing.persistent == persistent {
                return Ok(());
            }
            return Err(RouterError::TopicExists { name });
        }
        let topic = Topic {
            name: name.clone(),
            strategy,
            persistent,
            subscribers: Vec::new(),
        };
        topics
            .insert(topic)
            .map_err(|_| RouterError::CapacityExceeded {
                resource: "topic table",
            })?;
        debug!(%name, ?strategy, persistent, "topic created");
        Ok(())
    }

    /// Subscribes an agent to a topic.
    ///
    /// Duplicate subscriptions short-circuit to `Ok`; an agent id
    /// appears at most once per topic.
    ///
    /// # Errors
    ///
    /// [`RouterError::TopicNotFound`],
    /// [`RouterError::CapacityExceeded`] at
    /// [`MAX_SUBSCRIBERS_PER_TOPIC`].
    pub fn subscribe(
        &self,
        name: &TopicName,
        agent_id: AgentId,
        agent_name: AgentName,
    ) -> Result<(), RouterError> {
        let now = self.clock.monotonic_ns();
        let mut topics = self.topics.write();
        let topic = topics
            .get_mut(name)
            .ok_or_else(|| RouterError::TopicNotFound { name: name.clone() })?;
        if topic.subscribers.iter().any(|s| s.agent_id == agent_id) {
            return Ok(());
        }
        if topic.subscribers.len() >= MAX_SUBSCRIBERS_PER_TOPIC {
            return Err(RouterError::CapacityExceeded {
                resource: "topic subscribers",
            });
        }
        topic.subscribers.push(Subscriber {
            agent_id,
            agent_name,
            subscribed_at_ns: now,
            messages_received: AtomicU64::new(0),
            queue_depth: std::sync::atomic::AtomicU32::new(0),
            active: true,
        });
        trace!(topic = %name, %agent_id, "subscribed");
        Ok(())
    }

    /// Removes an agent's subscription. Idempotent.
    ///
    /// # Errors
    ///
    /// [`RouterError::TopicNotFound`].
    pub fn unsubscribe(&self, name: &TopicName, agent_id: AgentId) -> Result<(), RouterError> {
        let mut topics = self.topics.write();
        let topic = topics
            .get_mut(name)
            .ok_or_else(|| RouterError::TopicNotFound { name: name.clone() })?;
        topic.subscribers.retain(|s| s.agent_id != agent_id);
        Ok(())
    }

    /// Subscriber views for one topic, in insertion order.
    ///
    /// # Errors
    ///
    /// [`RouterError::TopicNotFound`].
    pub fn topic_subscribers(&self, name: &TopicName) -> Result<Vec<SubscriberInfo>, RouterError> {
        let topics = self.topics.read();
        topics
            .get(name)
            .map(Topic::subscriber_info)
            .ok_or_else(|| RouterError::TopicNotFound { name: name.clone() })
    }

    /// Publishes a payload to every active subscriber of a topic.
    ///
    /// Delivery is best-effort per subscriber, in insertion order: a
    /// rejected enqueue diverts that one frame to the dead-letter queue
    /// and later subscribers are unaffected. Returns the number of
    /// successful enqueues.
    ///
    /// # Errors
    ///
    /// [`RouterError::TopicNotFound`];
    /// [`RouterError::InvalidArgument`] for an oversized payload.
    pub fn publish(
        &self,
        name: &TopicName,
        source: AgentId,
        payload: &[u8],
        priority: Priority,
    ) -> Result<usize, RouterError> {
        if payload.len() > FrameHeader::MAX_PAYLOAD {
            return Err(RouterError::InvalidArgument {
                field: "payload",
                reason: format!("{} bytes exceeds 16 MiB", payload.len()),
            });
        }

        // Snapshot under the read lock, then release before touching
        // discovery (lock order: Discovery is never nested inside).
        let recipients: Vec<AgentId> = {
            let topics = self.topics.read();
            let topic = topics
                .get(name)
                .ok_or_else(|| RouterError::TopicNotFound { name: name.clone() })?;
            topic
                .subscribers
                .iter()
                .filter(|s| s.active)
                .map(|s| s.agent_id)
                .collect()
        };

        let template = Frame::new(
            &FrameParams {
                message_id: self.next_message_id(),
                timestamp_ns: self.clock.monotonic_ns(),
                source,
                correlation: 0,
                msg_type: MsgType::Publish,
                priority,
                flags: FrameFlags::empty(),
                ttl_ms: 0,
                topic: name.as_str(),
            },
            payload,
        );

        let mut delivered_to: Vec<(AgentId, u32)> = Vec::with_capacity(recipients.len());
        for agent_id in recipients {
            match self.enqueue_to(agent_id, template.clone()) {
                Ok(depth) => delivered_to.push((agent_id, depth)),
                Err(reason) => {
                    self.divert(&template, agent_id, reason);
                }
            }
        }

        // One more read-lock pass to bump per-subscriber counters.
        {
            let topics = self.topics.read();
            if let Some(topic) = topics.get(name) {
                for (agent_id, depth) in &delivered_to {
                    if let Some(sub) = topic.subscribers.iter().find(|s| s.agent_id == *agent_id) {
                        sub.messages_received.fetch_add(1, Ordering::Relaxed);
                        sub.queue_depth.store(*depth, Ordering::Relaxed);
                    }
                }
            }
        }

        self.counters.published.fetch_add(1, Ordering::Relaxed);
        self.counters
            .delivered
            .fetch_add(delivered_to.len() as u64, Ordering::Relaxed);
        Ok(delivered_to.len())
    }

    /// Enqueues to an agent's inbox; returns the inbox depth after the
    /// write, or the dead-letter reason on failure.
    fn enqueue_to(&self, agent_id: AgentId, frame: Frame) -> Result<u32, &'static str> {
        let Some(inbox) = self.discovery.inbox(agent_id) else {
            return Err(REASON_DEPARTED);
        };
        let priority = frame.header.priority().unwrap_or(Priority::Normal);
        match inbox.write(frame) {
            Ok(()) => Ok(inbox.depth(priority) as u32),
            Err(TransportError::QueueFull { .. }) => Err(REASON_BACKPRESSURE),
            Err(_) => Err(REASON_DEPARTED),
        }
    }

    fn divert(&self, frame: &Frame, intended: AgentId, reason: &str) {
        self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
        let accepted = self.dlq.push(DeadLetter {
            header: frame.header,
            payload: frame.payload.clone(),
            intended,
            reason: reason.to_string(),
            retries: 0,
            last_retry_ns: self.clock.monotonic_ns(),
        });
        if !accepted {
            self.counters.routing_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Dead-letters an undeliverable frame on behalf of a component that
    /// already owns it (harness shutdown drain).
    pub fn dead_letter_frame(&self, frame: &Frame, intended: AgentId, reason: &str) {
        self.divert(frame, intended, reason);
    }

    // ------------------------------------------------------------------
    // Request / response
    // ------------------------------------------------------------------

    /// Sends a correlated request to a target agent.
    ///
    /// Does not block awaiting the response: the caller polls the
    /// pending table or watches its inbox for the Response frame. An
    /// unknown target is not an error here; the pending entry simply
    /// times out and the sweep dead-letters it (departed agents are
    /// detected lazily).
    ///
    /// # Errors
    ///
    /// [`RouterError::InvalidArgument`] for an oversized payload or zero
    /// TTL; [`RouterError::CapacityExceeded`] when the pending table is
    /// full; [`RouterError::Transport`] when the target's inbox rejects
    /// the frame (requests are rejected back to the caller, not
    /// diverted).
    pub fn send_request(
        &self,
        target: AgentId,
        source: AgentId,
        payload: &[u8],
        ttl: std::time::Duration,
        priority: Priority,
    ) -> Result<CorrelationId, RouterError> {
        if payload.len() > FrameHeader::MAX_PAYLOAD {
            return Err(RouterError::InvalidArgument {
                field: "payload",
                reason: format!("{} bytes exceeds 16 MiB", payload.len()),
            });
        }
        let ttl_ms = u32::try_from(ttl.as_millis()).unwrap_or(u32::MAX);
        if ttl_ms == 0 {
            return Err(RouterError::InvalidArgument {
                field: "ttl",
                reason: "must be at least 1ms".to_string(),
            });
        }
        if self.pending.len() >= MAX_PENDING_REQUESTS {
            return Err(RouterError::CapacityExceeded {
                resource: "pending requests",
            });
        }

        let correlation = CorrelationId::new(self.next_correlation.fetch_add(1, Ordering::Relaxed));
        let now = self.clock.monotonic_ns();
        self.pending.insert(
            correlation,
            PendingRequest {
                correlation,
                requester: source,
                target,
                issued_ns: now,
                ttl_ms,
                priority,
                completed: false,
            },
        );

        let frame = Frame::new(
            &FrameParams {
                message_id: self.next_message_id(),
                timestamp_ns: now,
                source,
                correlation: correlation.as_u32(),
                msg_type: MsgType::Request,
                priority,
                flags: FrameFlags::RESPONSE_EXPECTED,
                ttl_ms,
                topic: "",
            },
            payload,
        );

        if let Some(inbox) = self.discovery.inbox(target) {
            if let Err(source_err) = inbox.write(frame) {
                // Requests reject back to the caller; the pending entry
                // is withdrawn so the correlation id is not leaked.
                self.pending.remove(&correlation);
                self.counters.routing_errors.fetch_add(1, Ordering::Relaxed);
                return Err(RouterError::Transport { source: source_err });
            }
        } else {
            trace!(%target, %correlation, "request target unresolved, awaiting timeout");
        }

        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        Ok(correlation)
    }

    /// Completes a pending request and delivers the response.
    ///
    /// # Errors
    ///
    /// [`RouterError::PendingNotFound`] when the correlation id is
    /// unknown or the request already completed.
    pub fn send_response(
        &self,
        correlation: CorrelationId,
        payload: &[u8],
    ) -> Result<(), RouterError> {
        let (requester, target, priority) = {
            let Some(mut entry) = self.pending.get_mut(&correlation) else {
                return Err(RouterError::PendingNotFound {
                    correlation_id: correlation,
                });
            };
            if entry.completed {
                return Err(RouterError::PendingNotFound {
                    correlation_id: correlation,
                });
            }
            entry.completed = true;
            (entry.requester, entry.target, entry.priority)
        };

        let frame = Frame::new(
            &FrameParams {
                message_id: self.next_message_id(),
                timestamp_ns: self.clock.monotonic_ns(),
                source: target,
                correlation: correlation.as_u32(),
                msg_type: MsgType::Response,
                priority,
                flags: FrameFlags::empty(),
                ttl_ms: 0,
                topic: "",
            },
            payload,
        );

        if let Err(reason) = self.enqueue_to(requester, frame.clone()) {
            self.divert(&frame, requester, reason);
        }
        self.counters.responses.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// State of a pending request, if the record still exists.
    #[must_use]
    pub fn pending_request(&self, correlation: CorrelationId) -> Option<PendingRequest> {
        self.pending.get(&correlation).map(|e| e.clone())
    }

    /// Expires timed-out pending requests and collects completed ones.
    ///
    /// For every expired entry a DeadLetter frame with reason
    /// `"timeout"` is produced for the requester; if the requester's
    /// inbox cannot take it, the notice lands in the dead-letter queue.
    /// Returns the number of requests newly timed out. Run at a period
    /// of at most a quarter of the smallest TTL in use.
    pub fn sweep_pending(&self) -> usize {
        let now = self.clock.monotonic_ns();
        let mut expired: Vec<PendingRequest> = Vec::new();
        self.pending.retain(|_, entry| {
            if entry.completed {
                return false;
            }
            if entry.is_expired(now) {
                entry.completed = true;
                expired.push(entry.clone());
                return false;
            }
            true
        });

        for entry in &expired {
            self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
            let notice = DeadLetterNotice {
                reason: REASON_TIMEOUT.to_string(),
                original_target: entry.target.as_u32(),
                correlation_id: entry.correlation.as_u32(),
            };
            let payload = match serde_json::to_vec(&notice) {
                Ok(payload) => payload,
                Err(e) => {
                    debug_assert!(false, "dead-letter notice serialization failed: {e}");
                    warn!("dead-letter notice serialization failed: {e}");
                    continue;
                }
            };
            let frame = Frame::new(
                &FrameParams {
                    message_id: self.next_message_id(),
                    timestamp_ns: now,
                    source: entry.target,
                    correlation: entry.correlation.as_u32(),
                    msg_type: MsgType::DeadLetter,
                    priority: entry.priority,
                    flags: FrameFlags::empty(),
                    ttl_ms: 0,
                    topic: "",
                },
                &payload,
            );
            if let Err(reason) = self.enqueue_to(entry.requester, frame.clone()) {
                self.divert(&frame, entry.requester, reason);
            }
            debug!(
                correlation = %entry.correlation,
                target = %entry.target,
                "pending request timed out"
            );
        }
        expired.len()
    }

    // ------------------------------------------------------------------
    // Work queues
    // ------------------------------------------------------------------

    /// Creates a work queue. Idempotent when the strategy matches.
    ///
    /// # Errors
    ///
    /// [`RouterError::QueueExists`] on a strategy mismatch,
    /// [`RouterError::CapacityExceeded`] when the table is full.
    pub fn create_work_queue(
        &self,
        name: TopicName,
        strategy: RoutingStrategy,
    ) -> Result<(), RouterError> {
        let mut queues = self.queues.write();
        if let Some(existing) = queues.get(&name) {
            if existing.strategy == strategy {
                return Ok(());
            }
            return Err(RouterError::QueueExists { name });
        }
        let queue = WorkQueue {
            name: name.clone(),
            strategy,
            workers: Vec::new(),
            cursor: AtomicU64::new(0),
        };
        queues
            .insert(queue)
            .map_err(|_| RouterError::CapacityExceeded {
                resource: "work queue table",
            })?;
        debug!(%name, ?strategy, "work queue created");
        Ok(())
    }

    /// Registers a worker on a queue. Duplicates short-circuit to `Ok`.
    ///
    /// # Errors
    ///
    /// [`RouterError::QueueNotFound`],
    /// [`RouterError::CapacityExceeded`] at [`MAX_WORKERS_PER_QUEUE`].
    pub fn register_worker(
        &self,
        name: &TopicName,
        agent_id: AgentId,
        agent_name: AgentName,
    ) -> Result<(), RouterError> {
        let mut queues = self.queues.write();
        let queue = queues
            .get_mut(name)
            .ok_or_else(|| RouterError::QueueNotFound { name: name.clone() })?;
        if queue.workers.iter().any(|w| w.agent_id == agent_id) {
            return Ok(());
        }
        if queue.workers.len() >= MAX_WORKERS_PER_QUEUE {
            return Err(RouterError::CapacityExceeded {
                resource: "queue workers",
            });
        }
        queue.workers.push(Worker {
            agent_id,
            agent_name,
        });
        Ok(())
    }

    /// Dispatches one work item to a single worker chosen by the
    /// queue's strategy; returns the chosen worker's id.
    ///
    /// `routing_key` feeds the ConsistentHash strategy and defaults to
    /// the payload's fast hash. Tie-breaks are deterministic: lowest
    /// agent id wins under LeastLoaded and HighestPriority.
    ///
    /// # Errors
    ///
    /// [`RouterError::QueueNotFound`], [`RouterError::NoWorkers`],
    /// [`RouterError::InvalidArgument`] for an oversized payload, and
    /// [`RouterError::Transport`] when the chosen worker's inbox rejects
    /// the frame (work items reject back to the caller so it can retry
    /// or shed load).
    pub fn distribute_work_item(
        &self,
        name: &TopicName,
        source: AgentId,
        payload: &[u8],
        priority: Priority,
        routing_key: Option<&[u8]>,
    ) -> Result<AgentId, RouterError> {
        if payload.len() > FrameHeader::MAX_PAYLOAD {
            return Err(RouterError::InvalidArgument {
                field: "payload",
                reason: format!("{} bytes exceeds 16 MiB", payload.len()),
            });
        }

        let (workers, strategy, cursor) = {
            let queues = self.queues.read();
            let queue = queues
                .get(name)
                .ok_or_else(|| RouterError::QueueNotFound { name: name.clone() })?;
            if queue.workers.is_empty() {
                return Err(RouterError::NoWorkers { name: name.clone() });
            }
            let cursor = match queue.strategy {
                RoutingStrategy::RoundRobin => queue.cursor.fetch_add(1, Ordering::Relaxed),
                _ => 0,
            };
            (queue.workers.clone(), queue.strategy, cursor)
        };

        let chosen = self.select_worker(&workers, strategy, cursor, payload, routing_key);

        let frame = Frame::new(
            &FrameParams {
                message_id: self.next_message_id(),
                timestamp_ns: self.clock.monotonic_ns(),
                source,
                correlation: 0,
                msg_type: MsgType::WorkItem,
                priority,
                flags: FrameFlags::empty(),
                ttl_ms: 0,
                topic: name.as_str(),
            },
            payload,
        );

        let Some(inbox) = self.discovery.inbox(chosen) else {
            self.counters.routing_errors.fetch_add(1, Ordering::Relaxed);
            return Err(RouterError::AgentNotFound { agent_id: chosen });
        };
        inbox.write(frame).map_err(|source_err| {
            self.counters.routing_errors.fetch_add(1, Ordering::Relaxed);
            RouterError::Transport { source: source_err }
        })?;
        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(chosen)
    }

    fn select_worker(
        &self,
        workers: &[Worker],
        strategy: RoutingStrategy,
        cursor: u64,
        payload: &[u8],
        routing_key: Option<&[u8]>,
    ) -> AgentId {
        debug_assert!(!workers.is_empty());
        match strategy {
            RoutingStrategy::RoundRobin => {
                workers[(cursor % workers.len() as u64) as usize].agent_id
            }
            RoutingStrategy::LeastLoaded => {
                // One-shot health read per worker; unresolvable workers
                // sort as fully loaded. Ties break by lowest agent id.
                let mut best = (f64::INFINITY, AgentId::new(u32::MAX));
                for worker in workers {
                    let load = self
                        .discovery
                        .lookup_by_id(worker.agent_id)
                        .map_or(f64::INFINITY, |h| h.health.load_factor.as_f64());
                    let candidate = (load, worker.agent_id);
                    if candidate.0 < best.0 || (candidate.0 == best.0 && candidate.1 < best.1) {
                        best = candidate;
                    }
                }
                best.1
            }
            RoutingStrategy::HighestPriority => {
                let mut best = (f64::NEG_INFINITY, AgentId::new(u32::MAX));
                for worker in workers {
                    let rating = self
                        .discovery
                        .lookup_by_id(worker.agent_id)
                        .map_or(f64::NEG_INFINITY, |h| {
                            h.capabilities
                                .iter()
                                .map(|c| c.performance_rating.as_f64())
                                .fold(0.0, f64::max)
                        });
                    if rating > best.0 || (rating == best.0 && worker.agent_id < best.1) {
                        best = (rating, worker.agent_id);
                    }
                }
                best.1
            }
            RoutingStrategy::Random => {
                let idx = rand::thread_rng().gen_range(0..workers.len());
                workers[idx].agent_id
            }
            RoutingStrategy::ConsistentHash => {
                let key_hash = routing_key
                    .map_or_else(|| vector::fast_hash(payload), vector::fast_hash);
                let mut ids: Vec<AgentId> = workers.iter().map(|w| w.agent_id).collect();
                ids.sort_unstable();
                ids[key_hash as usize % ids.len()]
            }
        }
    }

    /// Acknowledges a processed work item back to its dispatcher.
    ///
    /// The ack's correlation id carries the original message id so the
    /// dispatcher can match it. Best-effort: an unreachable dispatcher
    /// diverts the ack to the dead-letter queue.
    pub fn send_work_ack(&self, worker: AgentId, item: &FrameHeader) {
        let frame = Frame::new(
            &FrameParams {
                message_id: self.next_message_id(),
                timestamp_ns: self.clock.monotonic_ns(),
                source: worker,
                correlation: item.message_id(),
                msg_type: MsgType::WorkAck,
                priority: item.priority().unwrap_or(Priority::Normal),
                flags: FrameFlags::empty(),
                ttl_ms: 0,
                topic: item.topic(),
            },
            &[],
        );
        let dispatcher = item.source();
        if let Err(reason) = self.enqueue_to(dispatcher, frame.clone()) {
            self.divert(&frame, dispatcher, reason);
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dead_lettered: self.counters.dead_lettered.load(Ordering::Relaxed),
            requests: self.counters.requests.load(Ordering::Relaxed),
            responses: self.counters.responses.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            routing_errors: self.counters.routing_errors.load(Ordering::Relaxed),
            topics: self.topics.read().len(),
            work_queues: self.queues.read().len(),
            pending: self.pending.len(),
            dlq: self.dlq.stats(),
        }
    }

    /// Dead-letter queue counters.
    #[must_use]
    pub fn dlq_stats(&self) -> DlqStats {
        self.dlq.stats()
    }

    /// Copies out the dead-letter entries, oldest first.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dlq.snapshot()
    }

    /// One dead-letter retry pass; returns `(attempted, redelivered)`.
    pub fn retry_dead_letters(&self) -> (usize, usize) {
        self.dlq.retry_pass(&self.discovery, &self.clock)
    }
}
