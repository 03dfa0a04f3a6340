//! Topic routing, request/response correlation, and work distribution
//!
//! The router sits in front of the ring transport as the logical pub/sub
//! and request/response layer. It owns the topic and work-queue tables,
//! the pending-request table, and the dead-letter queue; recipients are
//! resolved through discovery by agent id at send time, so the router
//! never owns an agent's lifetime and departed agents are detected
//! lazily when a frame can no longer be enqueued.
//!
//! All operations are total: adversarial input yields a documented
//! [`crate::error::RouterError`] variant, never a panic.

mod dlq;
mod router;
mod types;

pub use dlq::DlqStats;
pub use router::{
    REASON_BACKPRESSURE, REASON_DEPARTED, REASON_SHUTDOWN, REASON_TIMEOUT, Router, RouterStats,
};
pub use types::{
    DLQ_CAPACITY, DLQ_MAX_RETRIES, DLQ_RETRY_BACKOFF_MS, DeadLetter, DeadLetterNotice,
    MAX_PENDING_REQUESTS, MAX_SUBSCRIBERS_PER_TOPIC, MAX_TOPICS, MAX_WORK_QUEUES,
    MAX_WORKERS_PER_QUEUE, PendingRequest, SubscriberInfo,
};

pub(crate) use dlq::spawn_retry_worker;
