//! Error types for every fabric subsystem
//!
//! Each subsystem exposes its own `thiserror` enum; all data-path
//! operations are total and return one of the documented variants.
//! Invariant violations are fatal in debug builds (`debug_assert!`) and
//! logged in release builds.

use thiserror::Error;

use crate::domain_types::{AgentId, AgentName, CorrelationId, TopicName, UserName};
use crate::rbac::Permission;
use crate::transport::Priority;

/// Errors produced by the ring transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The frame exceeds the maximum payload size.
    #[error("frame too large: {size} bytes (max: {max} bytes)")]
    TooLarge {
        /// Encoded size of the rejected frame.
        size: usize,
        /// Maximum the transport accepts.
        max: usize,
    },

    /// The target priority class has no room for the frame.
    ///
    /// Returned immediately; the transport never blocks a producer and
    /// never performs a partial write.
    #[error("queue full: class {priority:?} ({needed} bytes needed, {available} available)")]
    QueueFull {
        /// Class that rejected the frame.
        priority: Priority,
        /// Bytes the frame would have consumed.
        needed: usize,
        /// Bytes left in the class budget at rejection time.
        available: usize,
    },

    /// The transport has been closed.
    ///
    /// Writes fail with this immediately after `close()`; reads drain
    /// remaining frames first and only then report it.
    #[error("transport closed")]
    Closed,

    /// A bounded-wait read reached its deadline without a frame.
    #[error("read timed out after {timeout_ms}ms")]
    TimedOut {
        /// The timeout that elapsed.
        timeout_ms: u64,
    },
}

/// Errors produced by the discovery registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// An agent with the same name is already registered.
    #[error("agent name already registered: {name}")]
    NameExists {
        /// The conflicting name.
        name: AgentName,
    },

    /// The registry is at its fixed capacity.
    #[error("agent registry full: {capacity} records")]
    CapacityExceeded {
        /// The documented registry capacity.
        capacity: usize,
    },

    /// No agent matches the given name/instance pair or id.
    #[error("agent not found")]
    NotFound,
}

/// Errors produced by router operations.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Argument failed validation before any routing work happened.
    #[error("invalid argument: {field}: {reason}")]
    InvalidArgument {
        /// Which argument was rejected.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A topic exists with a different (strategy, persistent) pair.
    ///
    /// Creation with matching parameters is idempotent and succeeds.
    #[error("topic already exists with different parameters: {name}")]
    TopicExists {
        /// The conflicting topic name.
        name: TopicName,
    },

    /// A work queue exists with a different strategy.
    #[error("work queue already exists with different parameters: {name}")]
    QueueExists {
        /// The conflicting queue name.
        name: TopicName,
    },

    /// The named topic does not exist.
    #[error("topic not found: {name}")]
    TopicNotFound {
        /// The missing topic name.
        name: TopicName,
    },

    /// The named work queue does not exist.
    #[error("work queue not found: {name}")]
    QueueNotFound {
        /// The missing queue name.
        name: TopicName,
    },

    /// The target agent is not present in discovery.
    #[error("agent not found: {agent_id}")]
    AgentNotFound {
        /// The unresolved agent id.
        agent_id: AgentId,
    },

    /// No pending request matches the correlation id, or it already
    /// completed.
    #[error("no outstanding request for correlation id {correlation_id}")]
    PendingNotFound {
        /// The unmatched correlation id.
        correlation_id: CorrelationId,
    },

    /// A bounded router structure is full.
    #[error("capacity exceeded: {resource}")]
    CapacityExceeded {
        /// Which structure rejected the insert.
        resource: &'static str,
    },

    /// A queue has no registered workers to dispatch to.
    #[error("work queue has no workers: {name}")]
    NoWorkers {
        /// The empty queue's name.
        name: TopicName,
    },

    /// The transport rejected an enqueue that the operation surfaces to
    /// the caller (requests reject; publishes divert to the DLQ instead).
    #[error("transport rejected frame: {source}")]
    Transport {
        /// The underlying transport failure.
        #[source]
        source: TransportError,
    },
}

/// Errors produced by the RBAC/session subsystem.
#[derive(Debug, Error)]
pub enum RbacError {
    /// A user with this name already exists.
    #[error("user already exists: {name}")]
    UserExists {
        /// The conflicting user name.
        name: UserName,
    },

    /// No user matches the given name or id.
    #[error("user not found")]
    UserNotFound,

    /// Password verification failed.
    #[error("bad credentials")]
    BadCredentials,

    /// The account is locked after repeated failures.
    ///
    /// Stays locked until an admin clears it; further attempts do not
    /// reset the failure counter.
    #[error("account locked")]
    Locked,

    /// The session token is unknown or has been revoked.
    #[error("invalid session")]
    InvalidSession,

    /// The session's TTL has elapsed.
    ///
    /// Expired sessions fail authorization even before the cleanup sweep
    /// collects them.
    #[error("session expired")]
    Expired,

    /// The session's permission mask does not include the requested bit.
    #[error("permission denied: {requested:?}")]
    PermissionDenied {
        /// The permission that was requested.
        requested: Permission,
    },

    /// A bounded RBAC structure is full.
    #[error("capacity exceeded: {resource}")]
    CapacityExceeded {
        /// Which structure rejected the insert.
        resource: &'static str,
    },

    /// Password hashing or verification failed internally.
    #[error("password hashing failed: {reason}")]
    Hash {
        /// Stringified KDF error.
        reason: String,
    },
}

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration field failed validation.
    #[error("invalid configuration: {field}: {reason}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// An environment variable override could not be parsed.
    #[error("bad environment override {var}: {reason}")]
    Env {
        /// The environment variable name.
        var: &'static str,
        /// Why its value was rejected.
        reason: String,
    },
}

/// Top-level fabric errors.
///
/// Only initialization can fail fatally; the data path reports errors
/// through the subsystem enums above and never terminates the process.
#[derive(Debug, Error)]
pub enum FabricError {
    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A required background thread could not be started.
    #[error("fabric initialization failed: {message}")]
    Init {
        /// What failed during initialization.
        message: String,
    },

    /// A registry operation failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A router operation failed.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// An RBAC operation failed.
    #[error(transparent)]
    Rbac(#[from] RbacError),

    /// A transport operation failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
