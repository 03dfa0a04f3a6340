//! # Weft - an in-process message fabric for multi-agent systems
//!
//! Weft connects long-lived worker agents within one host through a
//! shared-memory message fabric:
//!
//! - [`transport`]: priority-classed, fixed-capacity frame rings with
//!   non-blocking and timeout-bounded reads and CRC32C integrity at
//!   dequeue.
//! - [`discovery`]: a registry of agents by name, kind, and capability,
//!   with heartbeat-driven health used to select targets.
//! - [`router`]: topic pub/sub, request/response correlation, work
//!   queues with pluggable strategies, and a bounded dead-letter queue.
//! - [`vector`]: runtime-dispatched CRC32C, hash, copy, and batch
//!   operators behind a one-shot CPU feature probe.
//! - [`rbac`]: users, argon2id credentials, lockout, sessions with TTL,
//!   a role permission bitmask, and a circular audit log.
//! - [`harness`]: the per-agent lifecycle runtime (register, subscribe,
//!   event loop, drain, unregister).
//!
//! Everything hangs off an explicit [`Fabric`] handle; there are no
//! process-wide singletons. Initialize once, share by `Arc`.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use weft::{
//!     AgentBehavior, AgentContext, AgentHarness, AgentSpec, Fabric, FabricConfig, Frame,
//!     domain_types::AgentKind,
//! };
//!
//! struct Echo;
//!
//! impl AgentBehavior for Echo {
//!     fn on_request(&mut self, _ctx: &AgentContext, frame: &Frame) -> Option<Vec<u8>> {
//!         Some(frame.payload.to_vec())
//!     }
//! }
//!
//! # fn main() -> Result<(), weft::FabricError> {
//! let fabric = Fabric::new(FabricConfig::development())?;
//! let spec = AgentSpec::new("echo", AgentKind::Constructor)?;
//! let agent = AgentHarness::spawn(Arc::clone(&fabric), spec, Echo)?;
//! // ... route traffic ...
//! agent.shutdown();
//! fabric.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency model
//!
//! Multi-threaded, shared-memory, cooperatively partitioned: agents own
//! their threads, and the only blocking primitive on the data path is
//! the bounded-wait ring read, which polls in ≤ 1 ms periods so
//! shutdown is always observable. Nothing in the fabric blocks a caller
//! indefinitely.
//!
//! Lock order, outermost first, to keep the fabric deadlock-free:
//!
//! ```text
//! Discovery < Router.topics < Router.queues < Router.pending
//!   < Router.dlq < RBAC.users < RBAC.sessions < RBAC.audit
//! ```
//!
//! Components acquire locks only in this order, and in practice each
//! operation holds at most one at a time (lists are snapshotted and
//! released before the next lock is taken).
//!
//! ## Delivery guarantees
//!
//! Single-host only; queues are in-memory and do not survive restarts.
//! Within one (priority class, producer) pair a ring is strictly FIFO;
//! across classes the consumer may prefer urgent frames; across topics
//! there is no ordering contract. Undeliverable frames go to the
//! dead-letter queue, which never drops silently.

pub mod clock;
pub mod config;
pub mod discovery;
pub mod domain_types;
pub mod error;
pub mod fabric;
pub mod harness;
pub mod rbac;
pub mod router;
pub mod telemetry;
pub mod transport;
pub mod vector;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{FabricConfig, FabricConfigBuilder};
pub use discovery::{AgentHandle, AgentRegistration, Discovery};
pub use error::{
    ConfigError, FabricError, RbacError, RegistryError, RouterError, TransportError,
};
pub use fabric::Fabric;
pub use harness::{AgentBehavior, AgentContext, AgentHarness, AgentSpec};
pub use rbac::{Permission, Role, SecurityStore, SessionToken};
pub use router::{Router, RouterStats};
pub use transport::{Frame, FrameHeader, MsgType, Priority, RingTransport};
