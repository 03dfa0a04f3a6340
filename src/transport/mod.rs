//! Ring-buffered frame transport
//!
//! Delivers framed bytes between producers and consumers within a single
//! host with bounded memory and predictable latency: a fixed wire header
//! ([`FrameHeader`]), six independently-rung priority classes per
//! transport ([`RingTransport`]), non-blocking and timeout-bounded reads,
//! and CRC32C integrity verified at dequeue.
//!
//! Each agent owns one transport as its inbox; the router resolves the
//! recipient through discovery and enqueues there. Enqueue failures are
//! always reported to the caller, never silently dropped.

mod frame;
mod ring;

pub use frame::{Frame, FrameError, FrameFlags, FrameHeader, FrameParams, MsgType, Priority};
pub use ring::{ClassStats, RingTransport, TransportStats};
