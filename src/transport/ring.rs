//! Priority-classed frame rings
//!
//! One bounded MPMC ring per priority class. The synchronization protocol
//! is the classic sequence-number design:
//!
//! - `enqueue_pos` and `dequeue_pos` are unbounded u64 sequence numbers;
//!   the slot index is `pos & mask`. Unbounded counters make the ABA
//!   problem unreachable in practice.
//! - Each slot carries its own sequence number. A producer may claim slot
//!   `pos` only while `slot.seq == pos`; after writing it publishes with
//!   `slot.seq = pos + 1` (Release). A consumer may take the slot only
//!   while `slot.seq == pos + 1`; after reading it recycles with
//!   `slot.seq = pos + capacity` (Release).
//! - Claims race through compare-exchange on the position counters;
//!   contention is expected to be low because topic demultiplexing
//!   already spread destinations across inboxes.
//!
//! A per-class byte budget is enforced as a hard cap in addition to the
//! slot count: a frame that would exceed the remaining budget is rejected
//! with `QueueFull`, never partially written. Frames are copied in on
//! enqueue; no reference to producer memory survives the call.
//!
//! CRC32C is re-verified at dequeue. A frame whose stored checksum
//! disagrees with the recomputation is dropped and counted, never
//! delivered.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_utils::{Backoff, CachePadded};
use tracing::warn;

use crate::clock::SharedClock;
use crate::error::TransportError;
use crate::transport::frame::{Frame, FrameHeader, Priority};

/// Poll period for bounded-wait reads; bounds shutdown observability.
const POLL_PERIOD: Duration = Duration::from_millis(1);

struct Slot {
    seq: AtomicU64,
    value: UnsafeCell<MaybeUninit<Frame>>,
}

/// One priority class: a bounded MPMC frame ring with a byte budget.
struct ClassRing {
    slots: Box<[Slot]>,
    mask: u64,
    enqueue_pos: CachePadded<AtomicU64>,
    dequeue_pos: CachePadded<AtomicU64>,
    bytes_in_flight: AtomicUsize,
    byte_budget: usize,
    corrupt_frames: AtomicU64,
}

// SAFETY: slots are handed between threads only through the sequence
// protocol above; a slot's value is never accessed concurrently.
unsafe impl Send for ClassRing {}
unsafe impl Sync for ClassRing {}

impl ClassRing {
    fn new(slot_count: usize, byte_budget: usize) -> Self {
        debug_assert!(slot_count.is_power_of_two());
        let slots = (0..slot_count as u64)
            .map(|i| Slot {
                seq: AtomicU64::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: slot_count as u64 - 1,
            enqueue_pos: CachePadded::new(AtomicU64::new(0)),
            dequeue_pos: CachePadded::new(AtomicU64::new(0)),
            bytes_in_flight: AtomicUsize::new(0),
            byte_budget,
            corrupt_frames: AtomicU64::new(0),
        }
    }

    fn depth(&self) -> usize {
        let tail = self.enqueue_pos.load(Ordering::Relaxed);
        let head = self.dequeue_pos.load(Ordering::Relaxed);
        tail.saturating_sub(head) as usize
    }

    /// Reserves byte budget; the whole frame fits or nothing is charged.
    fn charge_budget(&self, need: usize, priority: Priority) -> Result<(), TransportError> {
        let mut current = self.bytes_in_flight.load(Ordering::Relaxed);
        loop {
            let Some(next) = current.checked_add(need) else {
                return Err(TransportError::QueueFull {
                    priority,
                    needed: need,
                    available: self.byte_budget.saturating_sub(current),
                });
            };
            if next > self.byte_budget {
                return Err(TransportError::QueueFull {
                    priority,
                    needed: need,
                    available: self.byte_budget.saturating_sub(current),
                });
            }
            match self.bytes_in_flight.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    fn write(&self, frame: Frame, priority: Priority) -> Result<(), TransportError> {
        let need = frame.encoded_len();
        self.charge_budget(need, priority)?;

        let backoff = Backoff::new();
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[(pos & self.mask) as usize];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq as i64 - pos as i64;
            if diff == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the CAS granted exclusive ownership of
                        // this slot until the Release store below.
                        unsafe {
                            (*slot.value.get()).write(frame);
                        }
                        slot.seq.store(pos + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(observed) => pos = observed,
                }
            } else if diff < 0 {
                // One full lap behind: every slot still holds an
                // unconsumed frame.
                self.bytes_in_flight.fetch_sub(need, Ordering::Release);
                return Err(TransportError::QueueFull {
                    priority,
                    needed: need,
                    available: self
                        .byte_budget
                        .saturating_sub(self.bytes_in_flight.load(Ordering::Relaxed)),
                });
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
                backoff.spin();
            }
        }
    }

    fn pop_raw(&self) -> Option<Frame> {
        let backoff = Backoff::new();
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[(pos & self.mask) as usize];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq as i64 - (pos + 1) as i64;
            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the CAS granted exclusive ownership;
                        // the producer published the value with Release.
                        let frame = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.seq.store(pos + self.mask + 1, Ordering::Release);
                        self.bytes_in_flight
                            .fetch_sub(frame.encoded_len(), Ordering::Release);
                        return Some(frame);
                    }
                    Err(observed) => pos = observed,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
                backoff.spin();
            }
        }
    }

    /// Pops the next frame that passes CRC verification.
    fn pop_verified(&self) -> Option<Frame> {
        loop {
            let frame = self.pop_raw()?;
            if frame.verify_checksum() {
                return Some(frame);
            }
            self.corrupt_frames.fetch_add(1, Ordering::Relaxed);
            warn!(
                message_id = frame.header.message_id(),
                "dropping frame with checksum mismatch"
            );
        }
    }
}

impl Drop for ClassRing {
    fn drop(&mut self) {
        while self.pop_raw().is_some() {}
    }
}

/// Per-class occupancy counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassStats {
    /// Frames currently queued.
    pub depth: usize,
    /// Bytes currently queued.
    pub bytes_in_flight: usize,
    /// Frames dropped for checksum mismatch since creation.
    pub corrupt_frames: u64,
}

/// Transport-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportStats {
    /// Per priority class, indexed by [`Priority::index`].
    pub classes: [ClassStats; Priority::COUNT],
}

impl TransportStats {
    /// Total frames dropped for checksum mismatch.
    #[must_use]
    pub fn corrupt_frames(&self) -> u64 {
        self.classes.iter().map(|c| c.corrupt_frames).sum()
    }

    /// Total queued frames across classes.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.classes.iter().map(|c| c.depth).sum()
    }
}

/// A six-class priority ring transport: one inbox per agent.
///
/// Within one (priority, producer) pair order is FIFO; across producers
/// within a class, order is CAS arrival order; across classes, order is
/// undefined and consumers may drain urgent classes first.
pub struct RingTransport {
    classes: [ClassRing; Priority::COUNT],
    closed: AtomicBool,
    clock: SharedClock,
}

impl std::fmt::Debug for RingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingTransport")
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}

impl RingTransport {
    /// Creates a transport with `slot_count` slots and `byte_budget`
    /// bytes per priority class.
    ///
    /// `slot_count` must be a power of two (enforced upstream by
    /// `RingSlotCount`).
    #[must_use]
    pub fn new(slot_count: usize, byte_budget: usize, clock: SharedClock) -> Self {
        Self {
            classes: std::array::from_fn(|_| ClassRing::new(slot_count, byte_budget)),
            closed: AtomicBool::new(false),
            clock,
        }
    }

    /// Enqueues a frame on its header's priority class.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Closed`] after [`RingTransport::close`].
    /// - [`TransportError::TooLarge`] when the payload exceeds 16 MiB or
    ///   the frame cannot fit an empty ring.
    /// - [`TransportError::QueueFull`] when the class is out of slots or
    ///   byte budget; nothing is written.
    pub fn write(&self, frame: Frame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let priority = frame.header.priority().unwrap_or(Priority::Normal);
        let class = &self.classes[priority.index()];
        if frame.payload.len() > FrameHeader::MAX_PAYLOAD {
            return Err(TransportError::TooLarge {
                size: frame.payload.len(),
                max: FrameHeader::MAX_PAYLOAD,
            });
        }
        if frame.encoded_len() > class.byte_budget {
            return Err(TransportError::TooLarge {
                size: frame.encoded_len(),
                max: class.byte_budget,
            });
        }
        class.write(frame, priority)
    }

    /// Non-blocking read from one class.
    ///
    /// Returns `Ok(None)` when the class is empty and the transport is
    /// open.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] once the transport is closed and the
    /// class has drained.
    pub fn try_read(&self, priority: Priority) -> Result<Option<Frame>, TransportError> {
        match self.classes[priority.index()].pop_verified() {
            Some(frame) => Ok(Some(frame)),
            None => {
                if self.closed.load(Ordering::Acquire) {
                    Err(TransportError::Closed)
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Non-blocking read preferring urgent classes.
    ///
    /// Scans Emergency through Background and returns the first frame
    /// found. No fairness is promised across classes.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] once closed and fully drained.
    pub fn try_read_any(&self) -> Result<Option<Frame>, TransportError> {
        for class in &self.classes {
            if let Some(frame) = class.pop_verified() {
                return Ok(Some(frame));
            }
        }
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(None)
        }
    }

    /// Bounded-wait read from one class.
    ///
    /// Implemented by polling with short sleeps rather than a blocking
    /// primitive, so a close is observed within one poll period. A zero
    /// timeout degrades to [`RingTransport::try_read`].
    ///
    /// # Errors
    ///
    /// [`TransportError::TimedOut`] at the deadline,
    /// [`TransportError::Closed`] once closed and drained.
    pub fn read(
        &self,
        priority: Priority,
        timeout: Duration,
    ) -> Result<Option<Frame>, TransportError> {
        self.read_with(timeout, || self.try_read(priority))
    }

    /// Bounded-wait read preferring urgent classes.
    ///
    /// # Errors
    ///
    /// Same as [`RingTransport::read`].
    pub fn read_any(&self, timeout: Duration) -> Result<Option<Frame>, TransportError> {
        self.read_with(timeout, || self.try_read_any())
    }

    fn read_with(
        &self,
        timeout: Duration,
        mut attempt: impl FnMut() -> Result<Option<Frame>, TransportError>,
    ) -> Result<Option<Frame>, TransportError> {
        if timeout.is_zero() {
            return attempt();
        }
        let deadline = self
            .clock
            .monotonic_ns()
            .saturating_add(u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX));
        loop {
            if let Some(frame) = attempt()? {
                return Ok(Some(frame));
            }
            let now = self.clock.monotonic_ns();
            if now >= deadline {
                return Err(TransportError::TimedOut {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            let remaining = Duration::from_nanos(deadline - now);
            self.clock.sleep(remaining.min(POLL_PERIOD));
        }
    }

    /// Closes the transport: writes fail immediately, reads drain then
    /// report [`TransportError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether [`RingTransport::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queued frame count for one class.
    #[must_use]
    pub fn depth(&self, priority: Priority) -> usize {
        self.classes[priority.index()].depth()
    }

    /// Snapshot of occupancy and error counters.
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        let mut stats = TransportStats::default();
        for (i, class) in self.classes.iter().enumerate() {
            stats.classes[i] = ClassStats {
                depth: class.depth(),
                bytes_in_flight: class.bytes_in_flight.load(Ordering::Relaxed),
                corrupt_frames: class.corrupt_frames.load(Ordering::Relaxed),
            };
        }
        stats
    }
}
