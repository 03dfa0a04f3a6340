//! Dead-letter queue
//!
//! Bounded store for undeliverable or timed-out frames. Overflow never
//! loses an entry silently: a full queue rejects the newcomer and
//! increments a queryable dropped counter. A single retry worker
//! reattempts delivery with exponential backoff (100, 400, 1600 ms) up
//! to three times, then abandons the entry and counts it.
//!
//! Lock discipline: the queue mutex is the innermost router lock;
//! nothing is resolved through discovery while it is held.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::discovery::Discovery;
use crate::router::types::{DLQ_CAPACITY, DLQ_MAX_RETRIES, DeadLetter};
use crate::transport::{Frame, FrameFlags};

/// Dead-letter queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DlqStats {
    /// Entries currently queued.
    pub len: usize,
    /// Entries rejected because the queue was full.
    pub dropped: u64,
    /// Entries abandoned after exhausting retries.
    pub abandoned: u64,
    /// Entries successfully redelivered by the retry worker.
    pub redelivered: u64,
}

pub(crate) struct DeadLetterQueue {
    entries: Mutex<VecDeque<DeadLetter>>,
    dropped: AtomicU64,
    abandoned: AtomicU64,
    redelivered: AtomicU64,
}

impl DeadLetterQueue {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(64)),
            dropped: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            redelivered: AtomicU64::new(0),
        }
    }

    /// Enqueues a dead letter. Returns false (and counts) on overflow.
    pub(crate) fn push(&self, entry: DeadLetter) -> bool {
        let mut entries = self.entries.lock();
        if entries.len() >= DLQ_CAPACITY {
            drop(entries);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                intended = %entry.intended,
                reason = %entry.reason,
                "dead-letter queue full, entry dropped"
            );
            return false;
        }
        debug!(intended = %entry.intended, reason = %entry.reason, "frame dead-lettered");
        entries.push_back(entry);
        true
    }

    /// Copies out every entry, oldest first.
    pub(crate) fn snapshot(&self) -> Vec<DeadLetter> {
        self.entries.lock().iter().cloned().collect()
    }

    pub(crate) fn stats(&self) -> DlqStats {
        DlqStats {
            len: self.entries.lock().len(),
            dropped: self.dropped.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
        }
    }

    /// One retry pass: reattempts every due entry.
    ///
    /// Returns `(attempted, redelivered)`. Entries whose recipient still
    /// cannot accept the frame go back with an incremented retry
    /// counter; entries out of attempts are abandoned and counted.
    pub(crate) fn retry_pass(
        &self,
        discovery: &Discovery,
        clock: &SharedClock,
    ) -> (usize, usize) {
        let now = clock.monotonic_ns();
        let due: Vec<DeadLetter> = {
            let mut entries = self.entries.lock();
            let mut due = Vec::new();
            let mut keep = VecDeque::with_capacity(entries.len());
            while let Some(entry) = entries.pop_front() {
                if entry.is_due(now) {
                    due.push(entry);
                } else {
                    keep.push_back(entry);
                }
            }
            *entries = keep;
            due
        };

        let attempted = due.len();
        let mut redelivered = 0usize;
        for mut entry in due {
            if self.try_redeliver(&entry, discovery) {
                redelivered += 1;
                self.redelivered.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            entry.retries += 1;
            entry.last_retry_ns = now;
            if entry.retries >= DLQ_MAX_RETRIES {
                self.abandoned.fetch_add(1, Ordering::Relaxed);
                warn!(
                    intended = %entry.intended,
                    reason = %entry.reason,
                    "dead letter abandoned after {DLQ_MAX_RETRIES} attempts"
                );
            } else {
                self.push(entry);
            }
        }
        (attempted, redelivered)
    }

    fn try_redeliver(&self, entry: &DeadLetter, discovery: &Discovery) -> bool {
        let Some(inbox) = discovery.inbox(entry.intended) else {
            return false;
        };
        let mut header = entry.header;
        header.set_flags(header.flags() | FrameFlags::REDELIVERED);
        header.seal();
        let frame = Frame {
            header,
            payload: entry.payload.clone(),
        };
        inbox.write(frame).is_ok()
    }
}

/// Retry worker thread handle; stops on drop via the shared flag.
pub(crate) fn spawn_retry_worker(
    dlq: Arc<DeadLetterQueue>,
    discovery: Arc<Discovery>,
    clock: SharedClock,
    running: Arc<std::sync::atomic::AtomicBool>,
    period: std::time::Duration,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("weft-dlq-retry".to_string())
        .spawn(move || {
            while running.load(Ordering::Acquire) {
                let (attempted, redelivered) = dlq.retry_pass(&discovery, &clock);
                if attempted > 0 {
                    debug!(attempted, redelivered, "dead-letter retry pass");
                }
                clock.sleep(period);
            }
        })
}
