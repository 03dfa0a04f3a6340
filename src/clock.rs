//! Injectable time source
//!
//! Every component that reads time or sleeps does so through a [`Clock`]
//! handle so tests can drive TTL expiry, heartbeat freshness, and retry
//! backoff deterministically instead of sleeping for real.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

/// Time source used throughout the fabric.
///
/// Monotonic nanoseconds drive all TTL and backoff arithmetic; wall time
/// appears only in user-facing records (sessions, audit entries).
pub trait Clock: Send + Sync + fmt::Debug {
    /// Monotonic nanoseconds since an arbitrary per-process epoch.
    fn monotonic_ns(&self) -> u64;

    /// Current wall-clock time.
    fn wall(&self) -> SystemTime;

    /// Sleep for the given duration.
    ///
    /// Callers never request more than ~1 ms at a time on the data path,
    /// which keeps shutdown observable within one poll period.
    fn sleep(&self, duration: Duration);
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Production clock backed by [`Instant`] and [`SystemTime`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    /// Creates a clock anchored at construction time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic_ns(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn wall(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Manually-driven clock for tests.
///
/// `sleep` advances the clock instead of blocking, so timeout and backoff
/// paths run at full speed. Advancing is also available directly via
/// [`ManualClock::advance`].
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicU64,
}

impl ManualClock {
    /// Creates a clock starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward.
    pub fn advance(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.now_ns.fetch_add(ns, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn monotonic_ns(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst)
    }

    fn wall(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_nanos(self.now_ns.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
        // Yield so competing threads in timing tests make progress.
        std::thread::yield_now();
    }
}

/// Creates the production clock handle.
#[must_use]
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.monotonic_ns();
        let b = clock.monotonic_ns();
        assert!(b >= a, "monotonic time went backwards: {a} -> {b}");
    }

    #[test]
    fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::new();
        assert_eq!(clock.monotonic_ns(), 0);
        clock.sleep(Duration::from_millis(5));
        assert_eq!(clock.monotonic_ns(), 5_000_000);
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.monotonic_ns(), 1_005_000_000);
    }
}
