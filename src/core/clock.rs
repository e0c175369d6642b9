//! Wall Clock
//!
//! Every timestamp the engine embeds in state or on the wire comes from an
//! injected [`Clock`], so tests can drive presence timeouts and LWW ordering
//! without sleeping.

use std::sync::atomic::{AtomicI64, Ordering};

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> Millis;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Millis {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `start` milliseconds.
    pub fn new(start: Millis) -> Self {
        Self { now: AtomicI64::new(start) }
    }

    /// Move the clock forward.
    pub fn advance(&self, millis: Millis) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, millis: Millis) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}

/// Issues timestamps that never repeat or go backwards.
///
/// Last-write-wins only accepts strictly greater timestamps, so two local
/// actions inside the same millisecond must still be ordered.
#[derive(Debug, Default)]
pub struct MonotonicStamp {
    last: Millis,
}

impl MonotonicStamp {
    /// Next timestamp: `now`, or one past the previous stamp if the clock
    /// has not moved forward.
    pub fn next(&mut self, now: Millis) -> Millis {
        self.last = now.max(self.last + 1);
        self.last
    }

    /// Raise the floor so future stamps exceed `millis`.
    pub fn observe(&mut self, millis: Millis) {
        self.last = self.last.max(millis);
    }
}
