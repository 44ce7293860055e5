//! Time sources for block rotation and flush pacing.
//!
//! The commit log never reads the system clock directly: every component
//! samples time through an injected [`NowFn`], which keeps block rotation
//! and flush-cadence behavior deterministic under test.

use crate::types::Timestamp;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A function returning the current time in nanoseconds since the Unix epoch.
pub type NowFn = Arc<dyn Fn() -> Timestamp + Send + Sync>;

/// Returns a [`NowFn`] backed by the system clock.
pub fn system_now_fn() -> NowFn {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0)
    })
}

/// Manually driven clock for deterministic tests.
///
/// # Example
///
/// ```rust,ignore
/// use alopex_commitlog::clock::ManualClock;
///
/// let clock = ManualClock::new(500);
/// let now_fn = clock.now_fn();
/// clock.advance(std::time::Duration::from_nanos(1_000));
/// assert_eq!(now_fn(), 1_500);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Creates a clock starting at the given timestamp.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    /// Returns the current timestamp.
    pub fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }

    /// Sets the clock to an absolute timestamp.
    pub fn set(&self, ts: Timestamp) {
        self.now.store(ts, Ordering::SeqCst);
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, delta: Duration) {
        self.now.fetch_add(delta.as_nanos() as i64, Ordering::SeqCst);
    }

    /// Returns a [`NowFn`] view of this clock.
    pub fn now_fn(&self) -> NowFn {
        let now = Arc::clone(&self.now);
        Arc::new(move || now.load(Ordering::SeqCst))
    }
}
