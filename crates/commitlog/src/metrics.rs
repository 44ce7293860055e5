//! Write-path counters and gauges for the commit log.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters and gauges tracking commit log write activity.
///
/// All fields are atomics updated with relaxed ordering; the numbers are
/// operational signals, not synchronization points. Hosts that export
/// metrics poll [`CommitLogMetrics::snapshot`] and republish the values
/// under their own `commitlog.*` scope.
#[derive(Debug, Default)]
pub struct CommitLogMetrics {
    /// Number of work items currently sitting in the backlog queue.
    queued: AtomicU64,
    /// Capacity of the backlog queue.
    queue_capacity: AtomicU64,
    /// Datapoints written to the active block file.
    success: AtomicU64,
    /// Total write-path errors (open, write, and flush failures).
    errors: AtomicU64,
    /// Failures opening a block file during rotation.
    open_errors: AtomicU64,
    /// Failures closing the previous block file during rotation.
    close_errors: AtomicU64,
    /// Failures flushing the writer's buffer.
    flush_errors: AtomicU64,
    /// Completed flush boundaries, successful or not.
    flush_done: AtomicU64,
}

impl CommitLogMetrics {
    /// Creates a new metrics set with all values at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_queued(&self, n: u64) {
        self.queued.store(n, Ordering::Relaxed);
    }

    pub(crate) fn set_queue_capacity(&self, n: u64) {
        self.queue_capacity.store(n, Ordering::Relaxed);
    }

    pub(crate) fn increment_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_open_errors(&self) {
        self.open_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_close_errors(&self) {
        self.close_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_flush_errors(&self) {
        self.flush_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn increment_flush_done(&self) {
        self.flush_done.fetch_add(1, Ordering::Relaxed);
    }

    /// Gets the number of queued work items.
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    /// Gets the backlog queue capacity.
    pub fn queue_capacity(&self) -> u64 {
        self.queue_capacity.load(Ordering::Relaxed)
    }

    /// Gets the number of successfully written datapoints.
    pub fn success(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    /// Gets the total write-path error count.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Gets the block open failure count.
    pub fn open_errors(&self) -> u64 {
        self.open_errors.load(Ordering::Relaxed)
    }

    /// Gets the block close failure count.
    pub fn close_errors(&self) -> u64 {
        self.close_errors.load(Ordering::Relaxed)
    }

    /// Gets the flush failure count.
    pub fn flush_errors(&self) -> u64 {
        self.flush_errors.load(Ordering::Relaxed)
    }

    /// Gets the number of completed flush boundaries.
    pub fn flush_done(&self) -> u64 {
        self.flush_done.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time snapshot of all counters and gauges.
    pub fn snapshot(&self) -> CommitLogStats {
        CommitLogStats {
            queued: self.queued(),
            queue_capacity: self.queue_capacity(),
            success: self.success(),
            errors: self.errors(),
            open_errors: self.open_errors(),
            close_errors: self.close_errors(),
            flush_errors: self.flush_errors(),
            flush_done: self.flush_done(),
        }
    }
}

/// Point-in-time snapshot of [`CommitLogMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitLogStats {
    /// Number of work items currently sitting in the backlog queue.
    pub queued: u64,
    /// Capacity of the backlog queue.
    pub queue_capacity: u64,
    /// Datapoints written to the active block file.
    pub success: u64,
    /// Total write-path errors.
    pub errors: u64,
    /// Failures opening a block file during rotation.
    pub open_errors: u64,
    /// Failures closing the previous block file during rotation.
    pub close_errors: u64,
    /// Failures flushing the writer's buffer.
    pub flush_errors: u64,
    /// Completed flush boundaries, successful or not.
    pub flush_done: u64,
}
