//! Configuration for commit log behavior.

use crate::clock::{system_now_fn, NowFn};
use crate::error::{CommitLogError, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default capacity of the backlog queue.
pub const DEFAULT_BACKLOG_QUEUE_SIZE: usize = 2048;

/// Default duration covered by a single block file (1 hour).
pub const DEFAULT_BLOCK_SIZE: Duration = Duration::from_secs(3600);

/// Default interval between background flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Write acknowledgement strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// `write` returns once the datapoint's covering flush boundary has
    /// completed, carrying the flush result (default).
    #[default]
    WriteWait,
    /// `write` returns as soon as the datapoint has been queued.
    WriteBehind,
}

/// How far a flush boundary pushes buffered data toward disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Flush the writer's buffer to the operating system (default). Data may
    /// still sit in the page cache until the next sync or close.
    #[default]
    Buffer,
    /// Fsync on every flush boundary. Durable, at the cost of one fsync per
    /// flush interval.
    Sync,
}

/// Handler invoked when the write path hits an unrecoverable disk error.
///
/// Open, write, and flush failures inside the writer loop are not returned
/// to callers; they are counted, logged, and dispatched here. The default
/// handler logs the error and aborts the process: a commit log that silently
/// drops records is worse than one that halts. Hosts that prefer to degrade
/// and continue install their own handler.
pub type FailureHandler = Arc<dyn Fn(&CommitLogError) + Send + Sync>;

/// Configuration for commit log behavior.
#[derive(Clone)]
pub struct CommitLogConfig {
    /// Write acknowledgement strategy.
    pub strategy: Strategy,
    /// Capacity of the bounded backlog queue. A full queue rejects writes
    /// with [`CommitLogError::QueueFull`].
    pub backlog_queue_size: usize,
    /// Duration of the time window covered by each block file. Datapoints
    /// are written to the file whose window contains the current time; the
    /// file rolls over once the window expires.
    pub block_size: Duration,
    /// Interval between background flushes. Zero disables the background
    /// flusher entirely.
    pub flush_interval: Duration,
    /// Durability of each flush boundary.
    pub flush_mode: FlushMode,
    /// Time source used for block rotation and flush pacing.
    pub now_fn: NowFn,
    /// Handler for unrecoverable write-path errors. `None` selects the
    /// default log-and-abort handler.
    pub failure_handler: Option<FailureHandler>,
}

impl Default for CommitLogConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            backlog_queue_size: DEFAULT_BACKLOG_QUEUE_SIZE,
            block_size: DEFAULT_BLOCK_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            flush_mode: FlushMode::default(),
            now_fn: system_now_fn(),
            failure_handler: None,
        }
    }
}

impl fmt::Debug for CommitLogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitLogConfig")
            .field("strategy", &self.strategy)
            .field("backlog_queue_size", &self.backlog_queue_size)
            .field("block_size", &self.block_size)
            .field("flush_interval", &self.flush_interval)
            .field("flush_mode", &self.flush_mode)
            .finish_non_exhaustive()
    }
}

impl CommitLogConfig {
    /// Creates a new configuration with custom write strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Creates a new configuration with custom backlog queue capacity.
    pub fn with_backlog_queue_size(mut self, size: usize) -> Self {
        self.backlog_queue_size = size;
        self
    }

    /// Creates a new configuration with custom block duration.
    pub fn with_block_size(mut self, block_size: Duration) -> Self {
        self.block_size = block_size;
        self
    }

    /// Creates a new configuration with custom flush interval.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Creates a new configuration with custom flush durability mode.
    pub fn with_flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = mode;
        self
    }

    /// Creates a new configuration with a custom time source.
    pub fn with_now_fn(mut self, now_fn: NowFn) -> Self {
        self.now_fn = now_fn;
        self
    }

    /// Creates a new configuration with a custom failure handler.
    pub fn with_failure_handler(mut self, handler: FailureHandler) -> Self {
        self.failure_handler = Some(handler);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.backlog_queue_size == 0 {
            return Err(CommitLogError::InvalidConfig(
                "backlog queue size must be positive".to_string(),
            ));
        }
        if self.block_size.is_zero() {
            return Err(CommitLogError::InvalidConfig(
                "block size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
