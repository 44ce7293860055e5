//! Commit log for the Alopex time series database.
//!
//! This crate provides a durable, append-only, time-block-partitioned
//! write-ahead log. Datapoints are serialized into fixed-duration block
//! files on disk; files roll over automatically when their time window
//! expires.
//!
//! # Architecture
//!
//! ```text
//! Client → write() → bounded queue → writer loop → block file
//!                                         │
//!                         flusher ◄── on_flush (flush boundaries)
//! ```
//!
//! - Writes are offered onto a bounded queue **without blocking**; a full
//!   queue surfaces as [`CommitLogError::QueueFull`], the backpressure
//!   signal.
//! - A single writer loop owns the on-disk writer, rotating block files at
//!   window boundaries.
//! - A background flusher keeps the buffer moving when write traffic
//!   stalls.
//! - Two durability strategies: [`Strategy::WriteWait`] acknowledges after
//!   the covering flush boundary; [`Strategy::WriteBehind`] returns once
//!   queued.
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_commitlog::{CommitLog, CommitLogConfig, Datapoint, Series, TimeUnit};
//!
//! let log = CommitLog::new("/var/lib/alopex/commitlog", CommitLogConfig::default())?;
//! log.open()?;
//!
//! let series = Series::new(1, "cpu.usage", vec![("host".into(), "server1".into())]);
//! log.write(series, Datapoint::new(now_ns, 0.75), TimeUnit::Nanoseconds, vec![])?;
//!
//! log.close()?;
//! ```

#![deny(missing_docs)]

pub mod clock;
pub mod config;
pub mod error;
pub mod log;
pub mod metrics;
pub mod types;
pub mod writer;

pub use clock::{system_now_fn, ManualClock, NowFn};
pub use config::{CommitLogConfig, FailureHandler, FlushMode, Strategy};
pub use error::{CommitLogError, Result};
pub use log::CommitLog;
pub use metrics::{CommitLogMetrics, CommitLogStats};
pub use types::{Datapoint, Series, SeriesId, TimeUnit, Timestamp};
pub use writer::{BlockWriter, BlockWriterFactory, FileBlockWriter, FlushCallback, LogFile};
