//! Error and Result types for commit log operations.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// A convenience `Result` type for commit log operations.
pub type Result<T> = std::result::Result<T, CommitLogError>;

/// The error type for commit log operations.
///
/// The error is cheaply cloneable (I/O errors are reference counted) so a
/// single flush failure can be delivered to every write waiting on that
/// flush boundary.
#[derive(Debug, Clone, Error)]
pub enum CommitLogError {
    /// The backlog queue is full and the write was rejected.
    ///
    /// This is the backpressure signal: the caller decides whether to retry,
    /// shed load, or fail the request upstream.
    #[error("commit log queue is full")]
    QueueFull,

    /// The commit log has been closed and accepts no further writes.
    #[error("commit log is closed")]
    Closed,

    /// The commit log was already opened; a log instance opens at most once.
    #[error("commit log is already open")]
    AlreadyOpen,

    /// The supplied configuration is unusable.
    #[error("invalid commit log configuration: {0}")]
    InvalidConfig(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for CommitLogError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}
