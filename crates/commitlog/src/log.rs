//! The commit log engine: bounded write queue, single writer loop, and
//! background flusher.
//!
//! # Architecture
//!
//! ```text
//! write() → bounded queue → writer loop → BlockWriter → block file
//!               ↑                │
//!            flusher ◄── lastFlushAt ◄── on_flush
//! ```
//!
//! Producers offer work items onto a bounded queue without blocking; a full
//! queue is the backpressure signal. A single writer loop drains the queue,
//! rotating block files when their time window expires. A background
//! flusher periodically enqueues flush requests so the on-disk buffer is
//! pushed forward even when write traffic stalls.
//!
//! # Lock discipline
//!
//! The engine keeps three separately scoped locks:
//!
//! 1. `ClosedState` gates every enqueue and is write-held only while
//!    opening or closing the log.
//! 2. `WriterState` exposes the active file handle to readers. The block
//!    writer itself is owned by the writer loop, so the loop takes this
//!    lock in write mode only when rotating or detaching the file handle.
//! 3. `FlushState` holds `last_flush_at` and nothing else. It has its own
//!    lock because `on_flush` runs re-entrantly from inside block writer
//!    calls made by the writer loop; if it shared a lock with
//!    `WriterState`, any of those calls could deadlock.
//!
//! When two locks nest, the order is always `ClosedState` before
//! `WriterState`. `FlushState` never nests with either.

use crate::clock::NowFn;
use crate::config::{CommitLogConfig, FailureHandler, Strategy};
use crate::error::{CommitLogError, Result};
use crate::metrics::{CommitLogMetrics, CommitLogStats};
use crate::types::{Datapoint, Series, TimeUnit, Timestamp};
use crate::writer::{BlockWriterFactory, FileBlockWriter, FlushCallback, LogFile};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;
use tracing::{error, warn};

/// Completion callback attached to an acknowledged write; fires with the
/// result of the flush boundary that covers the write.
type CompletionFn = Box<dyn FnOnce(Result<()>) + Send>;

/// Unit of work drained by the writer loop.
enum WorkItem {
    /// A datapoint to append to the active block file.
    Write {
        series: Series,
        datapoint: Datapoint,
        unit: TimeUnit,
        annotation: Vec<u8>,
        completion: Option<CompletionFn>,
    },
    /// A request to flush the writer's buffer.
    Flush { completion: Option<CompletionFn> },
}

impl WorkItem {
    fn take_completion(&mut self) -> Option<CompletionFn> {
        match self {
            WorkItem::Write { completion, .. } | WorkItem::Flush { completion } => {
                completion.take()
            }
        }
    }
}

/// Open/closed lifecycle state. Holding the queue sender here lets closing
/// the log and closing the queue happen under the same exclusive lock:
/// dropping the sender is what ends the writer loop's drain.
struct ClosedState {
    opened: bool,
    closed: bool,
    sender: Option<Sender<WorkItem>>,
}

/// State readable by threads other than the writer loop. The block writer
/// itself is owned by the loop; only the active file handle is shared.
struct WriterState {
    active_file: Option<LogFile>,
}

/// Timestamp of the most recent flush boundary, behind its own lock so the
/// re-entrant `on_flush` callback never contends with `WriterState`.
struct FlushState {
    last_flush_at: Timestamp,
}

/// State shared between the engine API, the writer loop, and the flusher.
struct Shared {
    closed_state: RwLock<ClosedState>,
    writer_state: RwLock<WriterState>,
    flush_state: RwLock<FlushState>,
    /// Completion callbacks waiting on the next flush boundary. Only the
    /// writer-loop thread (and `open`'s initial sync, before the loop
    /// exists) ever locks this, so the mutex is uncontended.
    pending_flush_fns: Mutex<Vec<CompletionFn>>,
    metrics: CommitLogMetrics,
    now_fn: NowFn,
    /// Installed by `open` after the initial sync succeeds, so startup disk
    /// problems are returned to the caller instead of dispatched here.
    fail_fn: Mutex<Option<FailureHandler>>,
}

impl Shared {
    fn set_last_flush_at(&self, ts: Timestamp) {
        let mut flush_state = self
            .flush_state
            .write()
            .unwrap_or_else(|err| err.into_inner());
        flush_state.last_flush_at = ts;
    }

    fn last_flush_at(&self) -> Timestamp {
        self.flush_state
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .last_flush_at
    }

    fn fail(&self, err: &CommitLogError) {
        let handler = self
            .fail_fn
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone();
        if let Some(handler) = handler {
            handler(err);
        }
    }

    /// Flush boundary callback, invoked synchronously from inside block
    /// writer calls made by the writer loop.
    fn on_flush(&self, result: Result<()>) {
        self.set_last_flush_at((self.now_fn)());

        if let Err(err) = &result {
            self.metrics.increment_errors();
            self.metrics.increment_flush_errors();
            error!(error = %err, "failed to flush commit log");
            self.fail(err);
        }

        let mut pending = self
            .pending_flush_fns
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        for completion in pending.drain(..) {
            completion(result.clone());
        }
        self.metrics.increment_flush_done();
    }
}

/// Writer owned by the writer loop, paired with the instant its block
/// window expires.
struct ActiveWriter {
    writer: Box<dyn crate::writer::BlockWriter>,
    expire_at: Timestamp,
}

/// Start of the block window containing `ts`.
fn block_start(ts: Timestamp, block_size: Duration) -> Timestamp {
    let block_ns = block_size.as_nanos() as i64;
    (ts / block_ns) * block_ns
}

/// Closes the current block writer (if any) and opens one for the window
/// containing `now`. A close failure is non-fatal: the old writer is
/// discarded and a fresh instance takes its place. An open failure leaves
/// no active writer; the next write retries.
fn rotate_writer(
    shared: &Shared,
    factory: &BlockWriterFactory,
    on_flush: &FlushCallback,
    active: &mut Option<ActiveWriter>,
    now: Timestamp,
    block_size: Duration,
) -> Result<()> {
    let mut writer = match active.take() {
        Some(mut previous) => match previous.writer.close() {
            Ok(()) => previous.writer,
            Err(err) => {
                shared.metrics.increment_close_errors();
                warn!(error = %err, "failed to close expired commit log block, replacing writer");
                (factory)(on_flush.clone())
            }
        },
        None => (factory)(on_flush.clone()),
    };

    let start = block_start(now, block_size);
    let file = writer.open(start, block_size)?;

    {
        let mut writer_state = shared
            .writer_state
            .write()
            .unwrap_or_else(|err| err.into_inner());
        writer_state.active_file = Some(file);
    }

    *active = Some(ActiveWriter {
        writer,
        expire_at: start + block_size.as_nanos() as i64,
    });
    Ok(())
}

/// Sole consumer of the work queue and sole owner of the block writer.
///
/// All writer mutation happens on this thread; other threads observe only
/// the active file handle through the writer state lock. The loop ends when
/// the queue's sender is dropped, at which point it detaches the active
/// file, closes the writer, and reports the result on the close channel.
fn writer_loop(
    shared: Arc<Shared>,
    receiver: Receiver<WorkItem>,
    factory: BlockWriterFactory,
    on_flush: FlushCallback,
    block_size: Duration,
    mut active: Option<ActiveWriter>,
    close_tx: Sender<Result<()>>,
) {
    for mut item in receiver.iter() {
        if let Some(completion) = item.take_completion() {
            shared
                .pending_flush_fns
                .lock()
                .unwrap_or_else(|err| err.into_inner())
                .push(completion);
        }

        match item {
            WorkItem::Flush { .. } => {
                // Flush errors surface through the on_flush callback, not
                // the return value.
                if let Some(current) = active.as_mut() {
                    let _ = current.writer.flush();
                }
            }
            WorkItem::Write {
                series,
                datapoint,
                unit,
                annotation,
                ..
            } => {
                let now = (shared.now_fn)();
                let expired = active
                    .as_ref()
                    .map_or(true, |current| now >= current.expire_at);
                if expired {
                    if let Err(err) =
                        rotate_writer(&shared, &factory, &on_flush, &mut active, now, block_size)
                    {
                        shared.metrics.increment_errors();
                        shared.metrics.increment_open_errors();
                        error!(error = %err, "failed to open commit log block");
                        shared.fail(&err);
                        continue;
                    }
                }

                let Some(current) = active.as_mut() else {
                    continue;
                };
                match current.writer.write(&series, datapoint, unit, &annotation) {
                    Ok(()) => shared.metrics.increment_success(),
                    Err(err) => {
                        shared.metrics.increment_errors();
                        error!(error = %err, "failed to write to commit log");
                        shared.fail(&err);
                    }
                }
            }
        }
    }

    // Queue closed and drained: detach the active file, then close the
    // writer and hand the result to the caller blocked in close().
    {
        let mut writer_state = shared
            .writer_state
            .write()
            .unwrap_or_else(|err| err.into_inner());
        writer_state.active_file = None;
    }
    let result = match active.take() {
        Some(mut current) => current.writer.close(),
        None => Ok(()),
    };
    let _ = close_tx.send(result);
}

/// Background flusher: enqueues a flush request roughly every `interval`
/// unless a flush boundary already happened recently, so the on-disk buffer
/// keeps moving even when write traffic stalls.
fn flush_loop(shared: Arc<Shared>, interval: Duration) {
    let interval_ns = interval.as_nanos() as i64;
    let mut sleep_override: Option<Duration> = None;

    loop {
        {
            let closed_state = shared
                .closed_state
                .read()
                .unwrap_or_else(|err| err.into_inner());
            if closed_state.closed {
                return;
            }
            if let Some(sender) = closed_state.sender.as_ref() {
                shared.metrics.set_queued(sender.len() as u64);
                shared
                    .metrics
                    .set_queue_capacity(sender.capacity().unwrap_or(0) as u64);
            }
        }

        thread::sleep(sleep_override.take().unwrap_or(interval));

        let since_flush = (shared.now_fn)().saturating_sub(shared.last_flush_at());
        if since_flush < interval_ns {
            // Flushed recently by someone else; sleep until the next
            // boundary would be due.
            sleep_override = Some(Duration::from_nanos((interval_ns - since_flush) as u64));
            continue;
        }

        let closed_state = shared
            .closed_state
            .read()
            .unwrap_or_else(|err| err.into_inner());
        if closed_state.closed {
            return;
        }
        if let Some(sender) = closed_state.sender.as_ref() {
            // Unlike the write path this send may block briefly; a flush
            // request must not be dropped under backpressure.
            let _ = sender.send(WorkItem::Flush { completion: None });
        }
    }
}

fn default_failure_handler() -> FailureHandler {
    Arc::new(|err| {
        error!(error = %err, "fatal commit log failure");
        std::process::abort();
    })
}

/// Durable, append-only, block-partitioned commit log.
///
/// Datapoints are serialized into fixed-duration block files on disk, with
/// bounded-queue backpressure, periodic background flushing, and two write
/// acknowledgement strategies (see [`Strategy`]).
///
/// # Example
///
/// ```rust,ignore
/// use alopex_commitlog::{CommitLog, CommitLogConfig, Datapoint, Series, TimeUnit};
///
/// let log = CommitLog::new("/path/to/commitlog", CommitLogConfig::default())?;
/// log.open()?;
///
/// let series = Series::new(1, "cpu.usage", vec![]);
/// log.write(series, Datapoint::new(now_ns, 0.75), TimeUnit::Nanoseconds, vec![])?;
///
/// log.close()?;
/// ```
pub struct CommitLog {
    shared: Arc<Shared>,
    config: CommitLogConfig,
    factory: BlockWriterFactory,
    receiver: Mutex<Option<Receiver<WorkItem>>>,
    close_rx: Mutex<Option<Receiver<Result<()>>>>,
}

impl CommitLog {
    /// Creates a commit log writing block files under `dir`.
    ///
    /// The directory is created on open if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(dir: impl AsRef<Path>, config: CommitLogConfig) -> Result<Self> {
        let factory = FileBlockWriter::factory(dir, config.flush_mode);
        Self::with_writer_factory(config, factory)
    }

    /// Creates a commit log with a custom block writer factory.
    ///
    /// This is the seam for alternative storage backends and for tests that
    /// record block writer calls.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_writer_factory(
        config: CommitLogConfig,
        factory: BlockWriterFactory,
    ) -> Result<Self> {
        config.validate()?;

        let (sender, receiver) = bounded(config.backlog_queue_size);
        let shared = Arc::new(Shared {
            closed_state: RwLock::new(ClosedState {
                opened: false,
                closed: false,
                sender: Some(sender),
            }),
            writer_state: RwLock::new(WriterState { active_file: None }),
            flush_state: RwLock::new(FlushState { last_flush_at: 0 }),
            pending_flush_fns: Mutex::new(Vec::new()),
            metrics: CommitLogMetrics::new(),
            now_fn: config.now_fn.clone(),
            fail_fn: Mutex::new(None),
        });
        shared
            .metrics
            .set_queue_capacity(config.backlog_queue_size as u64);

        Ok(Self {
            shared,
            config,
            factory,
            receiver: Mutex::new(Some(receiver)),
            close_rx: Mutex::new(None),
        })
    }

    /// Opens the commit log: opens the initial block file, syncs it to fail
    /// fast on disk problems, and starts the writer loop and (if a positive
    /// flush interval is configured) the background flusher.
    ///
    /// # Errors
    ///
    /// Returns an error if the log was already opened or closed, or if the
    /// initial open or sync fails. On failure the log is left closed and
    /// must not be reused.
    pub fn open(&self) -> Result<()> {
        let mut closed_state = self
            .shared
            .closed_state
            .write()
            .unwrap_or_else(|err| err.into_inner());
        if closed_state.closed {
            return Err(CommitLogError::Closed);
        }
        if closed_state.opened {
            return Err(CommitLogError::AlreadyOpen);
        }

        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .take()
            .ok_or(CommitLogError::AlreadyOpen)?;

        let shared = Arc::clone(&self.shared);
        let on_flush: FlushCallback = Arc::new(move |result| shared.on_flush(result));

        // Open the initial block and sync its header so disk problems
        // surface here rather than on the first write.
        let mut active = None;
        let now = (self.shared.now_fn)();
        let opened = rotate_writer(
            &self.shared,
            &self.factory,
            &on_flush,
            &mut active,
            now,
            self.config.block_size,
        )
        .and_then(|()| match active.as_mut() {
            Some(current) => current.writer.sync(),
            None => Ok(()),
        });
        if let Err(err) = opened {
            closed_state.closed = true;
            closed_state.sender = None;
            return Err(err);
        }

        *self
            .shared
            .fail_fn
            .lock()
            .unwrap_or_else(|err| err.into_inner()) = Some(
            self.config
                .failure_handler
                .clone()
                .unwrap_or_else(default_failure_handler),
        );

        let (close_tx, close_rx) = bounded(1);
        let spawned = thread::Builder::new()
            .name("commitlog-writer".to_string())
            .spawn({
                let shared = Arc::clone(&self.shared);
                let factory = self.factory.clone();
                let on_flush = on_flush.clone();
                let block_size = self.config.block_size;
                move || writer_loop(shared, receiver, factory, on_flush, block_size, active, close_tx)
            });
        if let Err(err) = spawned {
            closed_state.closed = true;
            closed_state.sender = None;
            return Err(err.into());
        }
        *self.close_rx.lock().unwrap_or_else(|err| err.into_inner()) = Some(close_rx);

        if !self.config.flush_interval.is_zero() {
            let spawned = thread::Builder::new()
                .name("commitlog-flusher".to_string())
                .spawn({
                    let shared = Arc::clone(&self.shared);
                    let interval = self.config.flush_interval;
                    move || flush_loop(shared, interval)
                });
            if let Err(err) = spawned {
                closed_state.closed = true;
                closed_state.sender = None;
                return Err(err.into());
            }
        }

        closed_state.opened = true;
        Ok(())
    }

    /// Appends a datapoint to the commit log.
    ///
    /// With [`Strategy::WriteWait`] the call returns once the flush boundary
    /// covering the datapoint has completed, carrying the flush result. With
    /// [`Strategy::WriteBehind`] it returns as soon as the datapoint has
    /// been queued.
    ///
    /// # Errors
    ///
    /// Returns [`CommitLogError::QueueFull`] when the backlog queue is at
    /// capacity (the backpressure signal) and [`CommitLogError::Closed`]
    /// after the log has been closed. In `WriteWait` mode a flush failure is
    /// also returned here.
    pub fn write(
        &self,
        series: Series,
        datapoint: Datapoint,
        unit: TimeUnit,
        annotation: Vec<u8>,
    ) -> Result<()> {
        match self.config.strategy {
            Strategy::WriteWait => self.write_wait(series, datapoint, unit, annotation),
            Strategy::WriteBehind => self.write_behind(series, datapoint, unit, annotation),
        }
    }

    fn write_wait(
        &self,
        series: Series,
        datapoint: Datapoint,
        unit: TimeUnit,
        annotation: Vec<u8>,
    ) -> Result<()> {
        let (ack_tx, ack_rx) = bounded(1);
        let completion: CompletionFn = Box::new(move |result| {
            let _ = ack_tx.send(result);
        });

        self.enqueue(WorkItem::Write {
            series,
            datapoint,
            unit,
            annotation,
            completion: Some(completion),
        })?;

        // The ack fires from within the flush boundary that covers this
        // write. There is no cancellation: a caller that needs a timeout
        // wraps this call externally.
        ack_rx.recv().unwrap_or(Err(CommitLogError::Closed))
    }

    fn write_behind(
        &self,
        series: Series,
        datapoint: Datapoint,
        unit: TimeUnit,
        annotation: Vec<u8>,
    ) -> Result<()> {
        self.enqueue(WorkItem::Write {
            series,
            datapoint,
            unit,
            annotation,
            completion: None,
        })
    }

    /// Offers a work item onto the queue without blocking. A full queue is
    /// backpressure, not a wait.
    fn enqueue(&self, item: WorkItem) -> Result<()> {
        let closed_state = self
            .shared
            .closed_state
            .read()
            .unwrap_or_else(|err| err.into_inner());
        if closed_state.closed {
            return Err(CommitLogError::Closed);
        }
        let Some(sender) = closed_state.sender.as_ref() else {
            return Err(CommitLogError::Closed);
        };
        match sender.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(CommitLogError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(CommitLogError::Closed),
        }
    }

    /// Returns a snapshot of the block files currently being written.
    ///
    /// The snapshot contains at most one file: the active block. It is
    /// empty if no block has been opened yet.
    ///
    /// # Errors
    ///
    /// Returns [`CommitLogError::Closed`] after the log has been closed.
    pub fn active_logs(&self) -> Result<Vec<LogFile>> {
        let closed_state = self
            .shared
            .closed_state
            .read()
            .unwrap_or_else(|err| err.into_inner());
        if closed_state.closed {
            return Err(CommitLogError::Closed);
        }

        let writer_state = self
            .shared
            .writer_state
            .read()
            .unwrap_or_else(|err| err.into_inner());
        Ok(writer_state.active_file.iter().cloned().collect())
    }

    /// Returns a snapshot of the write-path counters and gauges.
    pub fn stats(&self) -> CommitLogStats {
        self.shared.metrics.snapshot()
    }

    /// Closes the commit log, draining queued writes first.
    ///
    /// Idempotent: closing an already-closed (or never-opened) log returns
    /// success. Pending acknowledged writes complete, with the final flush
    /// result, before this returns.
    ///
    /// # Errors
    ///
    /// Returns the error from closing the final block file, if any.
    pub fn close(&self) -> Result<()> {
        let close_rx;
        {
            let mut closed_state = self
                .shared
                .closed_state
                .write()
                .unwrap_or_else(|err| err.into_inner());
            if closed_state.closed {
                return Ok(());
            }
            closed_state.closed = true;
            // Dropping the sender closes the queue: the writer loop drains
            // what is already buffered and then shuts down.
            closed_state.sender = None;
            close_rx = self
                .close_rx
                .lock()
                .unwrap_or_else(|err| err.into_inner())
                .take();
        }

        match close_rx {
            Some(rx) => rx.recv().unwrap_or(Ok(())),
            None => Ok(()),
        }
    }
}

impl Drop for CommitLog {
    fn drop(&mut self) {
        // Best effort; an explicit close has already made this a no-op.
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to close commit log on drop");
        }
    }
}
