//! Block writer contract and the file-backed implementation.
//!
//! A block writer is the commit log's storage collaborator: it owns one
//! on-disk file at a time, covering a fixed time window, and reports every
//! flush boundary back to the engine through a callback.
//!
//! # File Format
//!
//! Each block file starts with a fixed header followed by CRC-framed
//! records:
//!
//! ```text
//! ┌───────┬─────────┬─────────────┬───────────────┐
//! │ Magic │ Version │ Block Start │ Block Size    │
//! │ ACLG  │ (2 B)   │ (8 B, ns)   │ (8 B, ns)     │
//! └───────┴─────────┴─────────────┴───────────────┘
//! ┌─────────────┬───────┬─────────────────────────┐
//! │ Payload Len │ CRC32 │ Payload                 │
//! │ (4 B)       │ (4 B) │ (series, point, unit,   │
//! │             │       │  annotation)            │
//! └─────────────┴───────┴─────────────────────────┘
//! ```
//!
//! All integers are little-endian. The payload encodes the series id,
//! metric name, labels, timestamp, value, time unit, and annotation with
//! length-prefixed fields.

use crate::config::FlushMode;
use crate::error::Result;
use crate::types::{Datapoint, Series, TimeUnit, Timestamp};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Block file magic bytes.
const BLOCK_MAGIC: [u8; 4] = [b'A', b'C', b'L', b'G'];

/// Block file format version.
const BLOCK_VERSION: u16 = 1;

/// Block file prefix.
const BLOCK_PREFIX: &str = "commitlog";

/// Block file extension.
const BLOCK_EXTENSION: &str = "clog";

/// Block file header size in bytes.
pub const BLOCK_HEADER_SIZE: usize = 22; // 4 + 2 + 8 + 8

/// Callback invoked synchronously after every flush boundary.
///
/// Flush boundaries are an explicit `flush`, a `sync`, and the flush
/// performed inside `close`. The callback receives the outcome of pushing
/// buffered records to the next storage layer.
pub type FlushCallback = Arc<dyn Fn(Result<()>) + Send + Sync>;

/// Factory producing block writers bound to a flush callback.
pub type BlockWriterFactory = Arc<dyn Fn(FlushCallback) -> Box<dyn BlockWriter> + Send + Sync>;

/// Handle to an on-disk block file.
#[derive(Debug, Clone, PartialEq)]
pub struct LogFile {
    /// Path of the block file.
    pub path: PathBuf,
    /// Inclusive start of the time window covered by the file.
    pub start: Timestamp,
    /// Duration of the time window covered by the file.
    pub block_size: Duration,
    /// Index distinguishing files opened for the same window.
    pub index: u64,
}

/// Destination for serialized commit log records.
///
/// A block writer owns at most one file at a time, covering the half-open
/// window `[block_start, block_start + block_size)`. Instances are
/// reusable: after a successful `close`, `open` may be called again for the
/// next window. Implementations must invoke their [`FlushCallback`]
/// synchronously on every flush boundary.
pub trait BlockWriter: Send {
    /// Opens a new block file for the given window and returns its handle.
    fn open(&mut self, block_start: Timestamp, block_size: Duration) -> Result<LogFile>;

    /// Appends one record to the current block file.
    fn write(
        &mut self,
        series: &Series,
        datapoint: Datapoint,
        unit: TimeUnit,
        annotation: &[u8],
    ) -> Result<()>;

    /// Flushes buffered records to the next storage layer.
    ///
    /// This is a buffer-level flush; durability depends on the
    /// implementation's flush mode.
    fn flush(&mut self) -> Result<()>;

    /// Flushes buffered records and durably syncs them to disk.
    fn sync(&mut self) -> Result<()>;

    /// Flushes, syncs, and closes the current block file.
    fn close(&mut self) -> Result<()>;
}

/// Block writer appending CRC-framed records to files on local disk.
pub struct FileBlockWriter {
    /// Directory containing block files.
    dir: PathBuf,
    /// Durability of each flush boundary.
    flush_mode: FlushMode,
    /// Callback fired after every flush boundary.
    on_flush: FlushCallback,
    /// Buffered handle to the current block file.
    out: Option<BufWriter<File>>,
    /// Handle describing the current block file.
    current: Option<LogFile>,
    /// Index assigned to the next opened file.
    next_index: u64,
}

impl FileBlockWriter {
    /// Creates a writer that places block files under `dir`.
    ///
    /// The directory is created on the first `open` if it does not exist.
    pub fn new(dir: impl AsRef<Path>, flush_mode: FlushMode, on_flush: FlushCallback) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            flush_mode,
            on_flush,
            out: None,
            current: None,
            next_index: 0,
        }
    }

    /// Returns a factory producing writers for the given directory.
    pub fn factory(dir: impl AsRef<Path>, flush_mode: FlushMode) -> BlockWriterFactory {
        let dir = dir.as_ref().to_path_buf();
        Arc::new(move |on_flush| {
            Box::new(FileBlockWriter::new(&dir, flush_mode, on_flush)) as Box<dyn BlockWriter>
        })
    }

    /// Generates the path for a block file.
    fn block_path(&self, block_start: Timestamp, index: u64) -> PathBuf {
        self.dir.join(format!(
            "{}_{:016x}_{:04x}.{}",
            BLOCK_PREFIX, block_start as u64, index, BLOCK_EXTENSION
        ))
    }

    fn open_output(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.out
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no open block file"))
    }

    /// Pushes buffered records toward disk per the configured flush mode.
    fn flush_buffer(&mut self) -> Result<()> {
        let flush_mode = self.flush_mode;
        let out = self.open_output()?;
        out.flush()?;
        if flush_mode == FlushMode::Sync {
            out.get_ref().sync_data()?;
        }
        Ok(())
    }
}

impl BlockWriter for FileBlockWriter {
    fn open(&mut self, block_start: Timestamp, block_size: Duration) -> Result<LogFile> {
        fs::create_dir_all(&self.dir)?;

        // Bump the index on collision so a reopened window never clobbers an
        // existing block file.
        let (file, handle) = loop {
            let index = self.next_index;
            self.next_index += 1;

            let path = self.block_path(block_start, index);
            match OpenOptions::new().create_new(true).write(true).open(&path) {
                Ok(file) => {
                    break (
                        file,
                        LogFile {
                            path,
                            start: block_start,
                            block_size,
                            index,
                        },
                    )
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            }
        };

        let mut out = BufWriter::new(file);
        out.write_all(&BLOCK_MAGIC)?;
        out.write_all(&BLOCK_VERSION.to_le_bytes())?;
        out.write_all(&block_start.to_le_bytes())?;
        out.write_all(&(block_size.as_nanos() as u64).to_le_bytes())?;
        out.flush()?;

        debug!(path = %handle.path.display(), block_start, "opened commit log block");

        self.out = Some(out);
        self.current = Some(handle.clone());
        Ok(handle)
    }

    fn write(
        &mut self,
        series: &Series,
        datapoint: Datapoint,
        unit: TimeUnit,
        annotation: &[u8],
    ) -> Result<()> {
        let mut payload = Vec::with_capacity(64 + series.metric.len() + annotation.len());
        payload.extend_from_slice(&series.id.to_le_bytes());
        payload.extend_from_slice(&(series.metric.len() as u16).to_le_bytes());
        payload.extend_from_slice(series.metric.as_bytes());
        payload.extend_from_slice(&(series.labels.len() as u16).to_le_bytes());
        for (key, value) in &series.labels {
            payload.extend_from_slice(&(key.len() as u16).to_le_bytes());
            payload.extend_from_slice(key.as_bytes());
            payload.extend_from_slice(&(value.len() as u16).to_le_bytes());
            payload.extend_from_slice(value.as_bytes());
        }
        payload.extend_from_slice(&datapoint.timestamp.to_le_bytes());
        payload.extend_from_slice(&datapoint.value.to_le_bytes());
        payload.push(unit as u8);
        payload.extend_from_slice(&(annotation.len() as u32).to_le_bytes());
        payload.extend_from_slice(annotation);

        let crc = crc32fast::hash(&payload);

        let out = self.open_output()?;
        out.write_all(&(payload.len() as u32).to_le_bytes())?;
        out.write_all(&crc.to_le_bytes())?;
        out.write_all(&payload)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let result = self.flush_buffer();
        (self.on_flush)(result.clone());
        result
    }

    fn sync(&mut self) -> Result<()> {
        let result: Result<()> = (|| {
            let out = self.open_output()?;
            out.flush()?;
            out.get_ref().sync_all()?;
            Ok(())
        })();
        (self.on_flush)(result.clone());
        result
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut out) = self.out.take() else {
            return Ok(());
        };
        let closed = self.current.take();

        let result: Result<()> = (|| {
            out.flush()?;
            out.get_ref().sync_all()?;
            Ok(())
        })();
        (self.on_flush)(result.clone());

        if let Some(file) = closed {
            debug!(path = %file.path.display(), "closed commit log block");
        }
        result
    }
}
