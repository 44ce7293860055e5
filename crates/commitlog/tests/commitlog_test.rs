//! Integration tests for the commit log over the file-backed block writer.

use alopex_commitlog::writer::BLOCK_HEADER_SIZE;
use alopex_commitlog::{
    CommitLog, CommitLogConfig, CommitLogError, Datapoint, FailureHandler, FlushMode, ManualClock,
    Series, Strategy, TimeUnit,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn recording_handler() -> (FailureHandler, Arc<Mutex<Vec<String>>>) {
    let failures = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&failures);
    let handler: FailureHandler = Arc::new(move |err: &CommitLogError| {
        recorded.lock().unwrap().push(err.to_string());
    });
    (handler, failures)
}

fn block_files(dir: &TempDir) -> Vec<PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().map(|ext| ext == "clog").unwrap_or(false))
        .collect();
    files.sort();
    files
}

fn sample_series(id: u64) -> Series {
    Series::new(
        id,
        "cpu.usage",
        vec![("host".to_string(), "server1".to_string())],
    )
}

#[test]
fn test_rotation_creates_one_file_per_block() {
    let temp_dir = TempDir::new().unwrap();
    let clock = ManualClock::new(500);
    let (handler, failures) = recording_handler();

    let config = CommitLogConfig::default()
        .with_strategy(Strategy::WriteBehind)
        .with_block_size(Duration::from_nanos(1_000))
        .with_flush_interval(Duration::ZERO)
        .with_now_fn(clock.now_fn())
        .with_failure_handler(handler);
    let log = CommitLog::new(temp_dir.path(), config).unwrap();
    log.open().unwrap();

    log.write(
        sample_series(1),
        Datapoint::new(500, 1.0),
        TimeUnit::Nanoseconds,
        vec![],
    )
    .unwrap();

    clock.set(1_500);
    log.write(
        sample_series(2),
        Datapoint::new(1_500, 2.0),
        TimeUnit::Nanoseconds,
        b"annotation".to_vec(),
    )
    .unwrap();

    log.close().unwrap();

    let files = block_files(&temp_dir);
    assert_eq!(files.len(), 2, "one block file per expired window");
    for file in &files {
        let len = std::fs::metadata(file).unwrap().len();
        assert!(
            len as usize > BLOCK_HEADER_SIZE,
            "{} should hold at least one record",
            file.display()
        );
    }
    assert!(failures.lock().unwrap().is_empty());
    assert_eq!(log.stats().success, 2);
}

#[test]
fn test_write_wait_acknowledges_after_flush() {
    let temp_dir = TempDir::new().unwrap();
    let (handler, failures) = recording_handler();

    let config = CommitLogConfig::default()
        .with_strategy(Strategy::WriteWait)
        .with_flush_interval(Duration::from_millis(5))
        .with_failure_handler(handler);
    let log = CommitLog::new(temp_dir.path(), config).unwrap();
    log.open().unwrap();

    let now_ns = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as i64;
    log.write(
        sample_series(1),
        Datapoint::new(now_ns, 0.75),
        TimeUnit::Nanoseconds,
        vec![],
    )
    .unwrap();

    let stats = log.stats();
    assert_eq!(stats.success, 1);
    assert!(stats.flush_done >= 1);

    log.close().unwrap();
    assert!(failures.lock().unwrap().is_empty());
}

#[test]
fn test_sync_flush_mode_acknowledges_durable_writes() {
    let temp_dir = TempDir::new().unwrap();
    let (handler, failures) = recording_handler();

    let config = CommitLogConfig::default()
        .with_strategy(Strategy::WriteWait)
        .with_flush_interval(Duration::from_millis(5))
        .with_flush_mode(FlushMode::Sync)
        .with_failure_handler(handler);
    let log = CommitLog::new(temp_dir.path(), config).unwrap();
    log.open().unwrap();

    log.write(
        sample_series(1),
        Datapoint::new(1_000, 42.0),
        TimeUnit::Nanoseconds,
        vec![],
    )
    .unwrap();

    log.close().unwrap();
    assert!(failures.lock().unwrap().is_empty());
}

#[test]
fn test_active_logs_reports_block_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let clock = ManualClock::new(500);
    let (handler, _failures) = recording_handler();

    let config = CommitLogConfig::default()
        .with_strategy(Strategy::WriteBehind)
        .with_block_size(Duration::from_nanos(1_000))
        .with_flush_interval(Duration::ZERO)
        .with_now_fn(clock.now_fn())
        .with_failure_handler(handler);
    let log = CommitLog::new(temp_dir.path(), config).unwrap();
    log.open().unwrap();

    let active = log.active_logs().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].start, 0);
    assert_eq!(active[0].block_size, Duration::from_nanos(1_000));
    assert!(active[0].path.exists());

    log.close().unwrap();
    assert!(matches!(log.active_logs(), Err(CommitLogError::Closed)));
}

#[test]
fn test_closed_log_rejects_writes() {
    let temp_dir = TempDir::new().unwrap();
    let (handler, _failures) = recording_handler();

    let config = CommitLogConfig::default()
        .with_strategy(Strategy::WriteBehind)
        .with_flush_interval(Duration::ZERO)
        .with_failure_handler(handler);
    let log = CommitLog::new(temp_dir.path(), config).unwrap();
    log.open().unwrap();
    log.close().unwrap();

    let result = log.write(
        sample_series(1),
        Datapoint::new(1_000, 1.0),
        TimeUnit::Nanoseconds,
        vec![],
    );
    assert!(matches!(result, Err(CommitLogError::Closed)));
}

#[test]
fn test_block_file_grows_with_writes() {
    let temp_dir = TempDir::new().unwrap();
    let clock = ManualClock::new(500);
    let (handler, failures) = recording_handler();

    let config = CommitLogConfig::default()
        .with_strategy(Strategy::WriteBehind)
        .with_block_size(Duration::from_nanos(1_000))
        .with_flush_interval(Duration::ZERO)
        .with_now_fn(clock.now_fn())
        .with_failure_handler(handler);
    let log = CommitLog::new(temp_dir.path(), config).unwrap();
    log.open().unwrap();

    for i in 0..100u64 {
        log.write(
            sample_series(i),
            Datapoint::new(500 + i as i64, i as f64),
            TimeUnit::Nanoseconds,
            vec![],
        )
        .unwrap();
    }
    log.close().unwrap();

    let files = block_files(&temp_dir);
    assert_eq!(files.len(), 1, "all writes land in one unexpired block");

    // Every record carries at least its frame (8 bytes) and a fixed payload
    // core; 100 records comfortably exceed a few kilobytes.
    let len = std::fs::metadata(&files[0]).unwrap().len();
    assert!(len as usize > BLOCK_HEADER_SIZE + 100 * 40);
    assert!(failures.lock().unwrap().is_empty());
    assert_eq!(log.stats().success, 100);
}
