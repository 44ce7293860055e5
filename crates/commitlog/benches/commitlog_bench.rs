//! Benchmarks for the commit log write path.
//!
//! Run with: cargo bench --package alopex-commitlog
//!
//! ## Benchmark Categories
//!
//! - **Fire-and-forget writes**: queue offer + background write cost
//! - **Annotated writes**: payload encoding with annotations attached

use alopex_commitlog::{
    CommitLog, CommitLogConfig, CommitLogError, Datapoint, FailureHandler, Series, Strategy,
    TimeUnit,
};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn panicking_handler() -> FailureHandler {
    Arc::new(|err: &CommitLogError| panic!("unexpected commit log failure: {err}"))
}

/// Writes one datapoint, yielding and retrying under backpressure.
fn write_retrying(log: &CommitLog, series: &Series, datapoint: Datapoint, annotation: &[u8]) {
    loop {
        match log.write(
            series.clone(),
            datapoint,
            TimeUnit::Nanoseconds,
            annotation.to_vec(),
        ) {
            Err(CommitLogError::QueueFull) => std::thread::yield_now(),
            result => {
                result.unwrap();
                return;
            }
        }
    }
}

fn bench_log(dir: &TempDir) -> CommitLog {
    let config = CommitLogConfig::default()
        .with_strategy(Strategy::WriteBehind)
        .with_backlog_queue_size(65_536)
        .with_flush_interval(Duration::from_millis(100))
        .with_failure_handler(panicking_handler());
    let log = CommitLog::new(dir.path(), config).unwrap();
    log.open().unwrap();
    log
}

fn generate_series(count: usize) -> Vec<Series> {
    (0..count)
        .map(|i| {
            Series::new(
                i as u64,
                "cpu.usage",
                vec![("host".to_string(), format!("server{}", i % 10))],
            )
        })
        .collect()
}

fn bench_write_behind(c: &mut Criterion) {
    let mut group = c.benchmark_group("commitlog_write_behind");
    group.throughput(Throughput::Elements(1_000));

    group.bench_function("write_behind_1k", |b| {
        let temp_dir = TempDir::new().unwrap();
        let log = bench_log(&temp_dir);
        let series = generate_series(1_000);

        b.iter(|| {
            for (i, series) in series.iter().enumerate() {
                write_retrying(&log, series, Datapoint::new(i as i64 * 1_000, 0.5), &[]);
            }
        });

        log.close().unwrap();
    });

    group.finish();
}

fn bench_write_behind_annotated(c: &mut Criterion) {
    let mut group = c.benchmark_group("commitlog_write_behind_annotated");
    group.throughput(Throughput::Elements(1_000));

    group.bench_function("write_behind_annotated_1k", |b| {
        let temp_dir = TempDir::new().unwrap();
        let log = bench_log(&temp_dir);
        let series = generate_series(1_000);
        let annotation = vec![0xABu8; 64];

        b.iter(|| {
            for (i, series) in series.iter().enumerate() {
                write_retrying(
                    &log,
                    series,
                    Datapoint::new(i as i64 * 1_000, 0.5),
                    &annotation,
                );
            }
        });

        log.close().unwrap();
    });

    group.finish();
}

criterion_group!(benches, bench_write_behind, bench_write_behind_annotated);
criterion_main!(benches);
