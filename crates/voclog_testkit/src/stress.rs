//! Stress tests for voclog.
//!
//! Many threads appending to one WAL, with and without waiting for sync.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use voclog_core::{
    CollectionId, DatabaseId, LogfileManager, MarkerBuf, Tick, TransactionId,
};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
    /// Ticks of the successful appends, sorted.
    pub ticks: Vec<Tick>,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(mut ticks: Vec<Tick>, failed: usize, duration: Duration) -> Self {
        ticks.sort_unstable();
        let successful = ticks.len();
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
            ticks,
        }
    }

    /// Whether every successful append got its own tick.
    pub fn ticks_are_unique(&self) -> bool {
        self.ticks.windows(2).all(|pair| pair[0] < pair[1])
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Appends per thread.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Document payload size in bytes.
    pub document_size: usize,
    /// Every n-th append waits for sync (0 = never).
    pub sync_every: usize,
    /// Number of distinct collections the threads write to.
    pub collections: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 1_000,
            threads: 4,
            document_size: 256,
            sync_every: 10,
            collections: 4,
        }
    }
}

/// Appends from `config.threads` threads at once.
pub fn stress_concurrent_appends(
    wal: &Arc<LogfileManager>,
    config: &StressConfig,
) -> StressTestResult {
    let start = Instant::now();
    let handles: Vec<_> = (0..config.threads)
        .map(|thread_id| {
            let wal = Arc::clone(wal);
            let config = config.clone();
            thread::spawn(move || {
                let mut ticks = Vec::with_capacity(config.operations);
                let mut failed = 0usize;
                let data = vec![thread_id as u8; config.document_size];
                for i in 0..config.operations {
                    let collection = CollectionId::new(1 + (i as u64 % config.collections.max(1)));
                    let wait = config.sync_every > 0 && i % config.sync_every == 0;
                    let mut marker =
                        MarkerBuf::document(TransactionId::new(thread_id as u64), &data);
                    match wal.append(DatabaseId::new(1), collection, &mut marker, wait) {
                        Ok(tick) => ticks.push(tick),
                        Err(_) => failed += 1,
                    }
                }
                (ticks, failed)
            })
        })
        .collect();

    let mut ticks = Vec::new();
    let mut failed = 0usize;
    for handle in handles {
        match handle.join() {
            Ok((t, f)) => {
                ticks.extend(t);
                failed += f;
            }
            Err(_) => failed += config.operations,
        }
    }

    StressTestResult::new(ticks, failed, start.elapsed())
}

/// Appends from one thread while another keeps reading the WAL back.
pub fn stress_append_while_reading(
    wal: &Arc<LogfileManager>,
    config: &StressConfig,
) -> StressTestResult {
    let reader_wal = Arc::clone(wal);
    let done = Arc::new(AtomicBool::new(false));
    let reader_done = Arc::clone(&done);
    let reader = thread::spawn(move || {
        let mut passes = 0usize;
        let mut last_seen = 0;
        while !reader_done.load(Ordering::Acquire) {
            let mut max = 0;
            if reader_wal
                .read_range(0, Tick::MAX, |_, marker| {
                    max = max.max(marker.tick());
                    true
                })
                .is_err()
            {
                return Err("read failed".to_string());
            }
            if max < last_seen {
                return Err(format!("reader went backwards: {max} < {last_seen}"));
            }
            last_seen = max;
            passes += 1;
        }
        Ok(passes)
    });

    let single = StressConfig {
        threads: 1,
        ..config.clone()
    };
    let mut result = stress_concurrent_appends(wal, &single);
    done.store(true, Ordering::Release);
    match reader.join() {
        Ok(Ok(_)) => {}
        _ => {
            result.failed_ops += 1;
            result.total_ops += 1;
        }
    }
    result
}
