//! Throughput, memory and per-range timing. Observational only.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

/// Timing of one rendered range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeTiming {
    pub start: usize,
    pub len: usize,
    pub threads: usize,
    pub elapsed_ms: f64,
}

/// Point-in-time copy of [`JobMetrics`], also the on-disk/IPC form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub pages_total: usize,
    pub pages_written: usize,
    pub pages_extracted: usize,
    pub pages_failed: usize,
    pub bytes_written: u64,
    pub elapsed_secs: f64,
    pub pages_per_second: f64,
    pub peak_memory_bytes: u64,
    pub ranges: Vec<RangeTiming>,
}

impl MetricsSnapshot {
    pub fn pages_completed(&self) -> usize {
        self.pages_written + self.pages_extracted
    }

    /// Fold a worker's snapshot into this one.
    ///
    /// Counts add up; elapsed time is taken from the wall clock of the
    /// caller, so it is left alone here.
    pub fn absorb(&mut self, other: &MetricsSnapshot) {
        self.pages_total += other.pages_total;
        self.pages_written += other.pages_written;
        self.pages_extracted += other.pages_extracted;
        self.pages_failed += other.pages_failed;
        self.bytes_written += other.bytes_written;
        self.peak_memory_bytes = self.peak_memory_bytes.max(other.peak_memory_bytes);
        self.ranges.extend(other.ranges.iter().cloned());
        self.ranges.sort_by_key(|r| r.start);
    }

    /// Recompute throughput for a wall-clock duration.
    pub fn finish(&mut self, elapsed: Duration) {
        self.elapsed_secs = elapsed.as_secs_f64();
        self.pages_per_second = if self.elapsed_secs > 0.0 {
            self.pages_completed() as f64 / self.elapsed_secs
        } else {
            0.0
        };
    }
}

/// Logs progress roughly every 10% of the job.
#[derive(Debug)]
pub struct ProgressReporter {
    total: usize,
    step: usize,
    next: AtomicUsize,
}

impl ProgressReporter {
    pub fn new(total: usize) -> Self {
        let step = (total / 10).max(1);
        Self {
            total,
            step,
            next: AtomicUsize::new(step),
        }
    }

    /// Report that `done` pages are finished. Logs at most once per step.
    pub fn tick(&self, done: usize) -> bool {
        let mut next = self.next.load(Ordering::Acquire);
        while done >= next && next <= self.total {
            match self
                .next
                .compare_exchange(next, next + self.step, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    let percent = done * 100 / self.total.max(1);
                    info!("Progress: {done}/{} pages ({percent}%)", self.total);
                    return true;
                }
                Err(actual) => next = actual,
            }
        }
        false
    }
}

/// Counters for one job, shared by every thread of a worker.
#[derive(Debug)]
pub struct JobMetrics {
    started: Instant,
    pages_total: usize,
    pages_written: AtomicUsize,
    pages_extracted: AtomicUsize,
    pages_failed: AtomicUsize,
    bytes_written: AtomicU64,
    ranges: Mutex<Vec<RangeTiming>>,
    progress: ProgressReporter,
}

impl JobMetrics {
    pub fn new(pages_total: usize) -> Self {
        Self {
            started: Instant::now(),
            pages_total,
            pages_written: AtomicUsize::new(0),
            pages_extracted: AtomicUsize::new(0),
            pages_failed: AtomicUsize::new(0),
            bytes_written: AtomicU64::new(0),
            ranges: Mutex::new(Vec::new()),
            progress: ProgressReporter::new(pages_total),
        }
    }

    fn finished_one(&self) {
        let done = self.pages_written.load(Ordering::Relaxed)
            + self.pages_extracted.load(Ordering::Relaxed)
            + self.pages_failed.load(Ordering::Relaxed);
        self.progress.tick(done);
    }

    pub fn record_written(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        self.pages_written.fetch_add(1, Ordering::AcqRel);
        self.finished_one();
    }

    pub fn record_extracted(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        self.pages_extracted.fetch_add(1, Ordering::AcqRel);
        self.finished_one();
    }

    pub fn record_failed(&self) {
        self.pages_failed.fetch_add(1, Ordering::AcqRel);
        self.finished_one();
    }

    pub fn record_range(&self, timing: RangeTiming) {
        if let Ok(mut ranges) = self.ranges.lock() {
            ranges.push(timing);
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut ranges = self.ranges.lock().map(|r| r.clone()).unwrap_or_default();
        ranges.sort_by_key(|r| r.start);
        let mut snapshot = MetricsSnapshot {
            pages_total: self.pages_total,
            pages_written: self.pages_written.load(Ordering::Acquire),
            pages_extracted: self.pages_extracted.load(Ordering::Acquire),
            pages_failed: self.pages_failed.load(Ordering::Acquire),
            bytes_written: self.bytes_written.load(Ordering::Acquire),
            peak_memory_bytes: peak_memory_bytes(),
            ranges,
            ..MetricsSnapshot::default()
        };
        snapshot.finish(self.elapsed());
        snapshot
    }
}

/// Peak resident set size of this process and its reaped children, in bytes.
#[cfg(unix)]
pub fn peak_memory_bytes() -> u64 {
    fn max_rss(who: libc::c_int) -> u64 {
        // SAFETY: getrusage only writes into the zeroed struct we pass.
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        if unsafe { libc::getrusage(who, &mut usage) } != 0 {
            return 0;
        }
        let max_rss = usage.ru_maxrss.max(0) as u64;
        // Linux reports kilobytes, macOS bytes.
        if cfg!(target_os = "macos") {
            max_rss
        } else {
            max_rss * 1024
        }
    }
    max_rss(libc::RUSAGE_SELF).max(max_rss(libc::RUSAGE_CHILDREN))
}

#[cfg(not(unix))]
pub fn peak_memory_bytes() -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts() {
        let metrics = JobMetrics::new(4);
        metrics.record_written(100);
        metrics.record_written(50);
        metrics.record_extracted(10);
        metrics.record_failed();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.pages_written, 2);
        assert_eq!(snapshot.pages_extracted, 1);
        assert_eq!(snapshot.pages_failed, 1);
        assert_eq!(snapshot.bytes_written, 160);
        assert_eq!(snapshot.pages_completed(), 3);
    }

    #[test]
    fn test_progress_steps() {
        let progress = ProgressReporter::new(20);
        assert!(!progress.tick(1));
        assert!(progress.tick(2));
        assert!(!progress.tick(2));
        assert!(progress.tick(5));
        assert!(progress.tick(20));
    }

    #[test]
    fn test_absorb_worker_snapshots() {
        let mut total = MetricsSnapshot::default();
        let worker = |start: usize| MetricsSnapshot {
            pages_total: 5,
            pages_written: 4,
            pages_failed: 1,
            bytes_written: 400,
            peak_memory_bytes: start as u64 * 1000,
            ranges: vec![RangeTiming {
                start,
                len: 5,
                threads: 2,
                elapsed_ms: 1.0,
            }],
            ..MetricsSnapshot::default()
        };
        total.absorb(&worker(5));
        total.absorb(&worker(0));
        total.finish(Duration::from_secs(2));

        assert_eq!(total.pages_total, 10);
        assert_eq!(total.pages_failed, 2);
        assert_eq!(total.peak_memory_bytes, 5000);
        assert_eq!(total.ranges[0].start, 0);
        assert_eq!(total.pages_per_second, 4.0);
    }

    #[cfg(unix)]
    #[test]
    fn test_peak_memory_is_reported() {
        assert!(peak_memory_bytes() > 0);
    }
}
