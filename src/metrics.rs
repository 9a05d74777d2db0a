#[cfg(feature = "metrics")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "metrics")]
use std::time::Instant;

/// Optional performance counters for a scheduler.
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct Metrics {
    /// Jobs handed to the queues, continuations and kill jobs included.
    pub jobs_pushed: AtomicU64,
    /// Jobs popped and run by a worker.
    pub jobs_executed: AtomicU64,
    /// Fibers allocated, pre-warmed ones included.
    pub fibers_created: AtomicU64,
    /// `call`s that suspended their fiber.
    pub calls_parked: AtomicU64,
    /// Parked fibers switched back in by a resume job.
    pub fibers_resumed: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

#[cfg(feature = "metrics")]
impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_pushed: AtomicU64::new(0),
            jobs_executed: AtomicU64::new(0),
            fibers_created: AtomicU64::new(0),
            calls_parked: AtomicU64::new(0),
            fibers_resumed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub(crate) fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Returns a snapshot of current metrics values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_pushed: self.jobs_pushed.load(Ordering::Relaxed),
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
            fibers_created: self.fibers_created.load(Ordering::Relaxed),
            calls_parked: self.calls_parked.load(Ordering::Relaxed),
            fibers_resumed: self.fibers_resumed.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(feature = "metrics")]
impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_pushed: u64,
    pub jobs_executed: u64,
    pub fibers_created: u64,
    pub calls_parked: u64,
    pub fibers_resumed: u64,
    pub elapsed_seconds: f64,
}

#[cfg(feature = "metrics")]
impl MetricsSnapshot {
    /// Calculates jobs per second throughput.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_executed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Approximates the number of queued jobs (pushes - executions).
    pub fn queue_depth(&self) -> i64 {
        self.jobs_pushed as i64 - self.jobs_executed as i64
    }

    /// Parked calls that have not been switched back in yet.
    pub fn calls_in_flight(&self) -> i64 {
        self.calls_parked as i64 - self.fibers_resumed as i64
    }
}
