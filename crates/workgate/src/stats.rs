//! Lock-free processing counters
//!
//! Counters are independent relaxed atomics. A snapshot may observe `errors`
//! slightly ahead of or behind `processed` for a task that is completing at the
//! same moment; the figures are for throughput reporting, not per-task accounting.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

/// Aggregate counters shared by all workers of a pool
#[derive(Debug, Default)]
pub struct Stats {
    processed: AtomicI64,
    errors: AtomicI64,
    dropped_results: AtomicI64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a dispatched task, successful or not
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed task (handler error, panic, or unsupported kind)
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a result dropped because the result channel was full
    pub fn record_dropped_result(&self) {
        self.dropped_results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            dropped_results: self.dropped_results.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub processed: i64,
    pub errors: i64,
    pub dropped_results: i64,
}

impl StatsSnapshot {
    /// Errors as a percentage of processed tasks (0 when nothing was processed)
    pub fn error_rate(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        self.errors as f64 / self.processed as f64 * 100.0
    }

    /// Successful tasks as a percentage of processed tasks (100 when nothing was processed)
    pub fn success_rate(&self) -> f64 {
        100.0 - self.error_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_starts_at_zero() {
        assert_eq!(Stats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        const THREADS: i64 = 8;
        const CALLS: i64 = 10_000;

        let stats = Arc::new(Stats::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..CALLS {
                        stats.record_processed();
                        stats.record_error();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.processed, THREADS * CALLS);
        assert_eq!(snapshot.errors, THREADS * CALLS);
        assert_eq!(snapshot.dropped_results, 0);
    }

    #[test]
    fn test_rates() {
        let snapshot = StatsSnapshot {
            processed: 200,
            errors: 10,
            dropped_results: 0,
        };
        assert!((snapshot.error_rate() - 5.0).abs() < 1e-9);
        assert!((snapshot.success_rate() - 95.0).abs() < 1e-9);
    }

    #[test]
    fn test_rates_without_traffic() {
        let snapshot = StatsSnapshot::default();
        assert_eq!(snapshot.error_rate(), 0.0);
        assert_eq!(snapshot.success_rate(), 100.0);
    }
}
