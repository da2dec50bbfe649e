//! Benchmark result collation.

use super::counters::CounterValues;
use super::pinner::ProcessorInfo;
use std::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct ThreadResult {
    pub query_attempts: u64,
    pub query_successes: u64,
    pub addition_attempts: u64,
    pub addition_successes: u64,
    pub removal_attempts: u64,
    pub removal_successes: u64,
    pub counters: CounterValues,
}

impl ThreadResult {
    pub fn total_attempts(&self) -> u64 {
        self.query_attempts + self.addition_attempts + self.removal_attempts
    }
}

#[derive(Clone, Debug)]
pub struct BenchmarkResult {
    pub per_thread: Vec<ThreadResult>,
    pub scheduling: Vec<ProcessorInfo>,
    pub elapsed: Duration,
}

impl BenchmarkResult {
    pub fn collate(&self) -> ThreadResult {
        let mut total = ThreadResult::default();
        for result in &self.per_thread {
            total.query_attempts += result.query_attempts;
            total.query_successes += result.query_successes;
            total.addition_attempts += result.addition_attempts;
            total.addition_successes += result.addition_successes;
            total.removal_attempts += result.removal_attempts;
            total.removal_successes += result.removal_successes;
            total.counters.accumulate(&result.counters);
        }
        total
    }

    /// Completed operations per second across all workers.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.collate().total_attempts() as f64 / secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(ops: u64) -> ThreadResult {
        ThreadResult {
            query_attempts: ops,
            query_successes: ops / 2,
            addition_attempts: ops,
            addition_successes: ops / 4,
            removal_attempts: ops,
            removal_successes: ops / 4,
            counters: CounterValues([1; 5]),
        }
    }

    #[test]
    fn collation_sums_threads() {
        let bench = BenchmarkResult {
            per_thread: vec![result(100), result(300)],
            scheduling: Vec::new(),
            elapsed: Duration::from_secs(2),
        };
        let total = bench.collate();
        assert_eq!(total.query_attempts, 400);
        assert_eq!(total.total_attempts(), 1200);
        assert_eq!(total.counters.0, [2; 5]);
        assert!((bench.throughput() - 600.0).abs() < 1e-9);
    }
}
