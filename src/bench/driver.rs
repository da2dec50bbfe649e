//! The benchmark driver: preloads the table, spawns pinned workers, runs
//! the timed mixed workload or the verification workload, and collects
//! per-thread results.

use super::config::SetBenchmarkConfig;
use super::counters::ThreadCounters;
use super::generator::{SetAction, SetActionGenerator};
use super::pinner::{ProcessorInfo, ThreadPinner};
use super::results::{BenchmarkResult, ThreadResult};
use crate::set::ConcurrentSet;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;
use std::time::Instant;

/// Seed of the reproducible preload shuffle.
const PRELOAD_SEED: u64 = 0;

pub struct TableBenchmark<T: ConcurrentSet<usize>> {
    config: SetBenchmarkConfig,
    table: T,
}

impl<T: ConcurrentSet<usize>> TableBenchmark<T> {
    /// Builds the table and pre-fills it to the configured load factor
    /// with a seeded shuffle of the key range.
    pub fn new(config: SetBenchmarkConfig) -> Self {
        println!("Initialising hash table.");
        let table = T::with_capacity(config.table_size, config.base.threads);
        let amount = (config.table_size as f64 * config.load_factor) as usize;
        let mut keys: Vec<usize> = (0..config.table_size).collect();
        keys.shuffle(&mut SmallRng::seed_from_u64(PRELOAD_SEED));
        for (i, &key) in keys[..amount].iter().enumerate() {
            let added = table.add(key, i % config.base.threads);
            assert!(added, "preload inserted a duplicate key");
        }
        println!("Hash table initialised.");
        Self { config, table }
    }

    pub fn config(&self) -> &SetBenchmarkConfig {
        &self.config
    }

    /// Timed mixed-workload run. Workers pin themselves, initialise their
    /// thread state, and meet the controller at a `threads + 1` barrier so
    /// timing excludes initialisation; the controller sleeps for the
    /// configured duration and flips the stop flag.
    pub fn bench(&self) -> BenchmarkResult {
        println!("Running benchmark....");
        let threads = self.config.base.threads;
        let pinner = ThreadPinner::new(self.config.base.hyperthreading);
        let barrier = Barrier::new(threads + 1);
        let stop = AtomicBool::new(false);

        let mut per_thread = Vec::with_capacity(threads);
        let mut scheduling = Vec::with_capacity(threads);
        let mut elapsed = self.config.base.duration;

        std::thread::scope(|s| {
            println!("Launching threads.");
            let handles: Vec<_> = (0..threads)
                .map(|tid| {
                    let pinner = &pinner;
                    let barrier = &barrier;
                    let stop = &stop;
                    s.spawn(move || self.benchmark_routine(tid, pinner, barrier, stop))
                })
                .collect();

            barrier.wait();
            let started = Instant::now();
            std::thread::sleep(self.config.base.duration);
            stop.store(true, Ordering::Relaxed);
            elapsed = started.elapsed();

            println!("Joining threads.");
            for handle in handles {
                let (result, info) = handle.join().expect("worker panicked");
                per_thread.push(result);
                scheduling.push(info);
            }
        });

        scheduling.sort_by_key(|info| (info.package, info.core, info.smt_index));
        println!("Collating benchmark data.");
        BenchmarkResult {
            per_thread,
            scheduling,
            elapsed,
        }
    }

    fn benchmark_routine(
        &self,
        tid: usize,
        pinner: &ThreadPinner,
        barrier: &Barrier,
        stop: &AtomicBool,
    ) -> (ThreadResult, ProcessorInfo) {
        let info = pinner.pin_current(tid);
        let mut generator = SetActionGenerator::new(&self.config);
        let counters = ThreadCounters::new(self.config.base.counters);
        let init = self.table.thread_init(tid);
        barrier.wait();
        assert!(init);
        assert!(counters.start());

        let mut result = ThreadResult::default();
        while !stop.load(Ordering::Relaxed) {
            let action = generator.generate_action();
            let key = generator.generate_key();
            match action {
                SetAction::Contains => {
                    result.query_attempts += 1;
                    if self.table.contains(key, tid) {
                        result.query_successes += 1;
                    }
                }
                SetAction::Add => {
                    result.addition_attempts += 1;
                    if self.table.add(key, tid) {
                        result.addition_successes += 1;
                    }
                }
                SetAction::Remove => {
                    result.removal_attempts += 1;
                    if self.table.remove(key, tid) {
                        result.removal_successes += 1;
                    }
                }
            }
        }
        result.counters = counters.stop();
        (result, info)
    }

    /// Verification run. Each worker owns a disjoint pool of keys that are
    /// absent from the table: adds take pool keys (and must succeed),
    /// removes retry random keys until one succeeds and return it to the
    /// pool. On shutdown no pooled key may be present in the table.
    pub fn verify(&self) -> bool {
        println!("Running verification....");
        let threads = self.config.base.threads;
        let unused: Vec<usize> = (0..self.config.table_size)
            .filter(|&key| !self.table.contains(key, key % threads))
            .collect();
        let slice = unused.len() / threads;
        assert!(slice > 0, "table too full to build verification pools");

        let pinner = ThreadPinner::new(self.config.base.hyperthreading);
        let barrier = Barrier::new(threads + 1);
        let stop = AtomicBool::new(false);
        let mut pools: Vec<VecDeque<usize>> = Vec::with_capacity(threads);

        std::thread::scope(|s| {
            println!("Launching threads.");
            let handles: Vec<_> = (0..threads)
                .map(|tid| {
                    let pool: Vec<usize> =
                        unused[tid * slice..(tid + 1) * slice].to_vec();
                    let pinner = &pinner;
                    let barrier = &barrier;
                    let stop = &stop;
                    s.spawn(move || self.test_routine(tid, pool, pinner, barrier, stop))
                })
                .collect();

            barrier.wait();
            std::thread::sleep(self.config.base.duration);
            stop.store(true, Ordering::Relaxed);

            println!("Joining threads.");
            for handle in handles {
                pools.push(handle.join().expect("worker panicked"));
            }
        });

        println!("Checking unused pools against the table.");
        let mut seen = hashbrown::HashSet::new();
        for (tid, pool) in pools.iter().enumerate() {
            for &key in pool {
                // The mode's guarantees rest on the pools staying disjoint.
                assert!(seen.insert(key), "key {key} ended up in two pools");
                assert!(
                    !self.table.contains(key, tid),
                    "pooled key {key} is present in the table"
                );
            }
        }
        true
    }

    fn test_routine(
        &self,
        tid: usize,
        pool: Vec<usize>,
        pinner: &ThreadPinner,
        barrier: &Barrier,
        stop: &AtomicBool,
    ) -> VecDeque<usize> {
        pinner.pin_current(tid);
        let mut generator = SetActionGenerator::new(&self.config);
        let mut pool = {
            let mut keys = pool;
            keys.shuffle(&mut SmallRng::from_entropy());
            VecDeque::from(keys)
        };
        let init = self.table.thread_init(tid);
        barrier.wait();
        assert!(init);

        while !stop.load(Ordering::Relaxed) {
            match generator.generate_action() {
                SetAction::Contains => {
                    let key = generator.generate_key();
                    self.table.contains(key, tid);
                }
                SetAction::Add => {
                    if let Some(key) = pool.pop_front() {
                        let added = self.table.add(key, tid);
                        assert!(added, "pooled key {key} was already present");
                    }
                }
                SetAction::Remove => {
                    let mut key = generator.generate_key();
                    loop {
                        if self.table.remove(key, tid) {
                            break;
                        }
                        if stop.load(Ordering::Relaxed) {
                            return pool;
                        }
                        key = generator.generate_key();
                    }
                    // The key is ours now; nobody else may re-add it.
                    pool.push_back(key);
                    assert!(
                        !self.table.contains(key, tid),
                        "removed key {key} is still visible"
                    );
                }
            }
        }
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::config::Args;
    use crate::chaining::MichaelSet;
    use crate::reclaim::EpochReclaimer;
    use clap::Parser;

    fn config(flags: &[&str]) -> SetBenchmarkConfig {
        let mut argv = vec!["throng"];
        argv.extend_from_slice(flags);
        SetBenchmarkConfig::from_args(&Args::parse_from(argv)).unwrap()
    }

    #[test]
    fn preload_fills_to_load_factor() {
        let config = config(&["-S", "10", "-L", "0.5", "-T", "2", "-P", "false"]);
        let benchmark = TableBenchmark::<MichaelSet<EpochReclaimer>>::new(config.clone());
        let present = (0..config.table_size)
            .filter(|&k| benchmark.table.contains(k, 0))
            .count();
        assert_eq!(present, 512);
    }

    #[test]
    fn short_benchmark_produces_results() {
        let config = config(&[
            "-S", "10", "-T", "2", "-D", "1", "-U", "20", "-P", "false",
        ]);
        let benchmark = TableBenchmark::<MichaelSet<EpochReclaimer>>::new(config);
        let result = benchmark.bench();
        assert_eq!(result.per_thread.len(), 2);
        assert_eq!(result.scheduling.len(), 2);
        let total = result.collate();
        assert!(total.total_attempts() > 0);
    }

    #[test]
    fn verification_passes_on_a_correct_table() {
        let config = config(&[
            "-S", "9", "-T", "2", "-D", "1", "-U", "40", "-P", "false", "-V", "true",
        ]);
        let benchmark = TableBenchmark::<MichaelSet<EpochReclaimer>>::new(config);
        assert!(benchmark.verify());
    }
}
