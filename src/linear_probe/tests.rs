#![cfg(test)]

use super::LinearProbeSet;
use crate::key::testing::Direct;
use crate::reclaim::{EpochReclaimer, LeakyReclaimer};
use crate::set::ConcurrentSet;

type LeakySet = LinearProbeSet<LeakyReclaimer, Direct>;

#[test]
fn sequential_insert_remove() {
    let set = LeakySet::new(16, 1);
    assert!(set.add(Direct(7), 0));
    assert!(!set.add(Direct(7), 0));
    assert!(set.contains(Direct(7), 0));
    assert!(set.remove(Direct(7), 0));
    assert!(!set.contains(Direct(7), 0));
    assert!(!set.remove(Direct(7), 0));
}

#[test]
fn tombstones_do_not_end_probes() {
    let set = LeakySet::new(16, 1);
    // Same home slot 3: the second key probes past the first.
    assert!(set.add(Direct(3), 0));
    assert!(set.add(Direct(19), 0));
    // Removing the first leaves a tombstone the second is still behind.
    assert!(set.remove(Direct(3), 0));
    assert!(set.contains(Direct(19), 0));
    // The tombstone is reusable for a fresh insert.
    assert!(set.add(Direct(35), 0));
    assert!(set.contains(Direct(35), 0));
}

#[test]
fn committed_cell_occupies_earliest_candidate_slot() {
    let set = LeakySet::new(16, 1);
    assert!(set.add(Direct(10), 0));
    let (committed, tentatives) = set.occupied_slots(Direct(10));
    assert_eq!(committed, vec![10]);
    assert!(tentatives.is_empty());
}

// Three threads race to insert the same key into an empty table: exactly
// one add returns true, and at quiescence exactly one committed cell holds
// the key with no tentatives left behind.
#[test]
fn duplicate_insert_race_has_one_winner() {
    const THREADS: usize = 3;
    for _round in 0..50 {
        let set = LinearProbeSet::<EpochReclaimer, usize>::with_capacity(64, THREADS);
        let wins = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|s| {
            for t in 0..THREADS {
                let set = &set;
                let wins = &wins;
                s.spawn(move || {
                    if set.add(42, t) {
                        wins.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    }
                });
            }
        });

        assert_eq!(wins.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert!(set.contains(42, 0));
        let (committed, tentatives) = set.occupied_slots(42);
        assert_eq!(committed.len(), 1, "exactly one committed cell");
        assert!(tentatives.is_empty(), "no tentative cells at quiescence");
    }
}

#[test]
fn concurrent_disjoint_ranges() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 256;
    let set = LinearProbeSet::<EpochReclaimer, usize>::with_capacity(4096, THREADS);

    std::thread::scope(|s| {
        for t in 0..THREADS {
            let set = &set;
            s.spawn(move || {
                let base = t * PER_THREAD;
                for k in base..base + PER_THREAD {
                    assert!(set.add(k, t));
                }
                for k in (base..base + PER_THREAD).step_by(2) {
                    assert!(set.remove(k, t));
                }
            });
        }
    });

    for t in 0..THREADS {
        let base = t * PER_THREAD;
        for k in base..base + PER_THREAD {
            assert_eq!(set.contains(k, 0), k % 2 == 1, "key {k}");
        }
    }
}

// Mixed add/remove churn on a tiny keyspace; at quiescence no tentative
// cell may remain anywhere.
#[test]
fn churn_leaves_no_tentatives() {
    const THREADS: usize = 4;
    let set = LinearProbeSet::<EpochReclaimer, usize>::with_capacity(128, THREADS);

    std::thread::scope(|s| {
        for t in 0..THREADS {
            let set = &set;
            s.spawn(move || {
                for i in 0..500 {
                    let k = i % 8;
                    set.add(k, t);
                    set.remove(k, t);
                }
            });
        }
    });

    for k in 0..8usize {
        let (committed, tentatives) = set.occupied_slots(k);
        assert!(tentatives.is_empty(), "tentative survived for key {k}");
        assert!(committed.len() <= 1, "duplicate committed cells for key {k}");
        assert_eq!(set.contains(k, 0), committed.len() == 1);
    }
}
