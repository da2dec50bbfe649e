#![cfg(test)]

use super::{KCas, KCasEntry};
use crate::reclaim::{EpochReclaimer, LeakyReclaimer, Reclaimer, ReclaimerPin};

#[test]
fn entries_read_back() {
    let reclaimer = LeakyReclaimer::new(1);
    let kcas = KCas::<LeakyReclaimer>::new(1);
    let entry = KCasEntry::new(42usize);

    let pin = ReclaimerPin::new(&reclaimer, 0);
    assert_eq!(kcas.read_value(0, &pin, &entry), 42);
}

#[test]
fn multi_slot_cas_commits_atomically() {
    let reclaimer = LeakyReclaimer::new(1);
    let kcas = KCas::<LeakyReclaimer>::new(1);
    let slots: Vec<KCasEntry<usize>> = (0..3).map(KCasEntry::new).collect();

    let pin = ReclaimerPin::new(&reclaimer, 0);
    let mut desc = kcas.create_descriptor(0);
    for (i, slot) in slots.iter().enumerate() {
        desc.add_value(slot, i, i + 10);
    }
    assert!(kcas.cas(0, &pin, desc));
    for (i, slot) in slots.iter().enumerate() {
        assert_eq!(kcas.read_value(0, &pin, slot), i + 10);
    }
}

#[test]
fn mismatched_expectation_fails_and_rolls_back() {
    let reclaimer = LeakyReclaimer::new(1);
    let kcas = KCas::<LeakyReclaimer>::new(1);
    let a = KCasEntry::new(1usize);
    let b = KCasEntry::new(2usize);

    let pin = ReclaimerPin::new(&reclaimer, 0);
    let mut desc = kcas.create_descriptor(0);
    desc.add_value(&a, 1, 100);
    desc.add_value(&b, 7, 200); // wrong expectation
    assert!(!kcas.cas(0, &pin, desc));
    assert_eq!(kcas.read_value(0, &pin, &a), 1);
    assert_eq!(kcas.read_value(0, &pin, &b), 2);
}

#[test]
fn dropping_an_unsubmitted_descriptor_is_free() {
    let kcas = KCas::<LeakyReclaimer>::new(1);
    let entry = KCasEntry::new(5usize);
    let mut desc = kcas.create_descriptor(0);
    desc.add_value(&entry, 5, 6);
    drop(desc);
}

// Two threads increment a pair of counters through double-slot descriptors.
// Linearisability means the counters can never diverge once quiescent.
#[test]
fn concurrent_double_increment_stays_coupled() {
    const THREADS: usize = 2;
    const OPS: usize = 2_000;

    let reclaimer = EpochReclaimer::new(THREADS);
    let kcas = KCas::<EpochReclaimer>::new(THREADS);
    let a = KCasEntry::new(0usize);
    let b = KCasEntry::new(0usize);

    std::thread::scope(|s| {
        for tid in 0..THREADS {
            let reclaimer = &reclaimer;
            let kcas = &kcas;
            let a = &a;
            let b = &b;
            s.spawn(move || {
                for _ in 0..OPS {
                    loop {
                        let pin = ReclaimerPin::new(reclaimer, tid);
                        let va = kcas.read_value(tid, &pin, a);
                        let vb = kcas.read_value(tid, &pin, b);
                        let mut desc = kcas.create_descriptor(tid);
                        desc.add_value(a, va, va + 1);
                        desc.add_value(b, vb, vb + 1);
                        if kcas.cas(tid, &pin, desc) {
                            break;
                        }
                    }
                }
            });
        }
    });

    let pin = ReclaimerPin::new(&reclaimer, 0);
    assert_eq!(kcas.read_value(0, &pin, &a), THREADS * OPS);
    assert_eq!(kcas.read_value(0, &pin, &b), THREADS * OPS);
}
