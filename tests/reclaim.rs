//! Reclaimer semantics driven deterministically: logical thread ids are
//! stepped from a single OS thread so epoch transitions happen exactly
//! where the scenario says they do.

use std::sync::atomic::{AtomicUsize, Ordering};
use throng::reclaim::{EpochReclaimer, Handle, LeakyReclaimer, Reclaimer};

#[test]
fn epoch_frees_only_after_two_global_advances() {
    let reclaimer = EpochReclaimer::new(2);
    assert!(reclaimer.thread_init(0));
    assert!(reclaimer.thread_init(1));

    let p = reclaimer.alloc(42u64);
    assert_eq!(reclaimer.allocs(), 1);

    // Thread 0 retires p inside its scope and closes it, which advances
    // the global epoch (both threads still agree).
    reclaimer.enter(0);
    let mut handle = reclaimer.get_rec(0);
    handle.set(p as usize);
    unsafe { reclaimer.retire::<u64>(&handle, 0) };
    reclaimer.exit(0);
    assert_eq!(reclaimer.frees(), 0);

    // Thread 1 completes an op: catches up, cannot advance alone.
    reclaimer.enter(1);
    reclaimer.exit(1);
    assert_eq!(reclaimer.frees(), 0);

    // Thread 0 catches up; its exit advances the epoch a second time.
    reclaimer.enter(0);
    reclaimer.exit(0);
    assert_eq!(reclaimer.frees(), 0);

    // Both step once more; the next scope of thread 0 rotates onto the
    // list holding p and drains it.
    reclaimer.enter(1);
    reclaimer.exit(1);
    reclaimer.enter(0);
    reclaimer.exit(0);
    reclaimer.enter(1);
    reclaimer.exit(1);
    assert_eq!(reclaimer.frees(), 0, "freed while still unsafe");

    reclaimer.enter(0);
    assert_eq!(reclaimer.frees(), 1, "p should drain on this enter");
    reclaimer.exit(0);

    // Freed exactly once: further cycling must not touch it again.
    for _ in 0..6 {
        reclaimer.enter(0);
        reclaimer.exit(0);
        reclaimer.enter(1);
        reclaimer.exit(1);
    }
    assert_eq!(reclaimer.frees(), 1);
}

#[test]
fn epoch_drop_drains_outstanding_garbage() {
    let reclaimer = EpochReclaimer::new(1);
    let p = reclaimer.alloc(7u64);
    let q = reclaimer.alloc(8u64);

    reclaimer.enter(0);
    let mut handle = reclaimer.get_rec(0);
    handle.set(p as usize);
    unsafe { reclaimer.retire::<u64>(&handle, 0) };
    handle.set(q as usize);
    unsafe { reclaimer.retire::<u64>(&handle, 0) };
    reclaimer.exit(0);

    assert_eq!(reclaimer.allocs(), 2);
    drop(reclaimer);
    // Destructor drained both; nothing to assert beyond not crashing,
    // which miri-style double-free bugs would.
}

struct DropProbe;

static DROPS: AtomicUsize = AtomicUsize::new(0);

impl Drop for DropProbe {
    fn drop(&mut self) {
        DROPS.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn leaky_retire_is_observationally_a_no_op() {
    let reclaimer = LeakyReclaimer::new(1);
    let p = reclaimer.alloc(DropProbe);

    reclaimer.enter(0);
    let mut handle = reclaimer.get_rec(0);
    handle.set(p as usize);
    unsafe { reclaimer.retire::<DropProbe>(&handle, 0) };
    reclaimer.exit(0);
    assert_eq!(DROPS.load(Ordering::Relaxed), 0, "leaky must never free");

    // The immediate-free path still works for unpublished records.
    unsafe { reclaimer.dealloc(p) };
    assert_eq!(DROPS.load(Ordering::Relaxed), 1);
}

#[test]
fn epoch_concurrent_churn_balances_allocs_and_frees() {
    const THREADS: usize = 4;
    let reclaimer = &EpochReclaimer::new(THREADS);

    std::thread::scope(|s| {
        for tid in 0..THREADS {
            s.spawn(move || {
                for _ in 0..2_000 {
                    reclaimer.enter(tid);
                    let p = reclaimer.alloc(tid as u64);
                    let mut handle = reclaimer.get_rec(tid);
                    handle.set(p as usize);
                    unsafe { reclaimer.retire::<u64>(&handle, tid) };
                    reclaimer.exit(tid);
                }
            });
        }
    });

    assert_eq!(reclaimer.allocs(), THREADS * 2_000);
    assert!(reclaimer.frees() <= reclaimer.allocs());
}
