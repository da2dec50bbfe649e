//! Lock-free linear probing with node indirection.
//!
//! Each slot is an atomic word encoding `null`, a distinguished `TOMBSTONE`
//! address, a *committed* cell pointer, or a *tentative* cell pointer (low
//! bit set). Insertion publishes a tentative cell with a plain CAS — a
//! reservation cheaper than a descriptor — and then runs the [`upgrade`]
//! commit protocol, which collapses concurrent duplicate inserts to a
//! single winner: the earliest tentative is committed at the first null
//! slot, redundant tentatives are wiped to tombstones, and the caller
//! decides its return value by pointer identity against its own cell.
//!
//! [`upgrade`]: LinearProbeSet::upgrade

use crate::key::SetKey;
use crate::reclaim::{Handle, Reclaimer, ReclaimerPin};
use crate::set::ConcurrentSet;
use crate::util::nearest_power_of_two;
use std::sync::atomic::{AtomicUsize, Ordering};

mod tests;

const TENTATIVE_TAG: usize = 0b1;

#[inline]
fn is_tentative(bits: usize) -> bool {
    bits & TENTATIVE_TAG == TENTATIVE_TAG
}

#[inline]
fn untag(bits: usize) -> usize {
    bits & !TENTATIVE_TAG
}

#[inline]
fn tentative(bits: usize) -> usize {
    bits | TENTATIVE_TAG
}

struct Cell<K> {
    key: K,
}

pub struct LinearProbeSet<R: Reclaimer, K: SetKey = usize> {
    reclaimer: R,
    size_mask: usize,
    table: Box<[AtomicUsize]>,
    tombstone: *mut Cell<K>,
}

// The tombstone is a shared immutable sentinel; cells are managed through
// the reclaimer.
unsafe impl<R: Reclaimer, K: SetKey> Send for LinearProbeSet<R, K> {}
unsafe impl<R: Reclaimer, K: SetKey> Sync for LinearProbeSet<R, K> {}

impl<R: Reclaimer, K: SetKey> LinearProbeSet<R, K> {
    pub fn new(capacity: usize, threads: usize) -> Self {
        let size = nearest_power_of_two(capacity);
        let reclaimer = R::new(threads);
        let tombstone = reclaimer.alloc(Cell { key: K::NULL });
        Self {
            reclaimer,
            size_mask: size - 1,
            table: (0..size).map(|_| AtomicUsize::new(0)).collect(),
            tombstone,
        }
    }

    #[inline]
    fn tombstone_bits(&self) -> usize {
        self.tombstone as usize
    }

    #[inline]
    unsafe fn key_of(&self, bits: usize) -> K {
        (*(untag(bits) as *const Cell<K>)).key
    }

    /// The commit protocol. Re-scans from `home` and decides the winning
    /// cell for `key`: an existing committed copy if there is one, else the
    /// earliest tentative, which is committed at the first null slot.
    /// Redundant tentatives are wiped to tombstones along the way. Returns
    /// the winning cell's address, or the tombstone address when the
    /// winner was removed from under the scan.
    fn upgrade(&self, home: usize, key: K, pin: &ReclaimerPin<'_, R>) -> usize {
        let ts = self.tombstone_bits();
        let mut found_committed = false;
        let mut found_closest = false;
        let mut closest_slot = 0usize;
        let mut actual: usize = ts;
        let mut closest_handle = pin.get_rec();

        let mut i = home;
        loop {
            'slot: loop {
                let mut handle = pin.get_rec();
                let bits = self.table[i].load(Ordering::Acquire);
                if !handle.try_protect(bits, &self.table[i], untag) {
                    continue 'slot;
                }

                if bits == 0 {
                    // Commit phase.
                    if found_committed {
                        return actual;
                    }
                    if found_closest {
                        let to_commit = self.table[closest_slot].load(Ordering::Acquire);
                        // Committed already.
                        if to_commit == untag(actual) {
                            return untag(actual);
                        }
                        // Changed from underneath us.
                        if untag(to_commit) != untag(actual) {
                            return ts;
                        }
                        return match self.table[closest_slot].compare_exchange(
                            to_commit,
                            untag(actual),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => untag(actual),
                            // Someone committed it for us, or deleted it.
                            Err(observed) if observed != untag(actual) => ts,
                            Err(observed) => observed,
                        };
                    }
                    // Neither a committed copy nor a surviving tentative:
                    // the key was committed and removed before we got here.
                    return ts;
                } else if bits == ts {
                    // Obstructs nothing; keep probing.
                } else if is_tentative(bits) {
                    if unsafe { self.key_of(bits) } == key {
                        if found_committed {
                            // A committed copy exists; wipe the redundancy.
                            if self.table[i]
                                .compare_exchange(bits, ts, Ordering::AcqRel, Ordering::Acquire)
                                .is_ok()
                            {
                                unsafe { pin.retire::<Cell<K>>(&handle) };
                            }
                        } else if !found_closest {
                            // Our new best candidate.
                            if !closest_handle.try_protect(bits, &self.table[i], untag) {
                                continue 'slot;
                            }
                            closest_slot = i;
                            found_closest = true;
                            actual = bits;
                        } else {
                            let best = self.table[closest_slot].load(Ordering::Acquire);
                            if best == actual {
                                // Earliest candidate intact: wipe this later one.
                                if self.table[i]
                                    .compare_exchange(
                                        bits,
                                        ts,
                                        Ordering::AcqRel,
                                        Ordering::Acquire,
                                    )
                                    .is_ok()
                                {
                                    unsafe { pin.retire::<Cell<K>>(&handle) };
                                }
                            } else {
                                return ts;
                            }
                        }
                    }
                } else {
                    if unsafe { self.key_of(bits) } == key {
                        found_committed = true;
                        if found_closest {
                            let to_remove = self.table[closest_slot].load(Ordering::Acquire);
                            if to_remove != ts && unsafe { self.key_of(to_remove) } == key {
                                if self.table[closest_slot]
                                    .compare_exchange(
                                        actual,
                                        ts,
                                        Ordering::AcqRel,
                                        Ordering::Acquire,
                                    )
                                    .is_ok()
                                {
                                    unsafe { pin.retire::<Cell<K>>(&closest_handle) };
                                }
                            }
                            found_closest = false;
                        }
                        // The committed copy is the winner.
                        actual = bits;
                    }
                }
                break 'slot;
            }
            i = (i + 1) & self.size_mask;
        }
    }

    /// Slots holding committed or tentative cells. Quiescent callers only.
    #[cfg(test)]
    pub(crate) fn occupied_slots(&self, key: K) -> (Vec<usize>, Vec<usize>) {
        let ts = self.tombstone_bits();
        let mut committed = Vec::new();
        let mut tentatives = Vec::new();
        for (i, slot) in self.table.iter().enumerate() {
            let bits = slot.load(Ordering::Acquire);
            if bits == 0 || bits == ts {
                continue;
            }
            if unsafe { self.key_of(bits) } == key {
                if is_tentative(bits) {
                    tentatives.push(i);
                } else {
                    committed.push(i);
                }
            }
        }
        (committed, tentatives)
    }
}

impl<R: Reclaimer, K: SetKey> Drop for LinearProbeSet<R, K> {
    fn drop(&mut self) {
        for slot in self.table.iter() {
            let bits = slot.load(Ordering::Relaxed);
            if bits != 0 && bits != self.tombstone_bits() {
                unsafe { self.reclaimer.dealloc(untag(bits) as *mut Cell<K>) };
            }
        }
        unsafe { self.reclaimer.dealloc(self.tombstone) };
    }
}

impl<R: Reclaimer, K: SetKey> ConcurrentSet<K> for LinearProbeSet<R, K> {
    fn with_capacity(capacity: usize, threads: usize) -> Self {
        Self::new(capacity, threads)
    }

    fn thread_init(&self, tid: usize) -> bool {
        self.reclaimer.thread_init(tid)
    }

    fn contains(&self, key: K, tid: usize) -> bool {
        let pin = ReclaimerPin::new(&self.reclaimer, tid);
        let ts = self.tombstone_bits();
        let home = key.hash() & self.size_mask;

        let mut i = home;
        loop {
            'slot: loop {
                let mut handle = pin.get_rec();
                let bits = self.table[i].load(Ordering::Acquire);
                if !handle.try_protect(bits, &self.table[i], untag) {
                    continue 'slot;
                }
                if bits == 0 {
                    return false;
                }
                if bits != ts && !is_tentative(bits) && unsafe { self.key_of(bits) } == key {
                    return true;
                }
                break 'slot;
            }
            i = (i + 1) & self.size_mask;
        }
    }

    fn add(&self, key: K, tid: usize) -> bool {
        let pin = ReclaimerPin::new(&self.reclaimer, tid);
        let to_insert = self.reclaimer.alloc(Cell { key });
        let ts = self.tombstone_bits();
        let home = key.hash() & self.size_mask;

        let mut i = home;
        loop {
            'slot: loop {
                let mut handle = pin.get_rec();
                let bits = self.table[i].load(Ordering::Acquire);
                if !handle.try_protect(bits, &self.table[i], untag) {
                    continue 'slot;
                }

                if bits == 0 || bits == ts {
                    if self.table[i]
                        .compare_exchange(
                            bits,
                            tentative(to_insert as usize),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_err()
                    {
                        continue 'slot;
                    }
                    let winner = self.upgrade(home, key, &pin);
                    // Inserted, then removed from under us.
                    if winner == ts {
                        return true;
                    }
                    return winner == to_insert as usize;
                }

                if unsafe { self.key_of(bits) } == key {
                    if is_tentative(bits) {
                        self.upgrade(home, key, &pin);
                    }
                    unsafe { self.reclaimer.dealloc(to_insert) };
                    return false;
                }
                break 'slot;
            }
            i = (i + 1) & self.size_mask;
        }
    }

    fn remove(&self, key: K, tid: usize) -> bool {
        let pin = ReclaimerPin::new(&self.reclaimer, tid);
        let ts = self.tombstone_bits();
        let home = key.hash() & self.size_mask;

        'restart: loop {
            let mut i = home;
            loop {
                'slot: loop {
                    let mut handle = pin.get_rec();
                    let bits = self.table[i].load(Ordering::Acquire);
                    if !handle.try_protect(bits, &self.table[i], untag) {
                        continue 'slot;
                    }
                    if bits == 0 {
                        return false;
                    }
                    if bits != ts
                        && !is_tentative(bits)
                        && unsafe { self.key_of(bits) } == key
                    {
                        if self.table[i]
                            .compare_exchange(bits, ts, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            unsafe { pin.retire::<Cell<K>>(&handle) };
                            return true;
                        }
                        continue 'restart;
                    }
                    break 'slot;
                }
                i = (i + 1) & self.size_mask;
            }
        }
    }
}
