//! Robin-Hood hashing under a single elided lock.
//!
//! The table itself is ordinary single-threaded Robin-Hood: linear probing
//! with distance comparisons for lookup, swap-down insertion, shift-back
//! deletion. Concurrency comes entirely from the [`ElidedLock`] guarding
//! one global critical section; the linearisation point is transaction
//! commit or lock release.

use crate::key::SetKey;
use crate::lock::ElidedLock;
use crate::set::ConcurrentSet;
use crate::util::{distance_from_slot, nearest_power_of_two};
use std::cell::UnsafeCell;


pub struct ElidedRobinHoodSet<K: SetKey = usize> {
    lock: ElidedLock,
    size_mask: usize,
    table: UnsafeCell<Box<[K]>>,
}

// All table accesses happen inside the lock's critical section (elided or
// acquired), which serialises them.
unsafe impl<K: SetKey> Send for ElidedRobinHoodSet<K> {}
unsafe impl<K: SetKey> Sync for ElidedRobinHoodSet<K> {}

impl<K: SetKey> ElidedRobinHoodSet<K> {
    pub fn new(capacity: usize) -> Self {
        let size = nearest_power_of_two(capacity);
        Self {
            lock: ElidedLock::new(),
            size_mask: size - 1,
            table: UnsafeCell::new(vec![K::NULL; size].into_boxed_slice()),
        }
    }

    /// Keys currently resident, home-slot order. Quiescent callers only.
    #[cfg(test)]
    pub(crate) fn resident_keys(&self) -> Vec<(usize, K)> {
        let _guard = self.lock.lock();
        let table = unsafe { &*self.table.get() };
        table
            .iter()
            .enumerate()
            .filter(|(_, &k)| k != K::NULL)
            .map(|(i, &k)| (i, k))
            .collect()
    }
}

impl<K: SetKey> ConcurrentSet<K> for ElidedRobinHoodSet<K> {
    fn with_capacity(capacity: usize, _threads: usize) -> Self {
        Self::new(capacity)
    }

    fn thread_init(&self, _tid: usize) -> bool {
        true
    }

    fn contains(&self, key: K, _tid: usize) -> bool {
        let home = key.hash() & self.size_mask;
        let _guard = self.lock.lock();
        let table = unsafe { &*self.table.get() };

        let mut distance = 0;
        loop {
            let slot = (home + distance) & self.size_mask;
            let current = table[slot];
            if current == K::NULL {
                return false;
            }
            if current == key {
                return true;
            }
            let current_home = current.hash() & self.size_mask;
            if distance_from_slot(self.size_mask, current_home, slot) < distance {
                return false;
            }
            distance += 1;
        }
    }

    fn add(&self, key: K, _tid: usize) -> bool {
        let home = key.hash() & self.size_mask;
        let _guard = self.lock.lock();
        let table = unsafe { &mut *self.table.get() };

        let mut active = key;
        let mut active_dist = 0;
        let mut slot = home;
        loop {
            let current = table[slot];
            if current == K::NULL {
                table[slot] = active;
                return true;
            }
            if current == active {
                return false;
            }
            let current_home = current.hash() & self.size_mask;
            let current_dist = distance_from_slot(self.size_mask, current_home, slot);
            if current_dist < active_dist {
                table[slot] = active;
                active = current;
                active_dist = current_dist;
            }
            slot = (slot + 1) & self.size_mask;
            active_dist += 1;
        }
    }

    fn remove(&self, key: K, _tid: usize) -> bool {
        let home = key.hash() & self.size_mask;
        let _guard = self.lock.lock();
        let table = unsafe { &mut *self.table.get() };

        let mut distance = 0;
        loop {
            let mut slot = (home + distance) & self.size_mask;
            let current = table[slot];
            if current == K::NULL {
                return false;
            }
            if current == key {
                // Shift the displaced run back one slot until a key in its
                // home position (or an empty slot) ends the run.
                loop {
                    let next = (slot + 1) & self.size_mask;
                    let shifted = table[next];
                    if shifted == K::NULL
                        || distance_from_slot(self.size_mask, shifted.hash() & self.size_mask, next)
                            == 0
                    {
                        break;
                    }
                    table[slot] = shifted;
                    slot = next;
                }
                table[slot] = K::NULL;
                return true;
            }
            let current_home = current.hash() & self.size_mask;
            if distance_from_slot(self.size_mask, current_home, slot) < distance {
                return false;
            }
            distance += 1;
        }
    }
}
