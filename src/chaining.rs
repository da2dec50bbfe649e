//! Lock-free separate chaining: per-bucket ordered linked lists with a
//! logical-deletion mark in bit zero of each `next` pointer.
//!
//! `search` is the workhorse. It locates the position a key would occupy,
//! holding three protection handles (next, current, previous), and helps
//! unlink any marked cell it encounters — retiring it — before continuing
//! from the cell's successor. Any observation mismatch restarts from the
//! bucket head. Removal is two-phase: the mark CAS linearises the delete,
//! and either the remover or a later helping `search` performs the
//! physical unlink.

use crate::key::SetKey;
use crate::reclaim::{Handle, Reclaimer, ReclaimerPin};
use crate::set::ConcurrentSet;
use crate::util::nearest_power_of_two;
use std::sync::atomic::{AtomicUsize, Ordering};

mod tests;

const MARK_TAG: usize = 0b1;

#[inline]
fn is_marked(bits: usize) -> bool {
    bits & MARK_TAG == MARK_TAG
}

#[inline]
fn unmark(bits: usize) -> usize {
    bits & !MARK_TAG
}

#[inline]
fn mark(bits: usize) -> usize {
    bits | MARK_TAG
}

struct Cell<K> {
    key: K,
    next: AtomicUsize,
}

/// Where a key would live in its bucket list: `prev` is the link that led
/// to `curr`, `next` is `curr`'s successor at observation time.
struct Search {
    found: bool,
    prev: *const AtomicUsize,
    curr: usize,
    next: usize,
}

pub struct MichaelSet<R: Reclaimer, K: SetKey = usize> {
    reclaimer: R,
    size_mask: usize,
    buckets: Box<[AtomicUsize]>,
    _marker: std::marker::PhantomData<K>,
}

unsafe impl<R: Reclaimer, K: SetKey> Send for MichaelSet<R, K> {}
unsafe impl<R: Reclaimer, K: SetKey> Sync for MichaelSet<R, K> {}

impl<R: Reclaimer, K: SetKey> MichaelSet<R, K> {
    pub fn new(capacity: usize, threads: usize) -> Self {
        let size = nearest_power_of_two(capacity);
        Self {
            reclaimer: R::new(threads),
            size_mask: size - 1,
            buckets: (0..size).map(|_| AtomicUsize::new(0)).collect(),
            _marker: std::marker::PhantomData,
        }
    }

    #[inline]
    fn bucket_for(&self, key: K) -> &AtomicUsize {
        &self.buckets[key.hash() & self.size_mask]
    }

    fn search(
        &self,
        head: &AtomicUsize,
        key: K,
        pin: &ReclaimerPin<'_, R>,
        h0: &mut R::Handle,
        h1: &mut R::Handle,
        h2: &mut R::Handle,
    ) -> Search {
        let key_word = key.into_word();
        'retry: loop {
            let mut prev: *const AtomicUsize = head;
            let mut curr = head.load(Ordering::Acquire);
            if !h1.try_protect(curr, head, unmark) {
                continue 'retry;
            }

            loop {
                if unmark(curr) == 0 {
                    return Search {
                        found: false,
                        prev,
                        curr,
                        next: 0,
                    };
                }
                let curr_cell = unsafe { &*(unmark(curr) as *const Cell<K>) };
                let next = curr_cell.next.load(Ordering::Acquire);
                let curr_marked = is_marked(next);
                if !h0.try_protect(next, &curr_cell.next, unmark) {
                    continue 'retry;
                }
                let curr_key = curr_cell.key;
                if unsafe { (*prev).load(Ordering::Acquire) } != unmark(curr) {
                    continue 'retry;
                }

                if !curr_marked {
                    if curr_key.into_word() >= key_word {
                        return Search {
                            found: curr_key == key,
                            prev,
                            curr,
                            next,
                        };
                    }
                    prev = &curr_cell.next;
                    h2.set(unmark(curr));
                    curr = next;
                    h1.set(unmark(next));
                } else {
                    // Help unlink the logically deleted cell; the
                    // predecessor stays put and the scan resumes from the
                    // cell's successor.
                    if unsafe {
                        (*prev).compare_exchange(
                            unmark(curr),
                            unmark(next),
                            Ordering::Release,
                            Ordering::Relaxed,
                        )
                    }
                    .is_ok()
                    {
                        unsafe { pin.retire::<Cell<K>>(h1) };
                        curr = unmark(next);
                        h1.set(curr);
                    } else {
                        continue 'retry;
                    }
                }
            }
        }
    }

    fn list_find(&self, head: &AtomicUsize, key: K, pin: &ReclaimerPin<'_, R>) -> bool {
        let mut h0 = pin.get_rec();
        let mut h1 = pin.get_rec();
        let mut h2 = pin.get_rec();
        self.search(head, key, pin, &mut h0, &mut h1, &mut h2).found
    }

    fn list_add(
        &self,
        head: &AtomicUsize,
        cell: *mut Cell<K>,
        key: K,
        pin: &ReclaimerPin<'_, R>,
    ) -> bool {
        loop {
            let mut h0 = pin.get_rec();
            let mut h1 = pin.get_rec();
            let mut h2 = pin.get_rec();
            let position = self.search(head, key, pin, &mut h0, &mut h1, &mut h2);
            if position.found {
                return false;
            }
            unsafe { (*cell).next.store(position.curr, Ordering::Relaxed) };
            if unsafe {
                (*position.prev).compare_exchange(
                    position.curr,
                    cell as usize,
                    Ordering::Release,
                    Ordering::Relaxed,
                )
            }
            .is_ok()
            {
                return true;
            }
        }
    }

    fn list_remove(&self, head: &AtomicUsize, key: K, pin: &ReclaimerPin<'_, R>) -> bool {
        loop {
            let mut h0 = pin.get_rec();
            let mut h1 = pin.get_rec();
            let mut h2 = pin.get_rec();
            let position = self.search(head, key, pin, &mut h0, &mut h1, &mut h2);
            if !position.found {
                return false;
            }

            let curr_cell = unsafe { &*(unmark(position.curr) as *const Cell<K>) };
            // Logical delete; this CAS is the linearisation point.
            if curr_cell
                .next
                .compare_exchange(
                    position.next,
                    mark(position.next),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_err()
            {
                continue;
            }

            // Physical unlink, or leave it to a helping search.
            if unsafe {
                (*position.prev).compare_exchange(
                    unmark(position.curr),
                    unmark(position.next),
                    Ordering::Release,
                    Ordering::Relaxed,
                )
            }
            .is_ok()
            {
                unsafe { pin.retire::<Cell<K>>(&h1) };
            } else {
                self.search(head, key, pin, &mut h0, &mut h1, &mut h2);
            }
            return true;
        }
    }

    /// Keys in one bucket, list order, with their mark state. Quiescent
    /// callers only.
    #[cfg(test)]
    pub(crate) fn bucket_keys(&self, bucket: usize) -> Vec<(K, bool)> {
        let mut out = Vec::new();
        let mut curr = self.buckets[bucket].load(Ordering::Acquire);
        while unmark(curr) != 0 {
            let cell = unsafe { &*(unmark(curr) as *const Cell<K>) };
            let next = cell.next.load(Ordering::Acquire);
            out.push((cell.key, is_marked(next)));
            curr = unmark(next);
        }
        out
    }
}

impl<R: Reclaimer, K: SetKey> Drop for MichaelSet<R, K> {
    fn drop(&mut self) {
        for head in self.buckets.iter() {
            let mut curr = unmark(head.load(Ordering::Relaxed));
            while curr != 0 {
                let cell = curr as *mut Cell<K>;
                let next = unsafe { (*cell).next.load(Ordering::Relaxed) };
                unsafe { self.reclaimer.dealloc(cell) };
                curr = unmark(next);
            }
        }
    }
}

impl<R: Reclaimer, K: SetKey> ConcurrentSet<K> for MichaelSet<R, K> {
    fn with_capacity(capacity: usize, threads: usize) -> Self {
        Self::new(capacity, threads)
    }

    fn thread_init(&self, tid: usize) -> bool {
        self.reclaimer.thread_init(tid)
    }

    fn contains(&self, key: K, tid: usize) -> bool {
        let pin = ReclaimerPin::new(&self.reclaimer, tid);
        self.list_find(self.bucket_for(key), key, &pin)
    }

    fn add(&self, key: K, tid: usize) -> bool {
        let pin = ReclaimerPin::new(&self.reclaimer, tid);
        let cell = self.reclaimer.alloc(Cell {
            key,
            next: AtomicUsize::new(0),
        });
        let added = self.list_add(self.bucket_for(key), cell, key, &pin);
        if !added {
            // Never published; free immediately.
            unsafe { self.reclaimer.dealloc(cell) };
        }
        added
    }

    fn remove(&self, key: K, tid: usize) -> bool {
        let pin = ReclaimerPin::new(&self.reclaimer, tid);
        self.list_remove(self.bucket_for(key), key, &pin)
    }
}
