//! Epoch-based reclamation with three rotating garbage lists per thread.
//!
//! A retired pointer is safe to free once every thread has passed through
//! `exit` at a later epoch; the `epoch % 3` rotation guarantees that by the
//! time a list index is reused the epoch has advanced twice, so every
//! observer of the retired pointer has left its scope.

use super::{Handle, Reclaimer};
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

const NUM_EPOCHS: usize = 3;

/// Local and global epochs start in sync at the list-rotation period.
const FIRST_EPOCH: usize = 3;

struct Retired {
    ptr: *mut u8,
    dtor: unsafe fn(*mut u8),
}

// Retired records only ever hold `Box<T: Send>` allocations.
unsafe impl Send for Retired {}

unsafe fn drop_retired<T>(ptr: *mut u8) {
    drop(Box::from_raw(ptr as *mut T));
}

struct ThreadState {
    epoch: AtomicUsize,
    garbage: [UnsafeCell<Vec<Retired>>; NUM_EPOCHS],
}

// Garbage lists are single-producer single-consumer per slot: the owning
// thread pushes on retire and drains on its own next enter. Cross-thread
// access happens only in `Drop`, which has exclusive access.
unsafe impl Sync for ThreadState {}

pub struct EpochReclaimer {
    global_epoch: CachePadded<AtomicUsize>,
    threads: Box<[CachePadded<ThreadState>]>,
    allocs: AtomicUsize,
    frees: AtomicUsize,
}

impl EpochReclaimer {
    fn try_increment_epoch(&self, current: usize) -> bool {
        for state in self.threads.iter() {
            if state.epoch.load(Ordering::Acquire) != current {
                return false;
            }
        }
        self.global_epoch
            .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    fn drain(&self, safe_epoch: usize, tid: usize) {
        let list = unsafe { &mut *self.threads[tid].garbage[safe_epoch % NUM_EPOCHS].get() };
        let freed = list.len();
        for retired in list.drain(..) {
            unsafe { (retired.dtor)(retired.ptr) };
        }
        self.frees.fetch_add(freed, Ordering::Relaxed);
    }

    /// Total allocations made through this reclaimer. Test observability.
    pub fn allocs(&self) -> usize {
        self.allocs.load(Ordering::Relaxed)
    }

    /// Total records destroyed, drained or immediate. Test observability.
    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::Relaxed)
    }
}

/// Carries the unmasked pointer between observation and retirement. The
/// epoch scheme protects through the pin scope, so validation always
/// succeeds.
#[derive(Default)]
pub struct EpochHandle {
    ptr: usize,
}

impl Handle for EpochHandle {
    #[inline]
    fn set(&mut self, ptr: usize) {
        self.ptr = ptr;
    }

    #[inline]
    fn try_protect(
        &mut self,
        observed: usize,
        _src: &AtomicUsize,
        unmask: fn(usize) -> usize,
    ) -> bool {
        self.ptr = unmask(observed);
        true
    }
}

impl Reclaimer for EpochReclaimer {
    type Handle = EpochHandle;

    fn new(threads: usize) -> Self {
        let threads = (0..threads)
            .map(|_| {
                CachePadded::new(ThreadState {
                    epoch: AtomicUsize::new(FIRST_EPOCH),
                    garbage: [
                        UnsafeCell::new(Vec::with_capacity(200)),
                        UnsafeCell::new(Vec::with_capacity(200)),
                        UnsafeCell::new(Vec::with_capacity(200)),
                    ],
                })
            })
            .collect();
        Self {
            global_epoch: CachePadded::new(AtomicUsize::new(FIRST_EPOCH)),
            threads,
            allocs: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
        }
    }

    fn thread_init(&self, tid: usize) -> bool {
        tid < self.threads.len()
    }

    fn enter(&self, tid: usize) {
        let local = self.threads[tid].epoch.load(Ordering::Relaxed);
        let global = self.global_epoch.load(Ordering::Acquire);
        if local != global {
            debug_assert_eq!(global, local + 1);
            self.drain(global, tid);
            self.threads[tid].epoch.store(global, Ordering::Release);
        }
    }

    fn exit(&self, tid: usize) {
        let local = self.threads[tid].epoch.load(Ordering::Relaxed);
        let global = self.global_epoch.load(Ordering::Acquire);
        if local == global {
            self.try_increment_epoch(global);
        }
    }

    fn get_rec(&self, _tid: usize) -> EpochHandle {
        EpochHandle::default()
    }

    unsafe fn retire<T: Send>(&self, handle: &EpochHandle, tid: usize) {
        let epoch = self.threads[tid].epoch.load(Ordering::Relaxed);
        let list = &mut *self.threads[tid].garbage[epoch % NUM_EPOCHS].get();
        list.push(Retired {
            ptr: handle.ptr as *mut u8,
            dtor: drop_retired::<T>,
        });
    }

    fn alloc<T: Send>(&self, value: T) -> *mut T {
        self.allocs.fetch_add(1, Ordering::Relaxed);
        Box::into_raw(Box::new(value))
    }

    unsafe fn dealloc<T: Send>(&self, ptr: *mut T) {
        self.frees.fetch_add(1, Ordering::Relaxed);
        drop(Box::from_raw(ptr));
    }
}

impl Drop for EpochReclaimer {
    fn drop(&mut self) {
        let mut freed = 0;
        for state in self.threads.iter() {
            for list in &state.garbage {
                let list = unsafe { &mut *list.get() };
                freed += list.len();
                for retired in list.drain(..) {
                    unsafe { (retired.dtor)(retired.ptr) };
                }
            }
        }
        self.frees.fetch_add(freed, Ordering::Relaxed);
    }
}
