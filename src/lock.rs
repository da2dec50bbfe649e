//! Locks used by the lock-based sets.
//!
//! [`SpinLock`] and [`MutexLock`] implement the plain [`RawLock`] interface
//! consumed by the hopscotch segments. [`ElidedLock`] is the hardware
//! lock-elision lock guarding the transactional Robin-Hood table: it first
//! attempts to run the critical section as a hardware transaction with the
//! lock merely *observed* free, and falls back to acquiring the lock when
//! elision keeps aborting. The transactional path is compiled in with the
//! `htm` feature; without it the lock is an ordinary test-and-set spin lock,
//! which is still correct.

use crossbeam_utils::Backoff;
use parking_lot::lock_api::RawMutex as _;
use std::sync::atomic::{AtomicBool, Ordering};

/// A raw mutual-exclusion lock.
pub trait RawLock: Default + Send + Sync {
    fn lock(&self);
    fn unlock(&self);

    /// Acquires the lock for the lifetime of the returned guard.
    #[inline]
    fn guard(&self) -> LockGuard<'_, Self> {
        self.lock();
        LockGuard { lock: self }
    }
}

/// Releases the lock on drop.
pub struct LockGuard<'a, L: RawLock + ?Sized> {
    lock: &'a L,
}

impl<L: RawLock + ?Sized> Drop for LockGuard<'_, L> {
    #[inline]
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// Test-and-set spin lock.
#[derive(Default)]
pub struct SpinLock {
    locked: AtomicBool,
}

impl RawLock for SpinLock {
    #[inline]
    fn lock(&self) {
        let backoff = Backoff::new();
        loop {
            if !self.locked.load(Ordering::Relaxed)
                && self
                    .locked
                    .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return;
            }
            backoff.snooze();
        }
    }

    #[inline]
    fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// Blocking lock backed by `parking_lot`.
pub struct MutexLock {
    raw: parking_lot::RawMutex,
}

impl Default for MutexLock {
    #[inline]
    fn default() -> Self {
        Self {
            raw: parking_lot::RawMutex::INIT,
        }
    }
}

impl RawLock for MutexLock {
    #[inline]
    fn lock(&self) {
        self.raw.lock();
    }

    #[inline]
    fn unlock(&self) {
        // The guard discipline pairs every unlock with a prior lock on this
        // thread.
        unsafe { self.raw.unlock() }
    }
}

cfg_if! {
    if #[cfg(all(feature = "htm", target_arch = "x86_64"))] {
        mod htm {
            use core::arch::asm;

            pub const XBEGIN_STARTED: u32 = u32::MAX;
            pub const XABORT_EXPLICIT: u32 = 1 << 0;
            pub const XABORT_RETRY: u32 = 1 << 1;
            /// Explicit abort code meaning "the fallback lock was held".
            pub const ABORT_LOCK_BUSY: u32 = 0xff;

            #[inline]
            pub fn xabort_code(status: u32) -> u32 {
                (status >> 24) & 0xff
            }

            /// Starts a transaction. Returns [`XBEGIN_STARTED`] on entry;
            /// on abort, control resumes here with the abort status.
            #[inline(always)]
            pub unsafe fn xbegin() -> u32 {
                let mut status: u32 = XBEGIN_STARTED;
                asm!("xbegin 2f", "2:", inout("eax") status, options(nostack));
                status
            }

            #[inline(always)]
            pub unsafe fn xend() {
                asm!("xend", options(nostack));
            }

            #[inline(always)]
            pub unsafe fn xabort_lock_busy() {
                asm!("xabort 255", options(nostack));
            }

            /// True when executing transactionally.
            #[inline(always)]
            pub unsafe fn xtest() -> bool {
                let active: u8;
                asm!("xtest", "setnz {}", out(reg_byte) active, options(nostack));
                active != 0
            }
        }
    }
}

/// Elision attempts before falling back to the lock.
#[cfg(all(feature = "htm", target_arch = "x86_64"))]
const ELISION_RETRIES: usize = 20;

/// Lock-elision lock: hardware transactions first, spin lock on fallback.
#[derive(Default)]
pub struct ElidedLock {
    locked: AtomicBool,
}

impl ElidedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters the critical section, transactionally where possible.
    #[inline]
    pub fn lock(&self) -> ElidedGuard<'_> {
        #[cfg(all(feature = "htm", target_arch = "x86_64"))]
        if self.try_elide() {
            return ElidedGuard { lock: self };
        }
        self.acquire_fallback();
        ElidedGuard { lock: self }
    }

    /// Runs the elision retry protocol. Returns true with a transaction
    /// open and the lock observed free, bringing the lock word into the
    /// read set so any writer aborts us.
    #[cfg(all(feature = "htm", target_arch = "x86_64"))]
    fn try_elide(&self) -> bool {
        for _ in 0..ELISION_RETRIES {
            let status = unsafe { htm::xbegin() };
            if status == htm::XBEGIN_STARTED {
                if !self.locked.load(Ordering::Relaxed) {
                    return true;
                }
                unsafe { htm::xabort_lock_busy() };
            }
            let lock_busy = status & htm::XABORT_EXPLICIT != 0
                && htm::xabort_code(status) == htm::ABORT_LOCK_BUSY;
            if lock_busy {
                // Wait for the holder to drain before re-attempting, or the
                // next transaction aborts straight away again.
                while self.locked.load(Ordering::Relaxed) {
                    std::hint::spin_loop();
                }
            } else if status & htm::XABORT_RETRY == 0 {
                break;
            }
        }
        false
    }

    fn acquire_fallback(&self) {
        let backoff = Backoff::new();
        loop {
            if !self.locked.load(Ordering::Relaxed)
                && self
                    .locked
                    .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                return;
            }
            backoff.snooze();
        }
    }

    #[inline]
    fn release(&self) {
        #[cfg(all(feature = "htm", target_arch = "x86_64"))]
        if !self.locked.load(Ordering::Relaxed) && unsafe { htm::xtest() } {
            unsafe { htm::xend() };
            return;
        }
        self.locked.store(false, Ordering::Release);
    }
}

/// Commits the transaction or releases the lock on drop.
pub struct ElidedGuard<'a> {
    lock: &'a ElidedLock,
}

impl Drop for ElidedGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hammer<L: RawLock>(lock: &L) {
        let counter = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        let _guard = lock.guard();
                        let v = counter.load(Ordering::Relaxed);
                        counter.store(v + 1, Ordering::Relaxed);
                    }
                });
            }
        });
        assert_eq!(counter.load(Ordering::Relaxed), 4000);
    }

    #[test]
    fn spin_lock_excludes() {
        hammer(&SpinLock::default());
    }

    #[test]
    fn mutex_lock_excludes() {
        hammer(&MutexLock::default());
    }

    #[test]
    fn elided_lock_excludes() {
        let lock = ElidedLock::new();
        let counter = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        let _guard = lock.lock();
                        let v = counter.load(Ordering::Relaxed);
                        counter.store(v + 1, Ordering::Relaxed);
                    }
                });
            }
        });
        assert_eq!(counter.load(Ordering::Relaxed), 4000);
    }
}
