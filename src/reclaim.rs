//! Safe memory reclamation for the lock-free sets.
//!
//! Every public set operation runs inside a [`ReclaimerPin`] scope. Records
//! removed from a structure are *retired* through the reclaimer and
//! destroyed only once no pinned thread can still hold a reference to them.
//! Two implementations are provided: [`epoch::EpochReclaimer`] and the
//! no-op [`leaky::LeakyReclaimer`] for algorithms that never retire.

use std::sync::atomic::AtomicUsize;

pub mod epoch;
pub mod leaky;

pub use epoch::EpochReclaimer;
pub use leaky::LeakyReclaimer;

/// A per-reference protection slot.
///
/// The contract of [`try_protect`](Handle::try_protect) is: re-read `src`,
/// apply `unmask`, and confirm that `observed` is still the current value,
/// protecting the unmasked pointer on success. Reclaimers whose safety
/// derives from the pin scope alone (epoch, leaky) record the pointer and
/// succeed unconditionally; the sets are written against the general
/// contract so a hazard-pointer reclaimer could slot in unchanged.
pub trait Handle: Default {
    /// Forcibly installs `ptr` (untagged word form) as the protected pointer.
    fn set(&mut self, ptr: usize);

    /// Validates `observed` against `src` and protects `unmask(observed)`.
    /// Returns false when the observation is stale and must be re-read.
    fn try_protect(
        &mut self,
        observed: usize,
        src: &AtomicUsize,
        unmask: fn(usize) -> usize,
    ) -> bool;
}

/// A memory reclaimer shared by one table instance.
///
/// `tid` is the stable per-thread identifier threaded through every set
/// operation; all per-thread reclaimer state is indexed by it.
pub trait Reclaimer: Send + Sync + Sized + 'static {
    type Handle: Handle;

    fn new(threads: usize) -> Self;

    fn thread_init(&self, tid: usize) -> bool;

    /// Opens a reclamation scope. Use [`ReclaimerPin`] rather than calling
    /// this directly so that unwinding still closes the scope.
    fn enter(&self, tid: usize);

    fn exit(&self, tid: usize);

    fn get_rec(&self, tid: usize) -> Self::Handle;

    /// Queues the pointer held by `handle` for destruction as a `Box<T>`
    /// once every thread has left any scope that could observe it.
    ///
    /// # Safety
    /// The handle must hold a pointer obtained from [`alloc`](Self::alloc)
    /// with this exact `T`, unlinked from the structure so that no new
    /// references can be created.
    unsafe fn retire<T: Send>(&self, handle: &Self::Handle, tid: usize);

    /// Allocation passthrough; every record later retired or freed through
    /// this reclaimer must come from here.
    fn alloc<T: Send>(&self, value: T) -> *mut T {
        Box::into_raw(Box::new(value))
    }

    /// Immediately frees a record that was never published.
    ///
    /// # Safety
    /// `ptr` must come from [`alloc`](Self::alloc) and be unreachable by
    /// any other thread.
    unsafe fn dealloc<T: Send>(&self, ptr: *mut T) {
        drop(Box::from_raw(ptr));
    }
}

/// Scope guard for `enter`/`exit`: exceptional exits still release.
pub struct ReclaimerPin<'a, R: Reclaimer> {
    reclaimer: &'a R,
    tid: usize,
}

impl<'a, R: Reclaimer> ReclaimerPin<'a, R> {
    #[inline]
    pub fn new(reclaimer: &'a R, tid: usize) -> Self {
        reclaimer.enter(tid);
        Self { reclaimer, tid }
    }

    #[inline]
    pub fn get_rec(&self) -> R::Handle {
        self.reclaimer.get_rec(self.tid)
    }

    #[inline]
    pub fn reclaimer(&self) -> &'a R {
        self.reclaimer
    }

    /// See [`Reclaimer::retire`].
    #[inline]
    pub unsafe fn retire<T: Send>(&self, handle: &R::Handle) {
        self.reclaimer.retire::<T>(handle, self.tid);
    }
}

impl<R: Reclaimer> Drop for ReclaimerPin<'_, R> {
    #[inline]
    fn drop(&mut self) {
        self.reclaimer.exit(self.tid);
    }
}
