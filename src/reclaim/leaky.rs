//! The no-op reclaimer: retirement leaks.
//!
//! Present so that algorithms which never retire (the transactional and
//! K-CAS Robin-Hood tables) pay no reclamation cost, and as the baseline
//! configuration for the ones that do. `dealloc` still frees, since it is
//! only ever called on records no other thread has seen.

use super::{Handle, Reclaimer};
use std::sync::atomic::AtomicUsize;

pub struct LeakyReclaimer;

#[derive(Default)]
pub struct LeakyHandle;

impl Handle for LeakyHandle {
    #[inline]
    fn set(&mut self, _ptr: usize) {}

    #[inline]
    fn try_protect(
        &mut self,
        _observed: usize,
        _src: &AtomicUsize,
        _unmask: fn(usize) -> usize,
    ) -> bool {
        true
    }
}

impl Reclaimer for LeakyReclaimer {
    type Handle = LeakyHandle;

    fn new(_threads: usize) -> Self {
        Self
    }

    fn thread_init(&self, _tid: usize) -> bool {
        true
    }

    #[inline]
    fn enter(&self, _tid: usize) {}

    #[inline]
    fn exit(&self, _tid: usize) {}

    #[inline]
    fn get_rec(&self, _tid: usize) -> LeakyHandle {
        LeakyHandle
    }

    #[inline]
    unsafe fn retire<T: Send>(&self, _handle: &LeakyHandle, _tid: usize) {}
}
