//! The uniform set interface consumed by the benchmark harness.

use crate::key::SetKey;

/// A fixed-capacity concurrent set of word-sized keys.
///
/// `tid` is a stable per-thread identifier in `[0, threads)` assigned
/// before any call; it indexes per-thread reclaimer state. All operations
/// are linearisable and the `add`/`remove` return values are the
/// linearisation results: `add` returns true iff the key was newly
/// inserted, `remove` returns true iff the key was present and this call
/// removed it.
pub trait ConcurrentSet<K: SetKey>: Send + Sync {
    fn with_capacity(capacity: usize, threads: usize) -> Self
    where
        Self: Sized;

    fn thread_init(&self, tid: usize) -> bool;

    fn contains(&self, key: K, tid: usize) -> bool;

    fn add(&self, key: K, tid: usize) -> bool;

    fn remove(&self, key: K, tid: usize) -> bool;
}
