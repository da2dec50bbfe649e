//! Hopscotch hashing with per-segment locks.
//!
//! Every home bucket roots a singly linked list of its keys, encoded as
//! relative deltas (`first_delta` on the home bucket, `next_delta` on each
//! member), and every member lives within the hop range of its home.
//! Writers take the home segment's lock; readers are lock-free and
//! optimistic, re-walking the list whenever the segment timestamp changed
//! underneath them. A free bucket is claimed by CAS on its hash word
//! because free-bucket scans cross segment boundaries.
//!
//! Removal vacates a bucket and then runs the cache-line optimisation: a
//! list member living outside the freed bucket's cache line is relocated
//! into it, shortening future walks.

use crate::key::SetKey;
use crate::lock::{MutexLock, RawLock, SpinLock};
use crate::set::ConcurrentSet;
use crate::util::nearest_power_of_two;
use crossbeam_utils::CachePadded;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};


const NULL_DELTA: i32 = i32::MIN;

/// Hop range: maximum forward distance from home at which a key may live,
/// and the overflow tail appended past the last home bucket.
pub const INSERT_RANGE: usize = 4096;

const CACHE_LINE_BYTES: usize = 64;

/// Bit zero marks a claimed bucket, so a stored hash is never zero.
#[inline]
fn occupied_hash(hash: usize) -> usize {
    hash | 1
}

#[inline]
fn step(idx: usize, delta: i32) -> usize {
    (idx as isize + delta as isize) as usize
}

#[inline]
fn delta_between(from: usize, to: usize) -> i32 {
    let delta = to as isize - from as isize;
    debug_assert!(i32::try_from(delta).is_ok());
    delta as i32
}

struct Bucket {
    first_delta: AtomicI32,
    next_delta: AtomicI32,
    hash: AtomicUsize,
    key: AtomicUsize,
}

impl Bucket {
    fn new(null_word: usize) -> Self {
        Self {
            first_delta: AtomicI32::new(NULL_DELTA),
            next_delta: AtomicI32::new(NULL_DELTA),
            hash: AtomicUsize::new(0),
            key: AtomicUsize::new(null_word),
        }
    }
}

struct Segment<L> {
    timestamp: AtomicUsize,
    lock: L,
}

pub struct HopscotchSet<L: RawLock, K: SetKey = usize> {
    size_mask: usize,
    segment_shift: u32,
    segments: Box<[CachePadded<Segment<L>>]>,
    table: Box<[Bucket]>,
    cache_mask: usize,
    cacheline_alignment: bool,
    _marker: PhantomData<K>,
}

/// Hopscotch set with spin segment locks (the benchmarked configuration).
pub type SpinHopscotchSet<K = usize> = HopscotchSet<SpinLock, K>;
/// Hopscotch set with blocking segment locks.
pub type MutexHopscotchSet<K = usize> = HopscotchSet<MutexLock, K>;

impl<L: RawLock, K: SetKey> HopscotchSet<L, K> {
    pub fn new(capacity: usize, concurrency: usize) -> Self {
        let size = nearest_power_of_two(capacity);
        // Clamped so the shift cannot underflow on small tables.
        let segments = nearest_power_of_two(concurrency).min(size);
        let segment_shift = size.trailing_zeros() - segments.trailing_zeros();
        let num_buckets = size + INSERT_RANGE + 1;
        let null_word = K::NULL.into_word();

        Self {
            size_mask: size - 1,
            segment_shift,
            segments: (0..segments)
                .map(|_| {
                    CachePadded::new(Segment {
                        timestamp: AtomicUsize::new(0),
                        lock: L::default(),
                    })
                })
                .collect(),
            table: (0..num_buckets).map(|_| Bucket::new(null_word)).collect(),
            cache_mask: CACHE_LINE_BYTES / std::mem::size_of::<Bucket>() - 1,
            cacheline_alignment: true,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn segment_for(&self, hash: usize) -> &Segment<L> {
        &self.segments[(hash & self.size_mask) >> self.segment_shift]
    }

    /// Splices `free` in as the new head of `home`'s list. A `first_delta`
    /// of zero means the home bucket is itself a member, in which case the
    /// new head goes just behind it.
    fn splice_at_head(&self, home: usize, free: usize, key_word: usize) {
        self.table[free].key.store(key_word, Ordering::Relaxed);

        let home_bucket = &self.table[home];
        if home_bucket.first_delta.load(Ordering::Relaxed) == 0 {
            let next = home_bucket.next_delta.load(Ordering::Relaxed);
            let free_next = if next == NULL_DELTA {
                NULL_DELTA
            } else {
                delta_between(free, step(home, next))
            };
            self.table[free].next_delta.store(free_next, Ordering::Relaxed);
            home_bucket
                .next_delta
                .store(delta_between(home, free), Ordering::Relaxed);
        } else {
            let first = home_bucket.first_delta.load(Ordering::Relaxed);
            let free_next = if first == NULL_DELTA {
                NULL_DELTA
            } else {
                delta_between(free, step(home, first))
            };
            self.table[free].next_delta.store(free_next, Ordering::Relaxed);
            home_bucket
                .first_delta
                .store(delta_between(home, free), Ordering::Relaxed);
        }
    }

    /// Splices `free` in as the tail of `home`'s list, after `last`.
    fn splice_at_tail(&self, home: usize, free: usize, key_word: usize, last: Option<usize>) {
        self.table[free].key.store(key_word, Ordering::Relaxed);
        self.table[free].next_delta.store(NULL_DELTA, Ordering::Relaxed);

        match last {
            None => self.table[home]
                .first_delta
                .store(delta_between(home, free), Ordering::Relaxed),
            Some(last) => self.table[last]
                .next_delta
                .store(delta_between(last, free), Ordering::Relaxed),
        }
    }

    /// Unlinks `key_idx` from `home`'s list and releases the bucket.
    fn unlink(&self, segment: &Segment<L>, home: usize, key_idx: usize, prev: Option<usize>) {
        let key_bucket = &self.table[key_idx];
        key_bucket.key.store(K::NULL.into_word(), Ordering::Relaxed);

        let key_next = key_bucket.next_delta.load(Ordering::Relaxed);
        let relink = match prev {
            None => &self.table[home].first_delta,
            Some(prev) => &self.table[prev].next_delta,
        };
        if key_next == NULL_DELTA {
            relink.store(NULL_DELTA, Ordering::Relaxed);
        } else {
            relink.store(relink.load(Ordering::Relaxed) + key_next, Ordering::Relaxed);
        }

        segment.timestamp.fetch_add(1, Ordering::Release);
        key_bucket.next_delta.store(NULL_DELTA, Ordering::Relaxed);
        key_bucket.hash.store(0, Ordering::Release);
    }

    /// After a removal freed `free_idx`, tries to relocate a list member
    /// currently living outside its preferred cache line into the freed
    /// slot, relinking and bumping the timestamp accordingly.
    fn optimize_cacheline(&self, segment: &Segment<L>, free_idx: usize) {
        let start_cl = free_idx - (free_idx & self.cache_mask);
        let end_cl = start_cl + self.cache_mask;
        let free = &self.table[free_idx];

        for opt in start_cl..=end_cl {
            let first = self.table[opt].first_delta.load(Ordering::Relaxed);
            if first == NULL_DELTA {
                continue;
            }
            let mut reloc_last: Option<usize> = None;
            let mut curr_delta = first;
            let mut reloc = step(opt, first);
            loop {
                if curr_delta < 0 || curr_delta as usize > self.cache_mask {
                    let reloc_bucket = &self.table[reloc];
                    free.key
                        .store(reloc_bucket.key.load(Ordering::Relaxed), Ordering::Relaxed);
                    free.hash
                        .store(reloc_bucket.hash.load(Ordering::Relaxed), Ordering::Release);

                    let reloc_next = reloc_bucket.next_delta.load(Ordering::Relaxed);
                    if reloc_next == NULL_DELTA {
                        free.next_delta.store(NULL_DELTA, Ordering::Relaxed);
                    } else {
                        free.next_delta.store(
                            delta_between(free_idx, step(reloc, reloc_next)),
                            Ordering::Relaxed,
                        );
                    }
                    match reloc_last {
                        None => self.table[opt]
                            .first_delta
                            .store(delta_between(opt, free_idx), Ordering::Relaxed),
                        Some(last) => self.table[last]
                            .next_delta
                            .store(delta_between(last, free_idx), Ordering::Relaxed),
                    }

                    segment.timestamp.fetch_add(1, Ordering::Release);
                    reloc_bucket
                        .key
                        .store(K::NULL.into_word(), Ordering::Relaxed);
                    reloc_bucket.next_delta.store(NULL_DELTA, Ordering::Relaxed);
                    reloc_bucket.hash.store(0, Ordering::Release);
                    return;
                }

                let next = self.table[reloc].next_delta.load(Ordering::Relaxed);
                if next == NULL_DELTA {
                    break;
                }
                reloc_last = Some(reloc);
                curr_delta += next;
                reloc = step(reloc, next);
            }
        }
    }

    #[cold]
    fn capacity_exhausted(&self) -> ! {
        eprintln!(
            "hopscotch table has no free bucket within the hop range; \
             resize is unsupported"
        );
        std::process::abort();
    }

    /// Index of the bucket currently holding `key`. Quiescent callers only.
    #[cfg(test)]
    pub(crate) fn bucket_of(&self, key: K) -> Option<usize> {
        let word = key.into_word();
        self.table.iter().position(|bucket| {
            bucket.hash.load(Ordering::Relaxed) != 0
                && bucket.key.load(Ordering::Relaxed) == word
        })
    }
}

impl<L: RawLock, K: SetKey> ConcurrentSet<K> for HopscotchSet<L, K> {
    fn with_capacity(capacity: usize, threads: usize) -> Self {
        Self::new(capacity, threads)
    }

    fn thread_init(&self, _tid: usize) -> bool {
        true
    }

    fn contains(&self, key: K, _tid: usize) -> bool {
        let hash = key.hash();
        let key_word = key.into_word();
        let segment = self.segment_for(hash);
        let home = hash & self.size_mask;

        loop {
            let start_stamp = segment.timestamp.load(Ordering::Acquire);

            let mut idx = home;
            let mut delta = self.table[idx].first_delta.load(Ordering::Relaxed);
            while delta != NULL_DELTA {
                idx = step(idx, delta);
                if key_word == self.table[idx].key.load(Ordering::Relaxed) {
                    return true;
                }
                delta = self.table[idx].next_delta.load(Ordering::Relaxed);
            }

            if segment.timestamp.load(Ordering::Acquire) == start_stamp {
                return false;
            }
        }
    }

    fn add(&self, key: K, _tid: usize) -> bool {
        let hash = key.hash();
        let key_word = key.into_word();
        let segment = self.segment_for(hash);
        let _guard = segment.lock.guard();

        let home = hash & self.size_mask;
        let marked = occupied_hash(hash);

        // Walk the home list for a duplicate, remembering the tail.
        let mut last: Option<usize> = None;
        let mut idx = home;
        let mut delta = self.table[idx].first_delta.load(Ordering::Relaxed);
        while delta != NULL_DELTA {
            idx = step(idx, delta);
            if marked == self.table[idx].hash.load(Ordering::Acquire)
                && key_word == self.table[idx].key.load(Ordering::Relaxed)
            {
                return false;
            }
            last = Some(idx);
            delta = self.table[idx].next_delta.load(Ordering::Relaxed);
        }

        // Prefer a bucket in the home cache line.
        if self.cacheline_alignment {
            let start_cl = home - (home & self.cache_mask);
            let end_cl = start_cl + self.cache_mask;
            let mut free = home;
            loop {
                let current = self.table[free].hash.load(Ordering::Acquire);
                if current == 0 {
                    if self.table[free]
                        .hash
                        .compare_exchange(0, marked, Ordering::Acquire, Ordering::Acquire)
                        .is_err()
                    {
                        continue;
                    }
                    self.splice_at_head(home, free, key_word);
                    return true;
                }
                free += 1;
                if free > end_cl {
                    free = start_cl;
                }
                if free == home {
                    break;
                }
            }
        }

        // Any free bucket forward within the hop range.
        let max_bucket = (home + INSERT_RANGE).min(self.table.len() - 1);
        let mut free = home + self.cache_mask + 1;
        while free <= max_bucket {
            let current = self.table[free].hash.load(Ordering::Acquire);
            if current == 0 {
                if self.table[free]
                    .hash
                    .compare_exchange(0, marked, Ordering::Acquire, Ordering::Acquire)
                    .is_err()
                {
                    continue;
                }
                self.splice_at_tail(home, free, key_word, last);
                return true;
            }
            free += 1;
        }

        // Any free bucket backward.
        let min_bucket = home.saturating_sub(INSERT_RANGE) as isize;
        let mut free = home as isize - (self.cache_mask as isize + 1);
        while free >= min_bucket {
            let idx = free as usize;
            let current = self.table[idx].hash.load(Ordering::Relaxed);
            if current == 0 {
                if self.table[idx]
                    .hash
                    .compare_exchange(0, marked, Ordering::Acquire, Ordering::Acquire)
                    .is_err()
                {
                    continue;
                }
                self.splice_at_tail(home, idx, key_word, last);
                return true;
            }
            free -= 1;
        }

        self.capacity_exhausted()
    }

    fn remove(&self, key: K, _tid: usize) -> bool {
        let hash = key.hash();
        let key_word = key.into_word();
        let segment = self.segment_for(hash);
        let _guard = segment.lock.guard();

        let home = hash & self.size_mask;
        let marked = occupied_hash(hash);

        let mut last: Option<usize> = None;
        let mut idx = home;
        let mut delta = self.table[idx].first_delta.load(Ordering::Relaxed);
        loop {
            if delta == NULL_DELTA {
                return false;
            }
            idx = step(idx, delta);
            if marked == self.table[idx].hash.load(Ordering::Acquire)
                && key_word == self.table[idx].key.load(Ordering::Relaxed)
            {
                self.unlink(segment, home, idx, last);
                if self.cacheline_alignment {
                    self.optimize_cacheline(segment, idx);
                }
                return true;
            }
            last = Some(idx);
            delta = self.table[idx].next_delta.load(Ordering::Relaxed);
        }
    }
}
