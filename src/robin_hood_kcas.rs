//! Robin-Hood hashing without locks, serialised through the K-CAS engine.
//!
//! Every mutation (displacement chain on insert, shuffle-back on remove) is
//! committed as one multi-word CAS, and every region of the table carries a
//! timestamp that the descriptor bumps whenever it touches the region.
//! Lock-free probes snapshot each region timestamp they cross; a negative
//! answer is only trusted after a *counter check* confirms no snapshotted
//! region changed during the traversal, otherwise the probe re-runs with
//! fresh reads.

use crate::kcas::{KCas, KCasEntry};
use crate::key::SetKey;
use crate::reclaim::{Reclaimer, ReclaimerPin};
use crate::set::ConcurrentSet;
use crate::util::{distance_from_slot, nearest_power_of_two};
use crossbeam_utils::CachePadded;


/// Bound on distinct region snapshots a single probe can hold.
const MAX_SNAPSHOTS: usize = 2048;

/// Table regions per thread (rounded up to a power of two overall).
const REGIONS_PER_THREAD: usize = 128;

pub struct KCasRobinHoodSet<R: Reclaimer, K: SetKey = usize> {
    size_mask: usize,
    timestamp_shift: u32,
    timestamps: Box<[CachePadded<KCasEntry<usize>>]>,
    table: Box<[KCasEntry<K>]>,
    reclaimer: R,
    kcas: KCas<R>,
}

impl<R: Reclaimer, K: SetKey> KCasRobinHoodSet<R, K> {
    pub fn new(capacity: usize, threads: usize) -> Self {
        let size = nearest_power_of_two(capacity);
        // Clamped so the shift cannot underflow on small tables.
        let num_timestamps = nearest_power_of_two(threads * REGIONS_PER_THREAD).min(size);
        let timestamp_shift = size.trailing_zeros() - num_timestamps.trailing_zeros();

        Self {
            size_mask: size - 1,
            timestamp_shift,
            timestamps: (0..num_timestamps)
                .map(|_| CachePadded::new(KCasEntry::new(0usize)))
                .collect(),
            table: (0..size).map(|_| KCasEntry::new(K::NULL)).collect(),
            reclaimer: R::new(threads),
            kcas: KCas::new(threads),
        }
    }

    #[inline]
    fn region_of(&self, slot: usize) -> usize {
        slot >> self.timestamp_shift
    }

    /// Re-reads every snapshotted region timestamp along the probe path.
    /// True when none changed, making the negative probe answer safe.
    fn counter_check(
        &self,
        tid: usize,
        pin: &ReclaimerPin<'_, R>,
        home: usize,
        stamps: &[usize],
    ) -> bool {
        let mut last_region = usize::MAX;
        let mut checked = 0;
        let mut slot = home;
        while checked < stamps.len() {
            let region = self.region_of(slot & self.size_mask);
            if region != last_region {
                last_region = region;
                if stamps[checked] != self.kcas.read_value(tid, pin, &self.timestamps[region]) {
                    return false;
                }
                checked += 1;
            }
            slot += 1;
        }
        true
    }

    /// Keys currently resident, slot order. Quiescent callers only.
    #[cfg(test)]
    pub(crate) fn resident_keys(&self, tid: usize) -> Vec<(usize, K)> {
        let pin = ReclaimerPin::new(&self.reclaimer, tid);
        self.table
            .iter()
            .enumerate()
            .map(|(slot, entry)| (slot, self.kcas.read_value(tid, &pin, entry)))
            .filter(|(_, key)| *key != K::NULL)
            .collect()
    }
}

impl<R: Reclaimer, K: SetKey> ConcurrentSet<K> for KCasRobinHoodSet<R, K> {
    fn with_capacity(capacity: usize, threads: usize) -> Self {
        Self::new(capacity, threads)
    }

    fn thread_init(&self, tid: usize) -> bool {
        self.reclaimer.thread_init(tid)
    }

    fn contains(&self, key: K, tid: usize) -> bool {
        let home = key.hash() & self.size_mask;
        let pin = ReclaimerPin::new(&self.reclaimer, tid);

        'restart: loop {
            let mut stamps = [0usize; MAX_SNAPSHOTS];
            let mut stamp_count = 0;
            let mut last_region = usize::MAX;

            let mut slot = home;
            let mut distance = 0;
            loop {
                let region = self.region_of(slot);
                if region != last_region {
                    last_region = region;
                    assert!(stamp_count < MAX_SNAPSHOTS);
                    stamps[stamp_count] = self.kcas.read_value(tid, &pin, &self.timestamps[region]);
                    stamp_count += 1;
                }

                let current = self.kcas.read_value(tid, &pin, &self.table[slot]);
                if current == K::NULL {
                    break;
                }
                if current == key {
                    return true;
                }
                let current_home = current.hash() & self.size_mask;
                if distance_from_slot(self.size_mask, current_home, slot) < distance {
                    break;
                }
                slot = (slot + 1) & self.size_mask;
                distance += 1;
            }

            if self.counter_check(tid, &pin, home, &stamps[..stamp_count]) {
                return false;
            }
            continue 'restart;
        }
    }

    fn add(&self, key: K, tid: usize) -> bool {
        let home = key.hash() & self.size_mask;
        let pin = ReclaimerPin::new(&self.reclaimer, tid);

        'restart: loop {
            let mut active = key;
            let mut last_region = usize::MAX;
            let mut region_stamp = 0usize;
            let mut bumped_region = false;
            let mut desc = self.kcas.create_descriptor(tid);

            let mut slot = home;
            let mut active_dist = 0;
            loop {
                let region = self.region_of(slot);
                if region != last_region {
                    last_region = region;
                    region_stamp = self.kcas.read_value(tid, &pin, &self.timestamps[region]);
                    bumped_region = false;
                }

                let current = self.kcas.read_value(tid, &pin, &self.table[slot]);
                if current == K::NULL {
                    desc.add_value(&self.table[slot], current, active);
                    if !bumped_region {
                        desc.add_value(&self.timestamps[region], region_stamp, region_stamp + 1);
                    }
                    if self.kcas.cas(tid, &pin, desc) {
                        return true;
                    }
                    continue 'restart;
                }

                if current == key {
                    // Resident already; the unsubmitted descriptor is freed.
                    return false;
                }

                // A concurrent shuffle moved the key we are displacing.
                if current == active {
                    continue 'restart;
                }

                let current_home = current.hash() & self.size_mask;
                let current_dist = distance_from_slot(self.size_mask, current_home, slot);
                if current_dist < active_dist {
                    desc.add_value(&self.table[slot], current, active);
                    if !bumped_region {
                        desc.add_value(&self.timestamps[region], region_stamp, region_stamp + 1);
                        bumped_region = true;
                    }
                    active = current;
                    active_dist = current_dist;
                }

                slot = (slot + 1) & self.size_mask;
                active_dist += 1;
            }
        }
    }

    fn remove(&self, key: K, tid: usize) -> bool {
        let home = key.hash() & self.size_mask;
        let pin = ReclaimerPin::new(&self.reclaimer, tid);

        'restart: loop {
            let mut stamps = [0usize; MAX_SNAPSHOTS];
            let mut stamp_count = 0;
            let mut last_region = usize::MAX;
            let mut desc = self.kcas.create_descriptor(tid);

            let mut slot = home;
            let mut distance = 0;
            loop {
                let region = self.region_of(slot);
                if region != last_region {
                    last_region = region;
                    assert!(stamp_count < MAX_SNAPSHOTS);
                    stamps[stamp_count] = self.kcas.read_value(tid, &pin, &self.timestamps[region]);
                    stamp_count += 1;
                }

                let current = self.kcas.read_value(tid, &pin, &self.table[slot]);
                if current == K::NULL {
                    break;
                }

                if current == key {
                    // Shuffle-back: walk the displaced run after the match,
                    // moving each member one slot earlier, then clear the
                    // final vacated slot. All committed as one descriptor.
                    let mut bumped_region = false;
                    let mut dest_slot = slot;
                    let mut dest_key = current;
                    let mut dest_stamp = stamps[stamp_count - 1];
                    let mut dest_region = usize::MAX;

                    let mut shuffle_slot = (dest_slot + 1) & self.size_mask;
                    loop {
                        let shuffle_region = self.region_of(shuffle_slot);
                        if dest_region != shuffle_region {
                            dest_region = shuffle_region;
                            dest_stamp =
                                self.kcas
                                    .read_value(tid, &pin, &self.timestamps[dest_region]);
                            bumped_region = false;
                        }

                        let shuffle_key =
                            self.kcas.read_value(tid, &pin, &self.table[shuffle_slot]);
                        if shuffle_key == K::NULL {
                            break;
                        }
                        let shuffle_home = shuffle_key.hash() & self.size_mask;
                        if distance_from_slot(self.size_mask, shuffle_home, shuffle_slot) == 0 {
                            break;
                        }

                        desc.add_value(&self.table[dest_slot], dest_key, shuffle_key);
                        if !bumped_region {
                            desc.add_value(
                                &self.timestamps[dest_region],
                                dest_stamp,
                                dest_stamp + 1,
                            );
                            bumped_region = true;
                        }

                        dest_key = shuffle_key;
                        dest_slot = shuffle_slot;
                        shuffle_slot = (shuffle_slot + 1) & self.size_mask;
                    }

                    if !bumped_region {
                        desc.add_value(&self.timestamps[dest_region], dest_stamp, dest_stamp + 1);
                    }
                    desc.add_value(&self.table[dest_slot], dest_key, K::NULL);
                    if self.kcas.cas(tid, &pin, desc) {
                        return true;
                    }
                    continue 'restart;
                }

                let current_home = current.hash() & self.size_mask;
                if distance_from_slot(self.size_mask, current_home, slot) < distance {
                    break;
                }
                slot = (slot + 1) & self.size_mask;
                distance += 1;
            }

            drop(desc);
            if self.counter_check(tid, &pin, home, &stamps[..stamp_count]) {
                return false;
            }
            continue 'restart;
        }
    }
}
