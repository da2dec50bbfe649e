//! A descriptor-based multi-word compare-and-swap engine.
//!
//! Callers build a [`KCasDescriptor`] listing `(slot, expected, new)`
//! triples over [`KCasEntry`] slots and submit it with [`KCas::cas`]. Reads
//! go through [`KCas::read_value`], which helps any in-progress descriptor
//! it encounters, so readers always observe linearised snapshots.
//!
//! A slot word is either a plain value (shifted left two bits) or a tagged
//! pointer to a descriptor. Installation uses RDCSS sub-descriptors so that
//! a descriptor can only be installed while its status word is still
//! undecided; this is what makes the rollback in phase two safe against
//! slots that have since been recycled to their old values. The operation
//! linearises at the CAS of the status word.
//!
//! Descriptors are reclaimed through the supplied reclaimer. Helpers only
//! dereference a descriptor inside a [`ReclaimerPin`], and a stalled helper
//! pins the epoch, so retirement by the submitting thread is safe.

use crate::key::SetKey;
use crate::reclaim::{Handle, Reclaimer, ReclaimerPin};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

mod tests;

/// Bound on the number of entries a single descriptor may carry.
pub const MAX_KCAS: usize = 3000;

const UNDECIDED: usize = 0;
const SUCCEEDED: usize = 1;
const FAILED: usize = 2;

const TAG_MASK: usize = 0b11;
const KCAS_TAG: usize = 0b01;
const RDCSS_TAG: usize = 0b10;

#[inline]
fn encode(word: usize) -> usize {
    debug_assert!(word <= usize::MAX >> 2);
    word << 2
}

#[inline]
fn decode(bits: usize) -> usize {
    bits >> 2
}

#[inline]
fn is_kcas(bits: usize) -> bool {
    bits & TAG_MASK == KCAS_TAG
}

#[inline]
fn is_rdcss(bits: usize) -> bool {
    bits & TAG_MASK == RDCSS_TAG
}

#[inline]
fn kcas_tagged(ptr: *mut KCasDescriptor) -> usize {
    ptr as usize | KCAS_TAG
}

#[inline]
fn kcas_ptr(bits: usize) -> *mut KCasDescriptor {
    (bits & !TAG_MASK) as *mut KCasDescriptor
}

#[inline]
fn rdcss_tagged(ptr: *mut RdcssDescriptor) -> usize {
    ptr as usize | RDCSS_TAG
}

#[inline]
fn rdcss_ptr(bits: usize) -> *mut RdcssDescriptor {
    (bits & !TAG_MASK) as *mut RdcssDescriptor
}

/// A slot the engine may operate on: a plain value or an encoded
/// descriptor reference, distinguished by the low tag bits.
pub struct KCasEntry<T: SetKey> {
    bits: AtomicUsize,
    _marker: PhantomData<T>,
}

impl<T: SetKey> KCasEntry<T> {
    pub fn new(value: T) -> Self {
        Self {
            bits: AtomicUsize::new(encode(value.into_word())),
            _marker: PhantomData,
        }
    }
}

struct Entry {
    addr: *const AtomicUsize,
    expected: usize,
    new: usize,
}

/// A multi-slot atomic update: `(slot, expected, new)` triples plus the
/// status word whose CAS linearises the update.
pub struct KCasDescriptor {
    status: AtomicUsize,
    entries: Vec<Entry>,
}

// Entry addresses point into tables that strictly outlive any descriptor
// retired against their reclaimer; destruction only drops the entry vector.
unsafe impl Send for KCasDescriptor {}
unsafe impl Sync for KCasDescriptor {}

impl KCasDescriptor {
    /// Appends one `(slot, expected, new)` triple.
    pub fn add_value<T: SetKey>(&mut self, entry: &KCasEntry<T>, expected: T, new: T) {
        assert!(self.entries.len() < MAX_KCAS, "descriptor entry bound exceeded");
        self.entries.push(Entry {
            addr: &entry.bits,
            expected: encode(expected.into_word()),
            new: encode(new.into_word()),
        });
    }
}

struct RdcssDescriptor {
    status_addr: *const AtomicUsize,
    expected_status: usize,
    data_addr: *const AtomicUsize,
    expected: usize,
    new: usize,
}

unsafe impl Send for RdcssDescriptor {}
unsafe impl Sync for RdcssDescriptor {}

/// The K-CAS engine. Stateless apart from its reclaimer binding; all
/// per-operation state lives in descriptors.
pub struct KCas<R: Reclaimer> {
    _marker: PhantomData<R>,
}

impl<R: Reclaimer> KCas<R> {
    pub fn new(_threads: usize) -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    pub fn create_descriptor(&self, _tid: usize) -> Box<KCasDescriptor> {
        Box::new(KCasDescriptor {
            status: AtomicUsize::new(UNDECIDED),
            entries: Vec::new(),
        })
    }

    /// Reads the value of `entry`, helping any descriptor found there first.
    pub fn read_value<T: SetKey>(
        &self,
        tid: usize,
        pin: &ReclaimerPin<'_, R>,
        entry: &KCasEntry<T>,
    ) -> T {
        loop {
            let bits = entry.bits.load(Ordering::Acquire);
            if is_rdcss(bits) {
                unsafe { Self::rdcss_complete(rdcss_ptr(bits)) };
            } else if is_kcas(bits) {
                unsafe { self.help(kcas_ptr(bits), tid, pin) };
            } else {
                return T::from_word(decode(bits));
            }
        }
    }

    /// Submits a descriptor. Returns true when every slot held its expected
    /// value and the new values were installed atomically. The descriptor
    /// is retired through the reclaimer either way; dropping an unsubmitted
    /// descriptor is the failure-path `free_descriptor`.
    pub fn cas(&self, tid: usize, pin: &ReclaimerPin<'_, R>, mut desc: Box<KCasDescriptor>) -> bool {
        // Address order keeps concurrent descriptors from installing over
        // each other in a cycle.
        desc.entries.sort_unstable_by_key(|entry| entry.addr as usize);
        debug_assert!(desc
            .entries
            .windows(2)
            .all(|pair| pair[0].addr != pair[1].addr));

        let ptr = Box::into_raw(desc);
        let succeeded = unsafe { self.help(ptr, tid, pin) };

        let mut handle = pin.get_rec();
        handle.set(ptr as usize);
        unsafe { pin.retire::<KCasDescriptor>(&handle) };
        succeeded
    }

    /// Drives `desc` to completion: installs it into every listed slot via
    /// RDCSS, decides the status word, then detaches it, writing the new
    /// values on success or rolling the expected values back on failure.
    /// Runs identically for the submitting thread and for helpers.
    unsafe fn help(&self, desc_ptr: *mut KCasDescriptor, tid: usize, pin: &ReclaimerPin<'_, R>) -> bool {
        let desc = &*desc_ptr;
        let tagged = kcas_tagged(desc_ptr);

        'decide: {
            if desc.status.load(Ordering::Acquire) != UNDECIDED {
                break 'decide;
            }
            for entry in &desc.entries {
                loop {
                    if desc.status.load(Ordering::Acquire) != UNDECIDED {
                        break 'decide;
                    }
                    let observed = self.rdcss(
                        &desc.status,
                        UNDECIDED,
                        entry.addr,
                        entry.expected,
                        tagged,
                        tid,
                        pin,
                    );
                    if observed == entry.expected || observed == tagged {
                        break;
                    }
                    if is_kcas(observed) {
                        self.help(kcas_ptr(observed), tid, pin);
                        continue;
                    }
                    // A conflicting plain value: the operation fails.
                    let _ = desc.status.compare_exchange(
                        UNDECIDED,
                        FAILED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    break 'decide;
                }
            }
            let _ = desc.status.compare_exchange(
                UNDECIDED,
                SUCCEEDED,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }

        let succeeded = desc.status.load(Ordering::Acquire) == SUCCEEDED;
        for entry in &desc.entries {
            let replacement = if succeeded { entry.new } else { entry.expected };
            let _ = (*entry.addr).compare_exchange(
                tagged,
                replacement,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        succeeded
    }

    /// Restricted double-compare single-swap: installs `new` into
    /// `data_addr` only if it holds `expected` *and* the status word still
    /// holds `expected_status`. Returns the observed slot value; a return
    /// of `expected` means the install happened.
    unsafe fn rdcss(
        &self,
        status: &AtomicUsize,
        expected_status: usize,
        data_addr: *const AtomicUsize,
        expected: usize,
        new: usize,
        _tid: usize,
        pin: &ReclaimerPin<'_, R>,
    ) -> usize {
        let rd = pin.reclaimer().alloc(RdcssDescriptor {
            status_addr: status,
            expected_status,
            data_addr,
            expected,
            new,
        });
        let tagged = rdcss_tagged(rd);
        loop {
            match (*data_addr).compare_exchange(expected, tagged, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    Self::rdcss_complete(rd);
                    let mut handle = pin.get_rec();
                    handle.set(rd as usize);
                    pin.retire::<RdcssDescriptor>(&handle);
                    return expected;
                }
                Err(observed) if is_rdcss(observed) => {
                    Self::rdcss_complete(rdcss_ptr(observed));
                }
                Err(observed) => {
                    // Never published; free immediately.
                    pin.reclaimer().dealloc(rd);
                    return observed;
                }
            }
        }
    }

    /// Resolves an installed RDCSS descriptor: commits `new` if the status
    /// word is still undecided, otherwise restores the expected value.
    unsafe fn rdcss_complete(rd: *mut RdcssDescriptor) {
        let tagged = rdcss_tagged(rd);
        let rd = &*rd;
        let decided = (*rd.status_addr).load(Ordering::Acquire);
        let replacement = if decided == rd.expected_status {
            rd.new
        } else {
            rd.expected
        };
        let _ = (*rd.data_addr).compare_exchange(
            tagged,
            replacement,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}
