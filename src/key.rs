//! Key traits shared by every set implementation.
//!
//! Keys occupy a single machine word so that table slots can be plain
//! atomics. The top two bits of the word are reserved for the tag encodings
//! used by the K-CAS engine and the pointer-tagging sets, which is why the
//! null sentinel sits at `usize::MAX >> 2` rather than `usize::MAX`.

/// A set key: one machine word with a total hash and a reserved sentinel.
///
/// `NULL` marks empty slots and must never be used as a live key.
pub trait SetKey: Copy + Eq + Send + Sync + 'static {
    /// The reserved empty-slot sentinel.
    const NULL: Self;

    fn hash(self) -> usize;

    fn into_word(self) -> usize;

    fn from_word(word: usize) -> Self;
}

/// Largest word value that survives the two-bit tag reservation.
pub const MAX_KEY_WORD: usize = usize::MAX >> 2;

impl SetKey for usize {
    const NULL: Self = MAX_KEY_WORD;

    /// 64-bit multiply-xor finalizer. Benchmark keys are dense small
    /// integers; an identity hash would serialise every algorithm on the
    /// same probe neighbourhoods.
    #[inline]
    fn hash(self) -> usize {
        let mut z = self as u64;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        (z ^ (z >> 31)) as usize
    }

    #[inline]
    fn into_word(self) -> usize {
        self
    }

    #[inline]
    fn from_word(word: usize) -> Self {
        word
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_round_trips_through_word() {
        let w = <usize as SetKey>::NULL.into_word();
        assert_eq!(<usize as SetKey>::from_word(w), <usize as SetKey>::NULL);
        assert!(w <= MAX_KEY_WORD);
    }

    #[test]
    fn hash_spreads_dense_keys() {
        let a = 1usize.hash() & 1023;
        let b = 2usize.hash() & 1023;
        let c = 3usize.hash() & 1023;
        assert!(!(a == b && b == c));
    }
}
