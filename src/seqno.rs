// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::sync::{
    atomic::{
        AtomicU64,
        Ordering::{AcqRel, Acquire, Release},
    },
    Arc,
};

/// Sequence number - a monotonically increasing counter
///
/// Every mutation of a batch is stamped with its own sequence number.
///
/// A value with a higher sequence number shadows an item with the
/// same key and lower sequence number. This enables MVCC.
pub type SeqNo = u64;

/// Sentinel sequence number
///
/// Used for exclusive key boundaries and for snapshots that see everything.
pub const SEQNO_MAX: SeqNo = SeqNo::MAX;

/// Thread-safe sequence number counter
///
/// The counter holds the *highest* sequence number that was handed out
/// (or published, when used as the visibility counter), starting at 0.
/// Sequence number 0 is never assigned to a write.
///
/// Cloning the counter yields a handle to the same atomic, so the same
/// counter can be shared between a commit pipeline and its environment.
///
/// # Examples
///
/// ```
/// # use lsm_core::SequenceNumberCounter;
/// let seqno = SequenceNumberCounter::default();
///
/// // Reserve 3 sequence numbers, returns the first one
/// assert_eq!(1, seqno.reserve(3));
/// assert_eq!(3, seqno.get());
///
/// assert_eq!(4, seqno.reserve(1));
/// ```
#[derive(Clone, Default, Debug)]
pub struct SequenceNumberCounter(Arc<AtomicU64>);

impl SequenceNumberCounter {
    /// Creates a new counter, setting it to some previous value
    #[must_use]
    pub fn new(prev: SeqNo) -> Self {
        Self(Arc::new(AtomicU64::new(prev)))
    }

    /// Gets the current (highest) sequence number.
    #[must_use]
    pub fn get(&self) -> SeqNo {
        self.0.load(Acquire)
    }

    /// Reserves `count` consecutive sequence numbers, returning the first one.
    ///
    /// # Panics
    ///
    /// Panics if `count` is 0 or the sequence number space is exhausted.
    #[must_use]
    pub fn reserve(&self, count: u64) -> SeqNo {
        assert!(count > 0, "cannot reserve zero sequence numbers");

        let prev = self.0.fetch_add(count, AcqRel);

        // The MSB is reserved, which gives us 63-bit sequence numbers
        assert!(
            prev + count < 0x8000_0000_0000_0000,
            "Ran out of sequence numbers"
        );

        prev + 1
    }

    /// Sets the sequence number.
    pub fn set(&self, seqno: SeqNo) {
        self.0.store(seqno, Release);
    }

    /// Maximizes the sequence number, returning the previous value.
    pub fn fetch_max(&self, seqno: SeqNo) -> SeqNo {
        self.0.fetch_max(seqno, AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::SequenceNumberCounter;
    use test_log::test;

    #[test]
    fn seqno_reserve_is_contiguous() {
        let counter = SequenceNumberCounter::default();
        assert_eq!(1, counter.reserve(1));
        assert_eq!(2, counter.reserve(5));
        assert_eq!(7, counter.reserve(1));
        assert_eq!(7, counter.get());
    }

    #[test]
    fn seqno_clones_share_state() {
        let counter = SequenceNumberCounter::default();
        let handle = counter.clone();
        let _ = counter.reserve(10);
        assert_eq!(10, handle.get());
    }

    #[test]
    fn seqno_fetch_max_never_lowers() {
        let counter = SequenceNumberCounter::new(10);
        assert_eq!(10, counter.fetch_max(5));
        assert_eq!(10, counter.get());
        assert_eq!(10, counter.fetch_max(12));
        assert_eq!(12, counter.get());
    }

    #[test]
    fn not_max_seqno() {
        let counter = SequenceNumberCounter::default();
        counter.set(0x7FFF_FFFF_FFFF_FFFE);
        let _ = counter.reserve(1);
    }

    #[test]
    #[should_panic = "Ran out of sequence numbers"]
    fn max_seqno() {
        let counter = SequenceNumberCounter::default();
        counter.set(0x7FFF_FFFF_FFFF_FFFF);
        let _ = counter.reserve(1);
    }

    #[test]
    #[should_panic = "cannot reserve zero sequence numbers"]
    fn reserve_zero() {
        let counter = SequenceNumberCounter::default();
        let _ = counter.reserve(0);
    }
}
