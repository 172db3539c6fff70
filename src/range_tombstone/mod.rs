// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Range deletions.
//!
//! A [`RangeTombstone`] deletes every version of every key in `[start, end)`
//! that is older than the tombstone. Data sources store their tombstones
//! fragmented (see [`fragment`]), so two tombstones of one source either
//! share the exact same bounds or do not overlap at all.

mod fragmenter;
mod iter;

pub use fragmenter::fragment;
pub use iter::{FragmentIter, TombstoneIterator};

use crate::{SeqNo, UserKey};
use std::cmp::Reverse;

/// A range tombstone that deletes all keys in `[start, end)` at a given sequence number.
///
/// Half-open interval: `start` is inclusive, `end` is exclusive.
/// A key `k` is covered iff `start <= k < end`.
///
/// The end key is never clipped to the boundaries of the data source
/// that stores the tombstone.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RangeTombstone {
    /// Inclusive start bound
    pub start: UserKey,

    /// Exclusive end bound
    pub end: UserKey,

    /// Sequence number at which this tombstone was written
    pub seqno: SeqNo,
}

impl RangeTombstone {
    /// Creates a new range tombstone for `[start, end)` at the given seqno.
    ///
    /// # Panics
    ///
    /// Panics if `start >= end`.
    pub fn new<K: Into<UserKey>>(start: K, end: K, seqno: SeqNo) -> Self {
        let (start, end) = (start.into(), end.into());
        assert!(start < end, "range tombstone start must be < end");
        Self { start, end, seqno }
    }

    /// Returns `true` if `key` is within `[start, end)`.
    #[must_use]
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.start.as_ref() <= key && key < self.end.as_ref()
    }

    /// Returns `true` if this tombstone is visible at the given read seqno.
    ///
    /// A tombstone is visible when `self.seqno <= read_seqno`.
    #[must_use]
    pub fn visible_at(&self, read_seqno: SeqNo) -> bool {
        self.seqno <= read_seqno
    }

    /// Returns `true` if this tombstone deletes a version written at `kv_seqno`.
    #[must_use]
    pub fn deletes(&self, kv_seqno: SeqNo) -> bool {
        kv_seqno < self.seqno
    }

    pub(crate) fn same_bounds(&self, other: &Self) -> bool {
        self.start == other.start && self.end == other.end
    }
}

/// Ordered by `(start asc, seqno desc, end asc)`.
impl Ord for RangeTombstone {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.start, Reverse(self.seqno), &self.end).cmp(&(
            &other.start,
            Reverse(other.seqno),
            &other.end,
        ))
    }
}

impl PartialOrd for RangeTombstone {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
