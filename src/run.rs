// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    internal_iter::{Bounds, InternalIterator},
    range_tombstone::{fragment, FragmentIter, RangeTombstone},
    InternalValue, SeqNo, UserKey,
};
use std::sync::Arc;

/// Immutable, sorted list of internal values, plus range tombstones
///
/// A run plays the role of one sorted file: it is one level of a merging
/// iterator. Each user key appears at most once.
#[derive(Debug)]
pub struct SortedRun {
    items: Vec<InternalValue>,
    tombstones: Arc<[RangeTombstone]>,
    largest_user_key: Option<UserKey>,
}

impl SortedRun {
    /// Creates a run from items sorted by internal key.
    ///
    /// The tombstones are fragmented; they may extend past the last item.
    ///
    /// # Panics
    ///
    /// Panics if the items are not sorted by user key or contain the
    /// same user key twice.
    #[must_use]
    pub fn new(items: Vec<InternalValue>, tombstones: Vec<RangeTombstone>) -> Self {
        for pair in items.windows(2) {
            if let [a, b] = pair {
                assert!(
                    a.key.user_key < b.key.user_key,
                    "run items must be sorted by user key without duplicates: {a:?} >= {b:?}",
                );
            }
        }

        Self {
            items,
            tombstones: fragment(tombstones).into(),
            largest_user_key: None,
        }
    }

    /// Sets the largest user key the run may report.
    ///
    /// Merging iterators never skip past this key because of a tombstone
    /// of this run.
    #[must_use]
    pub fn with_largest_user_key(mut self, key: UserKey) -> Self {
        self.largest_user_key = Some(key);
        self
    }

    /// Returns the boundary key, if any.
    #[must_use]
    pub fn largest_user_key(&self) -> Option<&UserKey> {
        self.largest_user_key.as_ref()
    }

    /// Number of point entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the run contains neither entries nor tombstones.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.tombstones.is_empty()
    }

    /// Returns the (fragmented) range tombstones.
    #[must_use]
    pub fn tombstones(&self) -> &[RangeTombstone] {
        &self.tombstones
    }

    /// Returns the highest sequence number in the run.
    #[must_use]
    pub fn highest_seqno(&self) -> Option<SeqNo> {
        self.items
            .iter()
            .map(|x| x.key.seqno)
            .chain(self.tombstones.iter().map(|t| t.seqno))
            .max()
    }

    /// Returns an iterator over the point entries.
    #[must_use]
    pub fn iter(self: &Arc<Self>) -> RunIter {
        RunIter {
            run: self.clone(),
            pos: None,
            bounds: Bounds::default(),
        }
    }

    /// Returns an iterator over the range tombstones, if there are any.
    #[must_use]
    pub fn tombstone_iter(&self) -> Option<FragmentIter> {
        if self.tombstones.is_empty() {
            None
        } else {
            Some(FragmentIter::new(self.tombstones.clone()))
        }
    }
}

/// Cursor over a [`SortedRun`]
pub struct RunIter {
    run: Arc<SortedRun>,
    pos: Option<usize>,
    bounds: Bounds,
}

impl RunIter {
    fn land(&mut self, idx: Option<usize>) -> Option<InternalValue> {
        self.pos = idx.filter(|&idx| {
            self.run
                .items
                .get(idx)
                .is_some_and(|item| self.bounds.contains(&item.key.user_key))
        });

        self.pos.and_then(|idx| self.run.items.get(idx)).cloned()
    }

    fn lower_bound(&self, key: &[u8]) -> usize {
        self.run
            .items
            .partition_point(|item| item.key.user_key.as_ref() < key)
    }
}

impl InternalIterator for RunIter {
    fn seek_ge(&mut self, key: &[u8]) -> Option<InternalValue> {
        let key = self.bounds.clamp_seek_ge(key);
        let idx = self.lower_bound(key);
        self.land(Some(idx))
    }

    fn seek_lt(&mut self, key: &[u8]) -> Option<InternalValue> {
        let key = self.bounds.clamp_seek_lt(key);
        let idx = self.lower_bound(key).checked_sub(1);
        self.land(idx)
    }

    fn first(&mut self) -> Option<InternalValue> {
        let idx = match &self.bounds.lower {
            Some(lo) => self.lower_bound(lo),
            None => 0,
        };
        self.land(Some(idx))
    }

    fn last(&mut self) -> Option<InternalValue> {
        let idx = match &self.bounds.upper {
            Some(hi) => self.lower_bound(hi),
            None => self.run.items.len(),
        };
        self.land(idx.checked_sub(1))
    }

    fn next(&mut self) -> Option<InternalValue> {
        let idx = self.pos?.checked_add(1);
        self.land(idx)
    }

    fn prev(&mut self) -> Option<InternalValue> {
        let idx = self.pos?.checked_sub(1);
        self.land(idx)
    }

    fn set_bounds(&mut self, lower: Option<UserKey>, upper: Option<UserKey>) {
        self.bounds = Bounds::new(lower, upper);
        self.pos = None;
    }
}
