// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::RangeTombstone;
use crate::SeqNo;
use std::sync::Arc;

/// Seekable view over the (fragmented) range tombstones of one data source
pub trait TombstoneIterator {
    /// Returns the newest tombstone visible at `snapshot` that contains `key`
    /// or, if there is none, the first visible one that starts after `key`.
    fn seek_ge(&mut self, key: &[u8], snapshot: SeqNo) -> Option<RangeTombstone>;

    /// Returns the newest tombstone visible at `snapshot` that contains `key`
    /// or, if there is none, the last visible one that ends at or before `key`.
    fn seek_le(&mut self, key: &[u8], snapshot: SeqNo) -> Option<RangeTombstone>;

    /// Releases the iterator.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the iterator hit an error at some point.
    fn close(&mut self) -> crate::Result<()> {
        Ok(())
    }
}

/// Iterator over a sorted list of tombstone fragments
///
/// The fragments must be sorted by `(start asc, seqno desc)` and must not
/// partially overlap, which is what [`super::fragment`] produces.
#[derive(Clone, Debug)]
pub struct FragmentIter {
    fragments: Arc<[RangeTombstone]>,
}

impl FragmentIter {
    /// Creates a fragment iterator.
    #[must_use]
    pub fn new(fragments: Arc<[RangeTombstone]>) -> Self {
        Self { fragments }
    }

    /// Finds the bounds of the group of fragments with the same bounds
    /// as the fragment at `idx`.
    fn group_at(&self, idx: usize) -> (usize, usize) {
        let Some(pivot) = self.fragments.get(idx) else {
            return (idx, idx);
        };

        let lo = self
            .fragments
            .get(..idx)
            .unwrap_or_default()
            .iter()
            .rev()
            .take_while(|t| t.same_bounds(pivot))
            .count();

        let hi = self
            .fragments
            .get(idx..)
            .unwrap_or_default()
            .iter()
            .take_while(|t| t.same_bounds(pivot))
            .count();

        (idx - lo, idx + hi)
    }

    /// Newest fragment of the group `[lo, hi)` visible at `snapshot`.
    ///
    /// Groups are sorted by seqno descending, so the first visible one wins.
    fn newest_visible(&self, lo: usize, hi: usize, snapshot: SeqNo) -> Option<RangeTombstone> {
        self.fragments
            .get(lo..hi)?
            .iter()
            .find(|t| t.visible_at(snapshot))
            .cloned()
    }
}

impl TombstoneIterator for FragmentIter {
    fn seek_ge(&mut self, key: &[u8], snapshot: SeqNo) -> Option<RangeTombstone> {
        // Fragments do not partially overlap, so end keys are sorted as well
        let mut idx = self.fragments.partition_point(|t| t.end.as_ref() <= key);

        while idx < self.fragments.len() {
            let (lo, hi) = self.group_at(idx);

            if let Some(t) = self.newest_visible(lo, hi, snapshot) {
                return Some(t);
            }

            idx = hi;
        }

        None
    }

    fn seek_le(&mut self, key: &[u8], snapshot: SeqNo) -> Option<RangeTombstone> {
        let mut end = self.fragments.partition_point(|t| t.start.as_ref() <= key);

        while end > 0 {
            let (lo, hi) = self.group_at(end - 1);

            if let Some(t) = self.newest_visible(lo, hi, snapshot) {
                return Some(t);
            }

            end = lo;
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range_tombstone::fragment;
    use test_log::test;

    fn iter(tombstones: Vec<RangeTombstone>) -> FragmentIter {
        FragmentIter::new(fragment(tombstones).into())
    }

    fn rt(start: &str, end: &str, seqno: u64) -> RangeTombstone {
        RangeTombstone::new(start, end, seqno)
    }

    #[test]
    fn fragment_iter_empty() {
        let mut iter = iter(vec![]);
        assert_eq!(None, iter.seek_ge(b"a", SeqNo::MAX));
        assert_eq!(None, iter.seek_le(b"a", SeqNo::MAX));
    }

    #[test]
    fn fragment_iter_seek_ge() {
        let mut iter = iter(vec![rt("b", "d", 5), rt("f", "h", 7)]);

        assert_eq!(Some(rt("b", "d", 5)), iter.seek_ge(b"a", SeqNo::MAX));
        assert_eq!(Some(rt("b", "d", 5)), iter.seek_ge(b"c", SeqNo::MAX));
        assert_eq!(Some(rt("f", "h", 7)), iter.seek_ge(b"d", SeqNo::MAX));
        assert_eq!(Some(rt("f", "h", 7)), iter.seek_ge(b"g", SeqNo::MAX));
        assert_eq!(None, iter.seek_ge(b"h", SeqNo::MAX));
    }

    #[test]
    fn fragment_iter_seek_le() {
        let mut iter = iter(vec![rt("b", "d", 5), rt("f", "h", 7)]);

        assert_eq!(None, iter.seek_le(b"a", SeqNo::MAX));
        assert_eq!(Some(rt("b", "d", 5)), iter.seek_le(b"b", SeqNo::MAX));
        assert_eq!(Some(rt("b", "d", 5)), iter.seek_le(b"e", SeqNo::MAX));
        assert_eq!(Some(rt("f", "h", 7)), iter.seek_le(b"g", SeqNo::MAX));
        assert_eq!(Some(rt("f", "h", 7)), iter.seek_le(b"z", SeqNo::MAX));
    }

    #[test]
    fn fragment_iter_newest_visible() {
        let mut iter = iter(vec![rt("a", "e", 3), rt("c", "g", 8)]);

        assert_eq!(Some(rt("c", "e", 8)), iter.seek_ge(b"d", SeqNo::MAX));
        assert_eq!(Some(rt("c", "e", 3)), iter.seek_ge(b"d", 7));
        assert_eq!(Some(rt("c", "e", 3)), iter.seek_le(b"d", 7));
        assert_eq!(Some(rt("a", "c", 3)), iter.seek_le(b"b", SeqNo::MAX));
    }

    #[test]
    fn fragment_iter_skips_invisible_groups() {
        let mut iter = iter(vec![rt("a", "c", 10), rt("e", "g", 2)]);

        assert_eq!(Some(rt("e", "g", 2)), iter.seek_ge(b"a", 5));
        assert_eq!(None, iter.seek_ge(b"a", 1));
        assert_eq!(None, iter.seek_le(b"d", 5));
        assert_eq!(Some(rt("e", "g", 2)), iter.seek_le(b"z", 5));
    }
}
