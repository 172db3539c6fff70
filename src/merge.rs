// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Multi-way merge over the levels of the read path.
//!
//! A [`MergingIter`] combines N [`InternalIterator`]s, ordered newest to oldest,
//! into a single iterator in internal key order. Entries newer than the read
//! snapshot are skipped, and so are entries deleted by a range tombstone.
//!
//! Range tombstones of newer levels shadow *every* key of older levels they
//! contain (a newer level only holds newer versions of a key than an older
//! level). Range tombstones of a level only delete the older versions in
//! that same level.
//!
//! Instead of stepping over shadowed keys one by one, the iterator re-seeks
//! all older levels to the end (or start, in reverse) of the shadowing tombstone.

use crate::{
    internal_iter::InternalIterator,
    range_tombstone::{RangeTombstone, TombstoneIterator},
    InternalKey, InternalValue, SeqNo, UserKey, SEQNO_MAX,
};
use interval_heap::IntervalHeap as Heap;

/// A heap entry: the current key of some level
#[derive(Clone, Eq)]
struct HeapItem {
    level: usize,
    key: InternalKey,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

// NOTE: Equal keys are ordered by level, so newer levels win ties in forward direction
impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.key, self.level).cmp(&(&other.key, other.level))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Direction {
    Unpositioned,
    Forward,
    Reverse,
}

/// Lazily positioned tombstone cursor of one level
#[derive(Clone, Debug)]
enum TombstoneCursor {
    /// Not positioned since the last seek of the level
    Unpositioned,

    /// Positioned at a tombstone at-or-past (forward) or at-or-before (reverse) the current key
    At(RangeTombstone),

    /// No more visible tombstones in the current direction
    Exhausted,
}

impl TombstoneCursor {
    fn from_seek(tombstone: Option<RangeTombstone>) -> Self {
        tombstone.map_or(Self::Exhausted, Self::At)
    }

    fn get(&self) -> Option<&RangeTombstone> {
        match self {
            Self::At(tombstone) => Some(tombstone),
            Self::Unpositioned | Self::Exhausted => None,
        }
    }
}

/// One input of a [`MergingIter`]
pub struct MergingIterLevel<'a> {
    iter: Box<dyn InternalIterator + 'a>,
    tombstones: Option<Box<dyn TombstoneIterator + 'a>>,
    largest_user_key: Option<UserKey>,

    current: Option<InternalValue>,
    tombstone: TombstoneCursor,
}

impl<'a> MergingIterLevel<'a> {
    /// Creates a level from a point iterator.
    #[must_use]
    pub fn new(iter: Box<dyn InternalIterator + 'a>) -> Self {
        Self {
            iter,
            tombstones: None,
            largest_user_key: None,
            current: None,
            tombstone: TombstoneCursor::Unpositioned,
        }
    }

    /// Attaches the range tombstones of the level.
    #[must_use]
    pub fn with_tombstones(mut self, tombstones: Box<dyn TombstoneIterator + 'a>) -> Self {
        self.tombstones = Some(tombstones);
        self
    }

    /// Sets the largest user key the level may report.
    ///
    /// Tombstone driven seeks of older levels are clamped to this key.
    #[must_use]
    pub fn with_largest_user_key(mut self, key: Option<UserKey>) -> Self {
        self.largest_user_key = key;
        self
    }
}

/// Merges multiple levels into one sorted view, honouring a snapshot
/// and range tombstones
///
/// Levels must be ordered newest first: level 0 is the newest.
///
/// Point tombstones are *not* interpreted; they are returned like any other
/// entry, because they can still shadow entries of the caller's other inputs.
/// See [`crate::MvccStream`] for a user facing view.
///
/// Errors of the underlying iterators stop the iteration; check
/// [`InternalIterator::error`] after getting `None`.
pub struct MergingIter<'a> {
    levels: Vec<MergingIterLevel<'a>>,
    snapshot: SeqNo,
    direction: Direction,

    /// Current keys of all live levels, except the top one
    heap: Heap<HeapItem>,

    /// Smallest (forward) or largest (reverse) current key
    top: Option<HeapItem>,

    /// Level whose iterator stopped with an error
    err_level: Option<usize>,

    prefix: Option<UserKey>,
    closed: bool,
}

impl<'a> MergingIter<'a> {
    /// Creates a merging iterator that sees everything.
    #[must_use]
    pub fn new(levels: Vec<MergingIterLevel<'a>>) -> Self {
        Self::with_snapshot(levels, SEQNO_MAX)
    }

    /// Creates a merging iterator that only returns entries with `seqno <= snapshot`.
    #[must_use]
    pub fn with_snapshot(levels: Vec<MergingIterLevel<'a>>, snapshot: SeqNo) -> Self {
        let heap = Heap::with_capacity(levels.len());

        Self {
            levels,
            snapshot,
            direction: Direction::Unpositioned,
            heap,
            top: None,
            err_level: None,
            prefix: None,
            closed: false,
        }
    }

    /// Snapshot the iterator reads at.
    #[must_use]
    pub fn snapshot(&self) -> SeqNo {
        self.snapshot
    }

    /// Number of levels.
    #[must_use]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn assert_open(&self) {
        assert!(!self.closed, "iterator used after close");
    }

    fn heap_len(&self) -> usize {
        self.heap.len() + usize::from(self.top.is_some())
    }

    /// Pops the heap top for the current direction if it is not materialized.
    fn settle(&mut self) {
        if self.top.is_none() {
            self.top = match self.direction {
                Direction::Reverse => self.heap.pop_max(),
                Direction::Forward | Direction::Unpositioned => self.heap.pop_min(),
            };
        }
    }

    fn top_item(&mut self) -> Option<HeapItem> {
        self.settle();
        self.top.clone()
    }

    fn init_heap(&mut self) {
        self.heap = Heap::with_capacity(self.levels.len());
        self.top = None;

        for (level, l) in self.levels.iter().enumerate() {
            if let Some(item) = &l.current {
                self.heap.push(HeapItem {
                    level,
                    key: item.key.clone(),
                });
            } else if self.err_level.is_none() && l.iter.error().is_some() {
                log::debug!("merging iterator stopped: level {level} failed to position");
                self.err_level = Some(level);
            }
        }

        self.settle();
    }

    fn init_min_heap(&mut self) {
        self.direction = Direction::Forward;
        self.init_heap();
        self.init_min_tombstones(None);
    }

    fn init_max_heap(&mut self) {
        self.direction = Direction::Reverse;
        self.init_heap();
        self.init_max_tombstones(None);
    }

    /// Positions the tombstone cursors of the levels that became newer-or-equal
    /// to the top level since `old_top`.
    #[allow(clippy::indexing_slicing)]
    fn init_min_tombstones(&mut self, old_top: Option<usize>) {
        let Some(top) = self.top.clone() else {
            return;
        };

        for level in old_top.map_or(0, |l| l + 1)..=top.level {
            let l = &mut self.levels[level];

            if let Some(tombstones) = &mut l.tombstones {
                l.tombstone =
                    TombstoneCursor::from_seek(tombstones.seek_ge(&top.key.user_key, self.snapshot));
            }
        }
    }

    #[allow(clippy::indexing_slicing)]
    fn init_max_tombstones(&mut self, old_top: Option<usize>) {
        let Some(top) = self.top.clone() else {
            return;
        };

        for level in old_top.map_or(0, |l| l + 1)..=top.level {
            let l = &mut self.levels[level];

            if let Some(tombstones) = &mut l.tombstones {
                l.tombstone =
                    TombstoneCursor::from_seek(tombstones.seek_le(&top.key.user_key, self.snapshot));
            }
        }
    }

    /// Realigns all levels to the entries after the current key, then
    /// rebuilds the heap as a min-heap.
    #[allow(clippy::indexing_slicing)]
    fn switch_to_min_heap(&mut self) {
        let Some(top) = self.top_item() else {
            self.first_internal();
            return;
        };

        // NOTE: Levels other than the top one are positioned *before* the
        // current key, so they need to be moved past it
        for (level, l) in self.levels.iter_mut().enumerate() {
            if level == top.level {
                continue;
            }

            if l.current.is_none() {
                l.current = l.iter.first();
            }

            while let Some(item) = &l.current {
                if top.key < item.key {
                    break;
                }
                l.current = l.iter.next();
            }
        }

        let cur = &mut self.levels[top.level];
        cur.current = cur.iter.next();

        self.init_min_heap();
    }

    /// Realigns all levels to the entries before the current key, then
    /// rebuilds the heap as a max-heap.
    #[allow(clippy::indexing_slicing)]
    fn switch_to_max_heap(&mut self) {
        let Some(top) = self.top_item() else {
            self.last_internal();
            return;
        };

        for (level, l) in self.levels.iter_mut().enumerate() {
            if level == top.level {
                continue;
            }

            if l.current.is_none() {
                l.current = l.iter.last();
            }

            while let Some(item) = &l.current {
                if top.key > item.key {
                    break;
                }
                l.current = l.iter.prev();
            }
        }

        let cur = &mut self.levels[top.level];
        cur.current = cur.iter.prev();

        self.init_max_heap();
    }

    /// Advances the level at the top of the heap.
    #[allow(clippy::indexing_slicing)]
    fn next_entry(&mut self) {
        let Some(top) = self.top.take() else {
            return;
        };

        let l = &mut self.levels[top.level];
        l.current = l.iter.next();

        if let Some(item) = &l.current {
            self.heap.push(HeapItem {
                level: top.level,
                key: item.key.clone(),
            });
        } else if l.iter.error().is_some() {
            log::debug!("merging iterator stopped: level {} failed", top.level);
            self.err_level = Some(top.level);
            self.top = Some(top);
            return;
        }

        self.settle();
        self.init_min_tombstones(Some(top.level));
    }

    /// Moves the level at the top of the heap backwards.
    #[allow(clippy::indexing_slicing)]
    fn prev_entry(&mut self) {
        let Some(top) = self.top.take() else {
            return;
        };

        let l = &mut self.levels[top.level];
        l.current = l.iter.prev();

        if let Some(item) = &l.current {
            self.heap.push(HeapItem {
                level: top.level,
                key: item.key.clone(),
            });
        } else if l.iter.error().is_some() {
            log::debug!("merging iterator stopped: level {} failed", top.level);
            self.err_level = Some(top.level);
            self.top = Some(top);
            return;
        }

        self.settle();
        self.init_max_tombstones(Some(top.level));
    }

    /// Checks whether the top entry is deleted by a range tombstone, and
    /// moves past it if so.
    #[allow(clippy::indexing_slicing)]
    fn is_next_entry_deleted(&mut self, item: &HeapItem) -> bool {
        let key = &item.key.user_key;

        for level in 0..=item.level {
            let snapshot = self.snapshot;
            let l = &mut self.levels[level];

            let Some(tombstones) = &mut l.tombstones else {
                continue;
            };
            let Some(tombstone) = l.tombstone.get() else {
                continue;
            };

            if tombstone.end <= *key {
                // NOTE: The level's tombstone cursor lags behind the current key
                l.tombstone = TombstoneCursor::from_seek(tombstones.seek_ge(key, snapshot));
            }

            let Some(tombstone) = l.tombstone.get() else {
                continue;
            };

            if tombstone.contains_key(key) {
                if level < item.level {
                    let end = tombstone.end.clone();
                    self.seek_ge_internal(end, item.level);
                    return true;
                }

                if tombstone.deletes(item.key.seqno) {
                    self.next_entry();
                    return true;
                }
            }
        }

        false
    }

    #[allow(clippy::indexing_slicing)]
    fn is_prev_entry_deleted(&mut self, item: &HeapItem) -> bool {
        let key = &item.key.user_key;

        for level in 0..=item.level {
            let snapshot = self.snapshot;
            let l = &mut self.levels[level];

            let Some(tombstones) = &mut l.tombstones else {
                continue;
            };
            let Some(tombstone) = l.tombstone.get() else {
                continue;
            };

            if *key < tombstone.start {
                l.tombstone = TombstoneCursor::from_seek(tombstones.seek_le(key, snapshot));
            }

            let Some(tombstone) = l.tombstone.get() else {
                continue;
            };

            if tombstone.contains_key(key) {
                if level < item.level {
                    let start = tombstone.start.clone();
                    self.seek_lt_internal(start, item.level);
                    return true;
                }

                if tombstone.deletes(item.key.seqno) {
                    self.prev_entry();
                    return true;
                }
            }
        }

        false
    }

    #[allow(clippy::indexing_slicing)]
    fn current_value(&self, item: &HeapItem) -> Option<InternalValue> {
        self.levels[item.level].current.clone()
    }

    fn find_next_entry(&mut self) -> Option<InternalValue> {
        while self.err_level.is_none() {
            let item = self.top_item()?;

            if self.is_next_entry_deleted(&item) {
                continue;
            }

            if item.key.is_visible(self.snapshot) {
                return self.current_value(&item);
            }

            self.next_entry();
        }

        None
    }

    fn find_prev_entry(&mut self) -> Option<InternalValue> {
        while self.err_level.is_none() {
            let item = self.top_item()?;

            if self.is_prev_entry_deleted(&item) {
                continue;
            }

            if item.key.is_visible(self.snapshot) {
                return self.current_value(&item);
            }

            self.prev_entry();
        }

        None
    }

    /// Seeks the levels `start_level..` to `key`, raising the seek key for
    /// older levels whenever a level has a tombstone containing it.
    fn seek_ge_internal(&mut self, mut key: UserKey, start_level: usize) {
        for l in self.levels.iter_mut().skip(start_level) {
            l.current = match &self.prefix {
                Some(prefix) => l.iter.seek_prefix_ge(prefix, &key),
                None => l.iter.seek_ge(&key),
            };
            l.tombstone = TombstoneCursor::Unpositioned;

            if let Some(tombstones) = &mut l.tombstones {
                if let Some(tombstone) = tombstones.seek_ge(&key, self.snapshot) {
                    if tombstone.contains_key(&key) {
                        key = match &l.largest_user_key {
                            Some(largest) if *largest < tombstone.end => largest.clone(),
                            _ => tombstone.end,
                        };
                    }
                }
            }
        }

        self.init_min_heap();
    }

    fn seek_lt_internal(&mut self, mut key: UserKey, start_level: usize) {
        self.prefix = None;

        for l in self.levels.iter_mut().skip(start_level) {
            l.current = l.iter.seek_lt(&key);
            l.tombstone = TombstoneCursor::Unpositioned;

            if let Some(tombstones) = &mut l.tombstones {
                if let Some(tombstone) = tombstones.seek_le(&key, self.snapshot) {
                    if tombstone.contains_key(&key) {
                        key = tombstone.start;
                    }
                }
            }
        }

        self.init_max_heap();
    }

    fn first_internal(&mut self) {
        self.prefix = None;

        for l in &mut self.levels {
            l.current = l.iter.first();
            l.tombstone = TombstoneCursor::Unpositioned;
        }

        self.init_min_heap();
    }

    fn last_internal(&mut self) {
        self.prefix = None;

        for l in &mut self.levels {
            l.current = l.iter.last();
            l.tombstone = TombstoneCursor::Unpositioned;
        }

        self.init_max_heap();
    }

    fn reset_error(&mut self) {
        self.err_level = None;
    }
}

impl InternalIterator for MergingIter<'_> {
    fn seek_ge(&mut self, key: &[u8]) -> Option<InternalValue> {
        self.assert_open();
        self.reset_error();
        self.prefix = None;
        self.seek_ge_internal(key.into(), 0);
        self.find_next_entry()
    }

    fn seek_prefix_ge(&mut self, prefix: &[u8], key: &[u8]) -> Option<InternalValue> {
        self.assert_open();
        self.reset_error();
        self.prefix = Some(prefix.into());
        self.seek_ge_internal(key.into(), 0);
        self.find_next_entry()
    }

    fn seek_lt(&mut self, key: &[u8]) -> Option<InternalValue> {
        self.assert_open();
        self.reset_error();
        self.seek_lt_internal(key.into(), 0);
        self.find_prev_entry()
    }

    fn first(&mut self) -> Option<InternalValue> {
        self.assert_open();
        self.reset_error();
        self.first_internal();
        self.find_next_entry()
    }

    fn last(&mut self) -> Option<InternalValue> {
        self.assert_open();
        self.reset_error();
        self.last_internal();
        self.find_prev_entry()
    }

    fn next(&mut self) -> Option<InternalValue> {
        self.assert_open();

        if self.err_level.is_some() {
            return None;
        }

        if self.direction != Direction::Forward {
            self.switch_to_min_heap();
            return self.find_next_entry();
        }

        if self.heap_len() == 0 {
            return None;
        }

        self.next_entry();
        self.find_next_entry()
    }

    fn prev(&mut self) -> Option<InternalValue> {
        self.assert_open();

        if self.err_level.is_some() {
            return None;
        }

        if self.direction != Direction::Reverse {
            self.switch_to_max_heap();
            return self.find_prev_entry();
        }

        if self.heap_len() == 0 {
            return None;
        }

        self.prev_entry();
        self.find_prev_entry()
    }

    fn error(&self) -> Option<&crate::Error> {
        if let Some(level) = self.err_level {
            return self.levels.get(level).and_then(|l| l.iter.error());
        }

        let top = self.top.as_ref()?;
        self.levels.get(top.level).and_then(|l| l.iter.error())
    }

    fn close(&mut self) -> crate::Result<()> {
        self.assert_open();
        self.closed = true;

        let mut result = Ok(());

        for l in &mut self.levels {
            let closed = l.iter.close();
            if result.is_ok() {
                result = closed;
            }

            if let Some(tombstones) = &mut l.tombstones {
                let closed = tombstones.close();
                if result.is_ok() {
                    result = closed;
                }
            }
        }

        self.levels.clear();
        self.heap = Heap::with_capacity(0);
        self.top = None;

        result
    }

    fn set_bounds(&mut self, lower: Option<UserKey>, upper: Option<UserKey>) {
        self.assert_open();

        for l in &mut self.levels {
            l.iter.set_bounds(lower.clone(), upper.clone());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{range_tombstone::RangeTombstone, run::SortedRun, ValueType};
    use std::sync::Arc;
    use test_log::test;

    fn kv(key: &str, seqno: SeqNo) -> InternalValue {
        InternalValue::from_components(key, format!("{key}{seqno}"), seqno, ValueType::Value)
    }

    fn level(items: Vec<InternalValue>, tombstones: Vec<RangeTombstone>) -> MergingIterLevel<'static> {
        let run = Arc::new(SortedRun::new(items, tombstones));
        let mut level = MergingIterLevel::new(Box::new(run.iter()));
        if let Some(tombstones) = run.tombstone_iter() {
            level = level.with_tombstones(Box::new(tombstones));
        }
        level
    }

    fn fmt(item: Option<InternalValue>) -> Option<String> {
        item.map(|x| {
            format!(
                "{}:{}",
                String::from_utf8_lossy(&x.key.user_key),
                x.key.seqno
            )
        })
    }

    fn collect_forward(iter: &mut MergingIter<'_>) -> Vec<String> {
        let mut out = vec![];
        let mut item = iter.first();
        while let Some(s) = fmt(item) {
            out.push(s);
            item = iter.next();
        }
        out
    }

    fn collect_backward(iter: &mut MergingIter<'_>) -> Vec<String> {
        let mut out = vec![];
        let mut item = iter.last();
        while let Some(s) = fmt(item) {
            out.push(s);
            item = iter.prev();
        }
        out
    }

    #[test]
    fn merge_empty() {
        let mut iter = MergingIter::new(vec![]);
        assert_eq!(None, iter.first());
        assert_eq!(None, iter.last());
        assert_eq!(None, iter.next());
        assert_eq!(None, iter.prev());
        assert!(iter.error().is_none());
        iter.close().unwrap();
    }

    #[test]
    fn merge_interleaved() {
        let mut iter = MergingIter::new(vec![
            level(vec![kv("a", 3), kv("d", 3)], vec![]),
            level(vec![kv("b", 2), kv("e", 2)], vec![]),
            level(vec![kv("c", 1), kv("f", 1)], vec![]),
        ]);

        assert_eq!(
            vec!["a:3", "b:2", "c:1", "d:3", "e:2", "f:1"],
            collect_forward(&mut iter)
        );
        assert_eq!(
            vec!["f:1", "e:2", "d:3", "c:1", "b:2", "a:3"],
            collect_backward(&mut iter)
        );
    }

    #[test]
    fn merge_versions_newest_first() {
        let mut iter = MergingIter::new(vec![
            level(vec![kv("a", 3)], vec![]),
            level(vec![kv("a", 2), kv("b", 2)], vec![]),
            level(vec![kv("a", 1)], vec![]),
        ]);

        assert_eq!(vec!["a:3", "a:2", "a:1", "b:2"], collect_forward(&mut iter));
        assert_eq!(vec!["b:2", "a:1", "a:2", "a:3"], collect_backward(&mut iter));
    }

    #[test]
    fn merge_snapshot() {
        let mut iter = MergingIter::with_snapshot(
            vec![
                level(vec![kv("a", 5), kv("c", 9)], vec![]),
                level(vec![kv("a", 2), kv("b", 3)], vec![]),
            ],
            4,
        );

        assert_eq!(vec!["a:2", "b:3"], collect_forward(&mut iter));
        assert_eq!(vec!["b:3", "a:2"], collect_backward(&mut iter));
    }

    #[test]
    fn merge_tombstone_shadows_older_level() {
        let mut iter = MergingIter::new(vec![
            level(vec![], vec![RangeTombstone::new("a", "e", 10)]),
            level(vec![kv("a", 5), kv("c", 5), kv("e", 5)], vec![]),
        ]);

        assert_eq!(vec!["e:5"], collect_forward(&mut iter));
        assert_eq!(vec!["e:5"], collect_backward(&mut iter));
        assert_eq!(Some("e:5".into()), fmt(iter.seek_ge(b"b")));
        assert_eq!(None, fmt(iter.seek_lt(b"e")));
    }

    #[test]
    fn merge_tombstone_same_level_respects_seqno() {
        let mut iter = MergingIter::new(vec![level(
            vec![kv("a", 5), kv("b", 15), kv("c", 5)],
            vec![RangeTombstone::new("a", "z", 10)],
        )]);

        assert_eq!(vec!["b:15"], collect_forward(&mut iter));
        assert_eq!(vec!["b:15"], collect_backward(&mut iter));
    }

    #[test]
    fn merge_tombstone_invisible_at_snapshot() {
        let levels = || {
            vec![
                level(vec![], vec![RangeTombstone::new("a", "z", 10)]),
                level(vec![kv("b", 5)], vec![]),
            ]
        };

        let mut iter = MergingIter::with_snapshot(levels(), 9);
        assert_eq!(vec!["b:5"], collect_forward(&mut iter));

        let mut iter = MergingIter::with_snapshot(levels(), 10);
        assert!(collect_forward(&mut iter).is_empty());
    }

    #[test]
    fn merge_largest_user_key_clamps_seek() {
        let run = Arc::new(SortedRun::new(
            vec![kv("a", 9)],
            vec![RangeTombstone::new("b", "z", 10)],
        ));
        let bounded = MergingIterLevel::new(Box::new(run.iter()))
            .with_tombstones(Box::new(run.tombstone_iter().unwrap()))
            .with_largest_user_key(Some("c".into()));

        let mut iter = MergingIter::new(vec![
            bounded,
            level(vec![kv("b", 1), kv("c", 1), kv("d", 1)], vec![]),
        ]);

        // The seek cascade stops at the boundary key, the regular shadowing check
        // still hides the keys covered by the tombstone
        assert_eq!(None, fmt(iter.seek_ge(b"b")));
        assert_eq!(Some("a:9".into()), fmt(iter.seek_ge(b"a")));
    }

    #[test]
    fn merge_direction_switch() {
        let mut iter = MergingIter::new(vec![
            level(vec![kv("a", 2)], vec![]),
            level(vec![kv("a", 1), kv("b", 1)], vec![]),
        ]);

        assert_eq!(Some("a:2".into()), fmt(iter.first()));
        assert_eq!(None, fmt(iter.prev()));
        assert_eq!(Some("a:2".into()), fmt(iter.next()));
        assert_eq!(Some("a:1".into()), fmt(iter.next()));
        assert_eq!(Some("a:2".into()), fmt(iter.prev()));
        assert_eq!(Some("a:1".into()), fmt(iter.next()));
        assert_eq!(Some("b:1".into()), fmt(iter.next()));
        assert_eq!(Some("a:1".into()), fmt(iter.prev()));
    }

    #[test]
    fn merge_seek_prefix() {
        let mut iter = MergingIter::new(vec![
            level(vec![kv("aa", 2), kv("ab", 2)], vec![]),
            level(vec![kv("ab", 1), kv("b", 1)], vec![]),
        ]);

        assert_eq!(Some("ab:2".into()), fmt(iter.seek_prefix_ge(b"a", b"ab")));
        assert_eq!(Some("ab:1".into()), fmt(iter.next()));
    }

    #[test]
    fn merge_set_bounds() {
        let mut iter = MergingIter::new(vec![
            level(vec![kv("a", 2), kv("c", 2)], vec![]),
            level(vec![kv("b", 1), kv("d", 1)], vec![]),
        ]);

        iter.set_bounds(Some("b".into()), Some("d".into()));
        assert_eq!(vec!["b:1", "c:2"], collect_forward(&mut iter));
        assert_eq!(vec!["c:2", "b:1"], collect_backward(&mut iter));
    }

    #[test]
    #[should_panic = "iterator used after close"]
    fn merge_use_after_close() {
        let mut iter = MergingIter::new(vec![level(vec![kv("a", 1)], vec![])]);
        iter.close().unwrap();
        let _ = iter.first();
    }
}
