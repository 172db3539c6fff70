// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::Memtable;
use crate::{
    internal_iter::{Bounds, InternalIterator},
    InternalKey, InternalValue, UserKey, UserValue, ValueType, SEQNO_MAX,
};
use crossbeam_skiplist::map::Entry;
use std::{ops::Bound, sync::Arc};

/// Cursor over the point entries of a [`Memtable`]
///
/// The cursor remembers the internal key it is positioned on and re-seeks
/// the skiplist on every step, so concurrent inserts are fine. Entries
/// written after the reader's snapshot are filtered out by the merging iterator.
pub struct MemtableIter {
    memtable: Arc<Memtable>,
    current: Option<InternalKey>,
    bounds: Bounds,
}

impl MemtableIter {
    pub(crate) fn new(memtable: Arc<Memtable>) -> Self {
        Self {
            memtable,
            current: None,
            bounds: Bounds::default(),
        }
    }

    fn land(&mut self, item: Option<InternalValue>) -> Option<InternalValue> {
        let item = item.filter(|item| self.bounds.contains(&item.key.user_key));
        self.current = item.as_ref().map(|item| item.key.clone());
        item
    }
}

fn to_value(entry: Entry<'_, InternalKey, UserValue>) -> InternalValue {
    InternalValue {
        key: entry.key().clone(),
        value: entry.value().clone(),
    }
}

/// Smallest internal key with the given user key
fn seek_key(key: &[u8]) -> InternalKey {
    InternalKey::new(key, SEQNO_MAX, ValueType::Value)
}

impl InternalIterator for MemtableIter {
    fn seek_ge(&mut self, key: &[u8]) -> Option<InternalValue> {
        let key = seek_key(self.bounds.clamp_seek_ge(key));
        let item = self.memtable.items.range(key..).next().map(to_value);
        self.land(item)
    }

    fn seek_lt(&mut self, key: &[u8]) -> Option<InternalValue> {
        let key = seek_key(self.bounds.clamp_seek_lt(key));
        let item = self.memtable.items.range(..key).next_back().map(to_value);
        self.land(item)
    }

    fn first(&mut self) -> Option<InternalValue> {
        match self.bounds.lower.clone() {
            Some(lo) => self.seek_ge(&lo),
            None => {
                let item = self.memtable.items.front().map(to_value);
                self.land(item)
            }
        }
    }

    fn last(&mut self) -> Option<InternalValue> {
        match self.bounds.upper.clone() {
            Some(hi) => self.seek_lt(&hi),
            None => {
                let item = self.memtable.items.back().map(to_value);
                self.land(item)
            }
        }
    }

    fn next(&mut self) -> Option<InternalValue> {
        let current = self.current.take()?;
        let item = self
            .memtable
            .items
            .range((Bound::Excluded(current), Bound::Unbounded))
            .next()
            .map(to_value);
        self.land(item)
    }

    fn prev(&mut self) -> Option<InternalValue> {
        let current = self.current.take()?;
        let item = self
            .memtable
            .items
            .range((Bound::Unbounded, Bound::Excluded(current)))
            .next_back()
            .map(to_value);
        self.land(item)
    }

    fn set_bounds(&mut self, lower: Option<UserKey>, upper: Option<UserKey>) {
        self.bounds = Bounds::new(lower, upper);
        self.current = None;
    }
}
