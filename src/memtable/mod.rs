// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod iter;

pub use iter::MemtableIter;

use crate::{
    range_tombstone::{fragment, FragmentIter, RangeTombstone},
    Batch, InternalKey, InternalValue, SeqNo, UserValue, ValueType,
};
use crossbeam_skiplist::SkipMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, RwLock,
};

/// The memtable serves as an intermediary storage for new items
///
/// Point entries live in a lock-free skiplist. Range tombstones are kept
/// unfragmented in insertion order and fragmented when a reader asks for them.
pub struct Memtable {
    #[doc(hidden)]
    pub items: SkipMap<InternalKey, UserValue>,

    tombstones: RwLock<Vec<RangeTombstone>>,

    /// Approximate memtable size
    ///
    /// If this grows past `max_size`, the memtable rejects batches
    approximate_size: AtomicU64,

    max_size: u64,

    /// Highest sequence number applied, 0 if empty
    highest_seqno: AtomicU64,
}

impl std::fmt::Debug for Memtable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Memtable(len={}, size={}/{})",
            self.len(),
            self.size(),
            self.max_size
        )
    }
}

impl Memtable {
    /// Creates an empty memtable that accepts up to `max_size` bytes of batches.
    #[must_use]
    pub fn new(max_size: u64) -> Self {
        Self {
            items: SkipMap::new(),
            tombstones: RwLock::default(),
            approximate_size: AtomicU64::default(),
            max_size,
            highest_seqno: AtomicU64::default(),
        }
    }

    /// Reserves `size` bytes of capacity.
    ///
    /// An empty memtable accepts any size, so oversized batches still make progress.
    fn reserve(&self, size: u64) -> crate::Result<()> {
        let mut current = self.approximate_size.load(Ordering::Acquire);

        loop {
            if current > 0 && current.saturating_add(size) > self.max_size {
                return Err(crate::Error::MemtableFull);
            }

            match self.approximate_size.compare_exchange_weak(
                current,
                current + size,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    /// Reserves room for a batch, without inserting it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MemtableFull`] if the batch does not fit.
    pub fn prepare(&self, batch: &Batch) -> crate::Result<()> {
        // NOTE: usize -> u64 is lossless on all supported platforms
        #[allow(clippy::cast_possible_truncation)]
        self.reserve(batch.approximate_size() as u64)
    }

    /// Applies a committed batch.
    ///
    /// Mutation `i` of the batch is stored at `batch.seqno() + i`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MemtableFull`] without inserting anything if the
    /// batch does not fit, or a decode error if the batch is malformed.
    pub fn apply(&self, batch: &Batch) -> crate::Result<()> {
        self.prepare(batch)?;
        self.apply_prepared(batch)
    }

    /// Applies a committed batch that was reserved with [`Memtable::prepare`].
    ///
    /// # Errors
    ///
    /// Will return `Err` if the batch is malformed.
    pub fn apply_prepared(&self, batch: &Batch) -> crate::Result<()> {
        let base = batch.seqno();

        for (idx, entry) in batch.iter().enumerate() {
            let entry = entry?;
            let seqno = base + idx as u64;

            if entry.value_type == ValueType::RangeTombstone {
                self.tombstones
                    .write()
                    .expect("lock is poisoned")
                    .push(RangeTombstone::new(entry.key, entry.value, seqno));
            } else {
                self.items.insert(
                    InternalKey::new(entry.key, seqno, entry.value_type),
                    entry.value,
                );
            }
        }

        self.highest_seqno
            .fetch_max(base + batch.seqno_count() - 1, Ordering::AcqRel);

        Ok(())
    }

    /// Inserts an item into the memtable, bypassing the capacity check.
    ///
    /// Returns the item size and the new memtable size.
    pub fn insert(&self, item: InternalValue) -> (u64, u64) {
        let item_size = item.size() as u64;

        let size_before = self
            .approximate_size
            .fetch_add(item_size, Ordering::AcqRel);

        self.highest_seqno
            .fetch_max(item.key.seqno, Ordering::AcqRel);

        self.items.insert(item.key, item.value);

        (item_size, size_before + item_size)
    }

    /// Returns the newest version of `key` visible at `snapshot`.
    ///
    /// If a visible range tombstone of this memtable deletes that version,
    /// a point tombstone at the range tombstone's seqno is returned instead.
    pub fn get<K: AsRef<[u8]>>(&self, key: K, snapshot: SeqNo) -> Option<InternalValue> {
        let key = key.as_ref();

        // NOTE: Internal keys sort by user key, then by seqno descending,
        // so the first entry >= (key, snapshot) is the newest visible version
        let lower_bound = InternalKey::new(key, snapshot, ValueType::Value);

        let point = self
            .items
            .range(lower_bound..)
            .next()
            .filter(|entry| &*entry.key().user_key == key)
            .map(|entry| InternalValue {
                key: entry.key().clone(),
                value: entry.value().clone(),
            });

        let covering_seqno = self
            .tombstones
            .read()
            .expect("lock is poisoned")
            .iter()
            .filter(|t| t.visible_at(snapshot) && t.contains_key(key))
            .map(|t| t.seqno)
            .max();

        match (point, covering_seqno) {
            (Some(point), Some(seqno)) if seqno > point.key.seqno => {
                Some(InternalValue::new_tombstone(key, seqno))
            }
            (None, Some(seqno)) => Some(InternalValue::new_tombstone(key, seqno)),
            (point, _) => point,
        }
    }

    /// Returns an iterator over all point entries.
    #[must_use]
    pub fn iter(self: &Arc<Self>) -> MemtableIter {
        MemtableIter::new(self.clone())
    }

    /// Returns an iterator over the fragmented range tombstones, if there are any.
    #[must_use]
    pub fn tombstone_iter(&self) -> Option<FragmentIter> {
        let tombstones = self.tombstones.read().expect("lock is poisoned");

        if tombstones.is_empty() {
            return None;
        }

        Some(FragmentIter::new(fragment(tombstones.clone()).into()))
    }

    /// Number of range tombstones.
    #[must_use]
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.read().expect("lock is poisoned").len()
    }

    /// Get approximate size of memtable in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        self.approximate_size.load(Ordering::Acquire)
    }

    /// Count the amount of point entries in the memtable
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the memtable is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.tombstone_count() == 0
    }

    /// Returns the highest sequence number in the memtable
    #[must_use]
    pub fn highest_seqno(&self) -> Option<SeqNo> {
        match self.highest_seqno.load(Ordering::Acquire) {
            0 => None,
            seqno => Some(seqno),
        }
    }
}
