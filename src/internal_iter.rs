// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{InternalValue, UserKey};

/// Positional iterator over the internal keys of one data source
///
/// All positioning methods return the entry the iterator lands on, or `None`
/// if the iterator is exhausted in that direction (or hit an error, see
/// [`InternalIterator::error`]).
///
/// Entries are returned in internal key order, that is user key ascending,
/// then sequence number descending. Point tombstones are returned as
/// regular entries.
pub trait InternalIterator {
    /// Moves to the first entry with an internal key `>= (key, SEQNO_MAX)`.
    fn seek_ge(&mut self, key: &[u8]) -> Option<InternalValue>;

    /// Like [`InternalIterator::seek_ge`], but the caller is only interested in keys
    /// starting with `prefix`.
    ///
    /// Implementations may use the prefix to skip work. They are allowed to
    /// return keys that do not match the prefix.
    fn seek_prefix_ge(&mut self, prefix: &[u8], key: &[u8]) -> Option<InternalValue> {
        let _ = prefix;
        self.seek_ge(key)
    }

    /// Moves to the last entry with a user key `< key`.
    fn seek_lt(&mut self, key: &[u8]) -> Option<InternalValue>;

    /// Moves to the first entry.
    fn first(&mut self) -> Option<InternalValue>;

    /// Moves to the last entry.
    fn last(&mut self) -> Option<InternalValue>;

    /// Moves to the next entry.
    fn next(&mut self) -> Option<InternalValue>;

    /// Moves to the previous entry.
    fn prev(&mut self) -> Option<InternalValue>;

    /// Returns the error that stopped the iterator, if any.
    fn error(&self) -> Option<&crate::Error> {
        None
    }

    /// Releases the iterator, returning the error that stopped it, if any.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the iterator hit an error at some point.
    fn close(&mut self) -> crate::Result<()> {
        Ok(())
    }

    /// Restricts the iterator to user keys in `[lower, upper)`.
    ///
    /// The iterator must be repositioned afterwards.
    fn set_bounds(&mut self, lower: Option<UserKey>, upper: Option<UserKey>);
}

/// Key bounds of an iterator, `[lower, upper)`
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Bounds {
    /// Inclusive lower bound
    pub lower: Option<UserKey>,

    /// Exclusive upper bound
    pub upper: Option<UserKey>,
}

impl Bounds {
    /// Creates new bounds.
    #[must_use]
    pub fn new(lower: Option<UserKey>, upper: Option<UserKey>) -> Self {
        Self { lower, upper }
    }

    /// Returns `true` if the key is not below the lower bound.
    #[must_use]
    pub fn above_lower(&self, key: &[u8]) -> bool {
        self.lower.as_ref().is_none_or(|lo| lo.as_ref() <= key)
    }

    /// Returns `true` if the key is below the upper bound.
    #[must_use]
    pub fn below_upper(&self, key: &[u8]) -> bool {
        self.upper.as_ref().is_none_or(|hi| key < hi.as_ref())
    }

    /// Returns `true` if the key lies within the bounds.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.above_lower(key) && self.below_upper(key)
    }

    /// Clamps a forward seek target to the lower bound.
    #[must_use]
    pub fn clamp_seek_ge<'a>(&'a self, key: &'a [u8]) -> &'a [u8] {
        match &self.lower {
            Some(lo) if key < lo.as_ref() => lo.as_ref(),
            _ => key,
        }
    }

    /// Clamps a backward seek target to the upper bound.
    #[must_use]
    pub fn clamp_seek_lt<'a>(&'a self, key: &'a [u8]) -> &'a [u8] {
        match &self.upper {
            Some(hi) if key > hi.as_ref() => hi.as_ref(),
            _ => key,
        }
    }
}
