// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{SeqNo, UserKey, ValueType};
use std::cmp::Reverse;

/// User key augmented with a sequence number and a mutation kind
///
/// Internal keys sort by user key ascending, then by sequence number
/// descending, so the newest version of a key comes first.
#[derive(Clone, Eq)]
pub struct InternalKey {
    /// User-defined key
    pub user_key: UserKey,

    /// Sequence number the version was written at
    pub seqno: SeqNo,

    /// Kind of mutation
    pub value_type: ValueType,
}

impl PartialEq for InternalKey {
    fn eq(&self, other: &Self) -> bool {
        self.user_key == other.user_key && self.seqno == other.seqno
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
impl std::fmt::Debug for InternalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}:{}:{}",
            self.user_key,
            self.seqno,
            match self.value_type {
                ValueType::Value => "V",
                ValueType::Tombstone => "T",
                ValueType::WeakTombstone => "W",
                ValueType::Merge => "M",
                ValueType::RangeTombstone => "R",
            },
        )
    }
}

impl InternalKey {
    /// Creates a new internal key.
    ///
    /// # Panics
    ///
    /// Panics if the key is longer than 65535 bytes.
    pub fn new<K: Into<UserKey>>(user_key: K, seqno: SeqNo, value_type: ValueType) -> Self {
        let user_key = user_key.into();

        assert!(
            u16::try_from(user_key.len()).is_ok(),
            "keys can be 65535 bytes in length",
        );

        Self {
            user_key,
            seqno,
            value_type,
        }
    }

    /// Returns `true` if the key is a point tombstone.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value_type.is_tombstone()
    }

    /// Returns `true` if a reader at `snapshot` may observe this version.
    #[must_use]
    pub fn is_visible(&self, snapshot: SeqNo) -> bool {
        self.seqno <= snapshot
    }
}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// Order by user key, THEN by sequence number
// This is one of the most important functions
// Otherwise queries will not match expected behaviour
impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.user_key, Reverse(self.seqno)).cmp(&(&other.user_key, Reverse(other.seqno)))
    }
}
