// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Kind of a mutation (regular value, tombstone, merge operand, range deletion)
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[allow(clippy::module_name_repetitions)]
pub enum ValueType {
    /// Existing value
    Value,

    /// Deleted value
    Tombstone,

    /// "Weak" deletion (a.k.a. `SingleDelete` in `RocksDB`)
    WeakTombstone,

    /// Merge operand, combined with older versions on read
    Merge,

    /// Deletion of the key range `[key, end)`
    ///
    /// Only appears inside batches; memtables and runs keep range
    /// deletions apart from point keys.
    RangeTombstone,
}

impl ValueType {
    /// Returns `true` if the type is a point tombstone marker (either normal or weak).
    #[must_use]
    pub fn is_tombstone(self) -> bool {
        self == Self::Tombstone || self == Self::WeakTombstone
    }

    /// Returns `true` if the mutation carries a user value.
    #[must_use]
    pub fn has_value(self) -> bool {
        self == Self::Value || self == Self::Merge
    }
}

impl TryFrom<u8> for ValueType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Value),
            1 => Ok(Self::Tombstone),
            2 => Ok(Self::WeakTombstone),
            3 => Ok(Self::Merge),
            4 => Ok(Self::RangeTombstone),
            _ => Err(()),
        }
    }
}

impl From<ValueType> for u8 {
    fn from(value: ValueType) -> Self {
        match value {
            ValueType::Value => 0,
            ValueType::Tombstone => 1,
            ValueType::WeakTombstone => 2,
            ValueType::Merge => 3,
            ValueType::RangeTombstone => 4,
        }
    }
}
