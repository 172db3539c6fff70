// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::UserValue;

/// Combines merge operands of a key into a value at read time
///
/// Merge operands let writers skip the read-modify-write cycle, e.g. for
/// counters or append-only lists. Readers fold all operands newer than the
/// newest regular value (or tombstone) of a key into one value.
///
/// # Examples
///
/// ```
/// # use lsm_core::{MergeOperator, UserValue};
/// struct Counter;
///
/// impl MergeOperator for Counter {
///     fn merge(&self, _key: &[u8], base: Option<&[u8]>, operands: &[&[u8]]) -> UserValue {
///         let parse = |v: &[u8]| -> u64 { std::str::from_utf8(v).ok().and_then(|s| s.parse().ok()).unwrap_or(0) };
///
///         let sum = base.map(parse).unwrap_or(0) + operands.iter().map(|op| parse(op)).sum::<u64>();
///         sum.to_string().into()
///     }
/// }
///
/// let merged = Counter.merge(b"k", Some(b"1".as_slice()), &[b"2".as_slice(), b"3".as_slice()]);
/// assert_eq!(b"6", &*merged);
/// ```
pub trait MergeOperator: Send + Sync {
    /// Folds `operands` (ordered oldest to newest) over `base`.
    ///
    /// `base` is `None` if the key did not exist (or was deleted) below the operands.
    fn merge(&self, key: &[u8], base: Option<&[u8]>, operands: &[&[u8]]) -> UserValue;
}

/// Resolves merge operands without an operator: the newest operand wins.
pub(crate) fn merge_without_operator(operands: &[&[u8]]) -> Option<UserValue> {
    operands.last().map(|op| UserValue::from(*op))
}
