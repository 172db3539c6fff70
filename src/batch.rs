// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    SeqNo, Slice, UserKey, UserValue, ValueType,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};
use varint_rs::{VarintReader, VarintWriter};

/// Size of the batch header: seqno (u64) + count (u32)
pub const BATCH_HEADER_LEN: usize = 12;

/// A single mutation decoded from a [`Batch`]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchEntry {
    /// Kind of mutation
    pub value_type: ValueType,

    /// User key (start key for range tombstones)
    pub key: UserKey,

    /// User value, merge operand, or exclusive end key for range tombstones
    ///
    /// Empty for point tombstones.
    pub value: UserValue,
}

fn encode_record<W: Write>(
    writer: &mut W,
    value_type: ValueType,
    key: &[u8],
    value: &[u8],
) -> Result<(), EncodeError> {
    writer.write_u8(u8::from(value_type))?;

    // NOTE: Key length is limited to u16, checked on insert
    #[allow(clippy::cast_possible_truncation)]
    writer.write_u16_varint(key.len() as u16)?;
    writer.write_all(key)?;

    match value_type {
        ValueType::Value | ValueType::Merge => {
            // NOTE: Value length is limited to u32, checked on insert
            #[allow(clippy::cast_possible_truncation)]
            writer.write_u32_varint(value.len() as u32)?;
            writer.write_all(value)?;
        }
        ValueType::RangeTombstone => {
            #[allow(clippy::cast_possible_truncation)]
            writer.write_u16_varint(value.len() as u16)?;
            writer.write_all(value)?;
        }
        ValueType::Tombstone | ValueType::WeakTombstone => {}
    }

    Ok(())
}

impl Encode for BatchEntry {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        encode_record(writer, self.value_type, &self.key, &self.value)
    }
}

impl Decode for BatchEntry {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let tag = reader.read_u8()?;
        let value_type =
            ValueType::try_from(tag).map_err(|()| DecodeError::InvalidTag(("ValueType", tag)))?;

        let key_len = reader.read_u16_varint()?;
        let key = Slice::from_reader(reader, key_len.into())?;

        let value = match value_type {
            ValueType::Value | ValueType::Merge => {
                let value_len = reader.read_u32_varint()?;
                Slice::from_reader(reader, value_len as usize)?
            }
            ValueType::RangeTombstone => {
                let end_len = reader.read_u16_varint()?;
                Slice::from_reader(reader, end_len.into())?
            }
            ValueType::Tombstone | ValueType::WeakTombstone => Slice::empty(),
        };

        Ok(Self {
            value_type,
            key,
            value,
        })
    }
}

/// An ordered set of mutations that is committed atomically
///
/// The batch keeps its mutations in an encoded buffer that is handed to the
/// write-ahead log as-is. The first [`BATCH_HEADER_LEN`] bytes hold the
/// sequence number (assigned at commit time, 0 before) and the mutation count.
///
/// Mutation `i` of a batch committed at sequence number `s` is stamped `s + i`,
/// so a later mutation of the same key shadows an earlier one.
///
/// # Examples
///
/// ```
/// # use lsm_core::Batch;
/// let mut batch = Batch::new();
/// batch.insert("a", "1");
/// batch.remove("b");
/// batch.remove_range("c", "f");
///
/// assert_eq!(3, batch.len());
/// assert_eq!(0, batch.seqno());
/// ```
#[derive(Clone)]
pub struct Batch {
    data: Vec<u8>,
    count: u32,
    committed: bool,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Batch(seqno={}, count={}, bytes={})",
            self.seqno(),
            self.count,
            self.data.len()
        )
    }
}

impl Batch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: vec![0; BATCH_HEADER_LEN],
            count: 0,
            committed: false,
        }
    }

    /// Decodes a batch from its encoded representation (e.g. a log record).
    ///
    /// # Errors
    ///
    /// Will return `Err` if the buffer is malformed.
    pub fn from_data(data: Vec<u8>) -> Result<Self, DecodeError> {
        if data.len() < BATCH_HEADER_LEN {
            return Err(DecodeError::InvalidHeader("Batch"));
        }

        let mut reader = Cursor::new(data.get(8..BATCH_HEADER_LEN).unwrap_or_default());
        let count = reader.read_u32::<LittleEndian>()?;

        let batch = Self {
            data,
            count,
            committed: false,
        };

        let mut reader = Cursor::new(batch.data.get(BATCH_HEADER_LEN..).unwrap_or_default());
        let mut decoded = 0;

        while reader.position() < reader.get_ref().len() as u64 {
            BatchEntry::decode_from(&mut reader)?;
            decoded += 1;
        }

        if decoded != count {
            return Err(DecodeError::CountMismatch {
                expected: count,
                got: decoded,
            });
        }

        Ok(batch)
    }

    fn push(&mut self, value_type: ValueType, key: &[u8], value: &[u8]) {
        assert!(!self.committed, "batch was already committed");
        assert!(!key.is_empty(), "key may not be empty");
        assert!(
            u16::try_from(key.len()).is_ok(),
            "keys can be 65535 bytes in length",
        );
        assert!(
            u32::try_from(value.len()).is_ok(),
            "values can be 2^32 bytes in length"
        );

        // NOTE: Writing into a Vec cannot fail
        #[allow(clippy::expect_used)]
        encode_record(&mut self.data, value_type, key, value).expect("cannot fail");

        self.count += 1;

        #[allow(clippy::expect_used)]
        self.data
            .get_mut(8..BATCH_HEADER_LEN)
            .expect("header should exist")
            .copy_from_slice(&self.count.to_le_bytes());
    }

    /// Sets `key` to `value`.
    ///
    /// # Panics
    ///
    /// Panics if the key is empty or longer than 65535 bytes, or the
    /// batch was already committed.
    pub fn insert<K: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, key: K, value: V) {
        self.push(ValueType::Value, key.as_ref(), value.as_ref());
    }

    /// Deletes `key`.
    ///
    /// # Panics
    ///
    /// Same as [`Batch::insert`].
    pub fn remove<K: AsRef<[u8]>>(&mut self, key: K) {
        self.push(ValueType::Tombstone, key.as_ref(), &[]);
    }

    /// Deletes `key` with a weak tombstone (single deletion).
    ///
    /// # Panics
    ///
    /// Same as [`Batch::insert`].
    pub fn remove_weak<K: AsRef<[u8]>>(&mut self, key: K) {
        self.push(ValueType::WeakTombstone, key.as_ref(), &[]);
    }

    /// Adds a merge operand for `key`.
    ///
    /// # Panics
    ///
    /// Same as [`Batch::insert`].
    pub fn merge<K: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, key: K, operand: V) {
        self.push(ValueType::Merge, key.as_ref(), operand.as_ref());
    }

    /// Deletes all keys in `[start, end)`.
    ///
    /// # Panics
    ///
    /// Panics if `start >= end`, or any of the conditions of [`Batch::insert`].
    pub fn remove_range<K: AsRef<[u8]>>(&mut self, start: K, end: K) {
        let (start, end) = (start.as_ref(), end.as_ref());
        assert!(start < end, "range tombstone start must be < end");
        assert!(
            u16::try_from(end.len()).is_ok(),
            "keys can be 65535 bytes in length",
        );
        self.push(ValueType::RangeTombstone, start, end);
    }

    /// Number of mutations in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// Returns `true` if the batch contains no mutations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of sequence numbers the batch consumes when committed.
    ///
    /// An empty batch still consumes one, so it has a slot in the global order.
    #[must_use]
    pub fn seqno_count(&self) -> u64 {
        u64::from(self.count.max(1))
    }

    /// Sequence number of the first mutation, 0 if not committed yet.
    #[must_use]
    pub fn seqno(&self) -> SeqNo {
        let mut reader = Cursor::new(self.data.get(0..8).unwrap_or_default());
        reader.read_u64::<LittleEndian>().unwrap_or_default()
    }

    pub(crate) fn set_seqno(&mut self, seqno: SeqNo) {
        let mut header = Vec::with_capacity(8);

        // NOTE: Writing into a Vec cannot fail
        #[allow(clippy::expect_used)]
        header
            .write_u64::<LittleEndian>(seqno)
            .expect("cannot fail");

        #[allow(clippy::expect_used)]
        self.data
            .get_mut(0..8)
            .expect("header should exist")
            .copy_from_slice(&header);
    }

    /// Returns `true` if the batch went through the commit pipeline.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub(crate) fn mark_committed(&mut self) {
        assert!(!self.committed, "batch was already committed");
        self.committed = true;
    }

    /// Encoded representation (header + records).
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Approximate memory footprint of the batch once applied.
    #[must_use]
    pub fn approximate_size(&self) -> usize {
        self.data.len()
    }

    /// Clears the batch so it can be reused for another commit.
    pub fn reset(&mut self) {
        self.data.clear();
        self.data.resize(BATCH_HEADER_LEN, 0);
        self.count = 0;
        self.committed = false;
    }

    /// Iterates over the mutations in insertion order.
    #[must_use]
    pub fn iter(&self) -> BatchIter<'_> {
        BatchIter {
            reader: Cursor::new(self.data.get(BATCH_HEADER_LEN..).unwrap_or_default()),
            failed: false,
        }
    }
}

/// Decoding iterator over the mutations of a [`Batch`]
pub struct BatchIter<'a> {
    reader: Cursor<&'a [u8]>,
    failed: bool,
}

impl Iterator for BatchIter<'_> {
    type Item = crate::Result<BatchEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.position() as usize >= self.reader.get_ref().len() {
            return None;
        }

        match BatchEntry::decode_from(&mut self.reader) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) => {
                self.failed = true;
                Some(Err(e.into()))
            }
        }
    }
}
