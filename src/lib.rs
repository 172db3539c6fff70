// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The write and read core of a log-structured merge tree (LSM-tree).
//!
//! ##### About
//!
//! This crate provides the two components that sit between the public API
//! of an LSM-tree storage engine and its data sources:
//!
//! - A [`CommitPipeline`] that accepts concurrently submitted [`Batch`]es,
//!   stamps them with sequence numbers, writes them to a write-ahead log,
//!   applies them to a memtable and publishes them to readers strictly in
//!   sequence number order.
//! - A [`MergingIter`] that merges the sorted entries of many levels
//!   (memtables, sorted runs) into one sorted stream, honoring range
//!   tombstones and snapshot visibility, in both directions.
//!
//! [`Engine`] wires both together with a write-ahead log ([`Wal`]) and
//! in-memory [`Memtable`]s; [`MvccStream`] turns the merged stream of
//! versions into a user-facing view with one value per key.
//!
//! Keys are limited to 65536 bytes, values are limited to 2^32 bytes.
//!
//! ##### Sequence numbers
//!
//! Every mutation is stamped with its own [`SeqNo`]. A batch with `n`
//! mutations reserves `n` consecutive sequence numbers, so a later write to
//! the same key in the same batch shadows an earlier one. A reader with
//! snapshot `S` sees exactly the versions with `seqno <= S`.
//!
//! # Example usage
//!
//! ```
//! use lsm_core::{Batch, Config, SequenceNumberCounter};
//! #
//! # let folder = tempfile::tempdir()?;
//!
//! let engine = Config::new(
//!     &folder,
//!     SequenceNumberCounter::default(),
//!     SequenceNumberCounter::default(),
//! )
//! .open()?;
//!
//! let mut batch = Batch::new();
//! batch.insert("a", "abc");
//! batch.insert("b", "def");
//! batch.remove_range("c", "f");
//! engine.write(&mut batch)?;
//!
//! let snapshot = engine.snapshot_seqno();
//! engine.remove("a")?;
//!
//! // The snapshot still sees "a"
//! assert_eq!(Some("abc".into()), engine.get("a", Some(snapshot))?);
//! assert_eq!(None, engine.get("a", None)?);
//!
//! let items = engine.iter(None).collect_vec()?;
//! assert_eq!(1, items.len());
//! #
//! # Ok::<(), lsm_core::Error>(())
//! ```

#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]
#![warn(clippy::redundant_feature_names)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod batch;

#[doc(hidden)]
pub mod coding;

pub mod commit;

mod config;
mod engine;
mod error;
mod internal_iter;
mod key;

#[doc(hidden)]
pub mod memtable;

mod merge;
mod merge_operator;
mod mvcc_stream;
mod path;

pub mod range_tombstone;

mod run;
mod seqno;
mod slice;
mod value;
mod value_type;
mod wal;

#[doc(hidden)]
pub use {memtable::MemtableIter, run::RunIter};

pub use {
    batch::{Batch, BatchEntry, BatchIter},
    commit::{CommitEnv, CommitPipeline, LogPosition},
    config::Config,
    engine::Engine,
    error::{Error, Result},
    internal_iter::{Bounds, InternalIterator},
    key::InternalKey,
    memtable::Memtable,
    merge::{MergingIter, MergingIterLevel},
    merge_operator::MergeOperator,
    mvcc_stream::{KvPair, MvccStream},
    range_tombstone::{RangeTombstone, TombstoneIterator},
    run::SortedRun,
    seqno::{SeqNo, SequenceNumberCounter, SEQNO_MAX},
    slice::Slice,
    value::{InternalValue, UserKey, UserValue},
    value_type::ValueType,
    wal::{Wal, WalReader},
};
