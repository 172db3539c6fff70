// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{path::absolute_path, Engine, MergeOperator, SequenceNumberCounter};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

const DEFAULT_FILE_FOLDER: &str = ".lsm.data";

/// Engine configuration builder
#[derive(Clone)]
pub struct Config {
    /// Folder path
    #[doc(hidden)]
    pub path: PathBuf,

    /// Memtable capacity in bytes
    pub max_memtable_size: u64,

    /// Maximum number of concurrently in-flight commits
    pub max_inflight_commits: usize,

    /// Whether [`Engine::write`] waits for the write-ahead log to be synced
    pub sync_on_commit: bool,

    /// Merge operator used to resolve merge operands on read
    pub merge_operator: Option<Arc<dyn MergeOperator>>,

    /// The sequence number generator
    ///
    /// Can be shared between multiple engines
    pub(crate) seqno: SequenceNumberCounter,

    pub(crate) visible_seqno: SequenceNumberCounter,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("max_memtable_size", &self.max_memtable_size)
            .field("max_inflight_commits", &self.max_inflight_commits)
            .field("sync_on_commit", &self.sync_on_commit)
            .field("merge_operator", &self.merge_operator.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: absolute_path(Path::new(DEFAULT_FILE_FOLDER)),
            max_memtable_size: /* 16 MiB */ 16 * 1_024 * 1_024,
            max_inflight_commits: 4_096,
            sync_on_commit: false,
            merge_operator: None,
            seqno: SequenceNumberCounter::default(),
            visible_seqno: SequenceNumberCounter::default(),
        }
    }
}

impl Config {
    /// Initializes a new config
    pub fn new<P: AsRef<Path>>(
        path: P,
        seqno: SequenceNumberCounter,
        visible_seqno: SequenceNumberCounter,
    ) -> Self {
        Self {
            path: absolute_path(path.as_ref()),
            seqno,
            visible_seqno,
            ..Default::default()
        }
    }

    /// Sets the memtable capacity.
    ///
    /// Once a batch does not fit anymore, the memtable is sealed
    /// and a fresh one is started.
    ///
    /// Defaults to 16 MiB.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is 0.
    #[must_use]
    pub fn max_memtable_size(mut self, bytes: u64) -> Self {
        assert!(bytes > 0);

        self.max_memtable_size = bytes;
        self
    }

    /// Sets the maximum number of in-flight commits.
    ///
    /// Further writers block until a commit finishes.
    /// The value is rounded up to the next power of two.
    ///
    /// Defaults to 4096.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    #[must_use]
    pub fn max_inflight_commits(mut self, n: usize) -> Self {
        assert!(n > 0);

        self.max_inflight_commits = n.next_power_of_two();
        self
    }

    /// If `true`, [`Engine::write`] waits for the write-ahead log to be synced.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn sync_on_commit(mut self, b: bool) -> Self {
        self.sync_on_commit = b;
        self
    }

    /// Installs a merge operator.
    #[must_use]
    pub fn merge_operator(mut self, merge_operator: Option<Arc<dyn MergeOperator>>) -> Self {
        self.merge_operator = merge_operator;
        self
    }

    /// Opens an engine using the config.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn open(self) -> crate::Result<Engine> {
        Engine::open(self)
    }
}
