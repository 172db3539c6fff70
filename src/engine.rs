// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    commit::{CommitEnv, CommitPipeline, LogPosition},
    memtable::Memtable,
    merge::{MergingIter, MergingIterLevel},
    range_tombstone::RangeTombstone,
    run::SortedRun,
    wal::{Wal, WAL_FILE},
    Batch, Config, InternalValue, MvccStream, SeqNo, UserKey, UserValue, ValueType,
};
use std::{
    ops::Deref,
    sync::{Arc, RwLock},
};

/// An immutable layer below the active memtable
#[derive(Clone)]
pub enum Layer {
    /// Memtable that was sealed by a rotation
    Memtable(Arc<Memtable>),

    /// Run installed by [`Engine::ingest`]
    Run(Arc<SortedRun>),
}

impl Layer {
    fn merging_level(&self) -> MergingIterLevel<'static> {
        match self {
            Self::Memtable(memtable) => memtable_level(memtable),
            Self::Run(run) => {
                let level = MergingIterLevel::new(Box::new(run.iter()))
                    .with_largest_user_key(run.largest_user_key().cloned());

                match run.tombstone_iter() {
                    Some(tombstones) => level.with_tombstones(Box::new(tombstones)),
                    None => level,
                }
            }
        }
    }
}

fn memtable_level(memtable: &Arc<Memtable>) -> MergingIterLevel<'static> {
    let level = MergingIterLevel::new(Box::new(memtable.iter()));

    match memtable.tombstone_iter() {
        Some(tombstones) => level.with_tombstones(Box::new(tombstones)),
        None => level,
    }
}

/// The set of data sources a read sees
#[derive(Clone)]
pub struct SuperVersion {
    /// Active memtable that is being written to
    pub(crate) active_memtable: Arc<Memtable>,

    /// Sealed memtables and ingested runs, newest first
    pub(crate) layers: Arc<Vec<Layer>>,
}

/// Write-ahead log and memtables, written to by the commit pipeline
pub struct Storage {
    wal: Wal,
    max_memtable_size: u64,
    super_version: RwLock<SuperVersion>,
}

impl Storage {
    fn new(wal: Wal, max_memtable_size: u64) -> Self {
        Self {
            wal,
            max_memtable_size,
            super_version: RwLock::new(SuperVersion {
                active_memtable: Arc::new(Memtable::new(max_memtable_size)),
                layers: Arc::default(),
            }),
        }
    }

    fn current_version(&self) -> SuperVersion {
        self.super_version.read().expect("lock is poisoned").clone()
    }

    fn active_memtable(&self) -> Arc<Memtable> {
        self.super_version
            .read()
            .expect("lock is poisoned")
            .active_memtable
            .clone()
    }

    fn seal_active(version: &mut SuperVersion, max_memtable_size: u64) {
        let yanked = std::mem::replace(
            &mut version.active_memtable,
            Arc::new(Memtable::new(max_memtable_size)),
        );

        let mut layers = Vec::with_capacity(version.layers.len() + 1);
        layers.push(Layer::Memtable(yanked));
        layers.extend(version.layers.iter().cloned());
        version.layers = Arc::new(layers);
    }

    /// Seals the active memtable, unless nothing was prepared into it.
    ///
    /// Must be called under the prepare lock.
    fn rotate(&self) -> bool {
        let mut version = self.super_version.write().expect("lock is poisoned");

        if version.active_memtable.size() == 0 {
            return false;
        }

        Self::seal_active(&mut version, self.max_memtable_size);

        log::debug!(
            "Rotated memtable, {} sealed layers now",
            version.layers.len()
        );

        true
    }

    /// Seals `full` if it is still the active memtable,
    /// returning the memtable to retry with.
    ///
    /// Must be called under the prepare lock.
    fn rotate_full(&self, full: &Arc<Memtable>) -> Arc<Memtable> {
        let mut version = self.super_version.write().expect("lock is poisoned");

        if Arc::ptr_eq(&version.active_memtable, full) {
            Self::seal_active(&mut version, self.max_memtable_size);

            log::debug!(
                "Memtable is full ({}B), rotated to a fresh one",
                full.size()
            );
        }

        version.active_memtable.clone()
    }

    /// Must be called under the prepare lock, after every earlier batch was published.
    fn install_run(&self, run: Arc<SortedRun>) {
        let mut version = self.super_version.write().expect("lock is poisoned");

        let mut layers = Vec::with_capacity(version.layers.len() + 1);
        layers.push(Layer::Run(run));
        layers.extend(version.layers.iter().cloned());
        version.layers = Arc::new(layers);
    }
}

impl CommitEnv for Storage {
    type Target = Arc<Memtable>;

    fn prepare(&self, batch: &Batch) -> Self::Target {
        let mut memtable = self.active_memtable();

        // NOTE: A fresh memtable accepts any batch, so this ends after one rotation
        while memtable.prepare(batch).is_err() {
            memtable = self.rotate_full(&memtable);
        }

        memtable
    }

    fn write(&self, batch: &Batch) -> crate::Result<LogPosition> {
        self.wal.append(batch.data())
    }

    fn apply(&self, batch: &Batch, target: Self::Target) -> crate::Result<()> {
        target.apply_prepared(batch)
    }

    fn sync(&self, position: LogPosition) -> crate::Result<()> {
        self.wal.sync_up_to(position)
    }
}

/// Shared state of an [`Engine`]
#[allow(clippy::module_name_repetitions)]
pub struct EngineInner {
    /// Engine configuration
    pub config: Config,

    pipeline: CommitPipeline<Storage>,
}

/// A storage engine core
///
/// Writes go through a [`CommitPipeline`] into the write-ahead log and
/// the active memtable. Reads merge the active memtable, sealed memtables
/// and ingested runs through a [`MergingIter`].
///
/// The engine is cheaply clonable; clones share the same state.
///
/// # Examples
///
/// ```
/// # let folder = tempfile::tempdir()?;
/// use lsm_core::{Config, SequenceNumberCounter};
///
/// let engine = Config::new(
///     &folder,
///     SequenceNumberCounter::default(),
///     SequenceNumberCounter::default(),
/// )
/// .open()?;
///
/// engine.insert("a", "hello")?;
/// assert_eq!(Some("hello".into()), engine.get("a", None)?);
///
/// engine.remove("a")?;
/// assert_eq!(None, engine.get("a", None)?);
/// #
/// # Ok::<(), lsm_core::Error>(())
/// ```
#[derive(Clone)]
pub struct Engine(Arc<EngineInner>);

impl Deref for Engine {
    type Target = EngineInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Engine({:?}, {:?})", self.config.path, self.pipeline)
    }
}

impl Engine {
    /// Opens an engine in the configured folder.
    ///
    /// Records of an existing write-ahead log are kept, but not replayed.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub(crate) fn open(config: Config) -> crate::Result<Self> {
        std::fs::create_dir_all(&config.path)?;

        let wal = Wal::open(config.path.join(WAL_FILE))?;
        let storage = Storage::new(wal, config.max_memtable_size);

        let pipeline = CommitPipeline::new(
            storage,
            config.seqno.clone(),
            config.visible_seqno.clone(),
            config.max_inflight_commits,
        );

        log::info!(
            "Opened engine at {} (seqno={}, visible={})",
            config.path.display(),
            pipeline.log_seqno(),
            pipeline.visible_seqno(),
        );

        Ok(Self(Arc::new(EngineInner { config, pipeline })))
    }

    fn storage(&self) -> &Storage {
        self.pipeline.env()
    }

    /// Returns the write-ahead log.
    #[doc(hidden)]
    #[must_use]
    pub fn wal(&self) -> &Wal {
        &self.storage().wal
    }

    /// Commits a batch, syncing if configured with [`Config::sync_on_commit`].
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    ///
    /// # Panics
    ///
    /// Panics if the batch was already committed.
    pub fn write(&self, batch: &mut Batch) -> crate::Result<()> {
        self.write_opt(batch, self.config.sync_on_commit)
    }

    /// Commits a batch, syncing the write-ahead log if `sync` is set.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    ///
    /// # Panics
    ///
    /// Panics if the batch was already committed.
    pub fn write_opt(&self, batch: &mut Batch, sync: bool) -> crate::Result<()> {
        self.pipeline.commit(batch, sync)
    }

    /// Inserts a key-value pair, returning its sequence number.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn insert<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, key: K, value: V) -> crate::Result<SeqNo> {
        let mut batch = Batch::new();
        batch.insert(key, value);
        self.write(&mut batch)?;
        Ok(batch.seqno())
    }

    /// Removes a key, returning the tombstone's sequence number.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn remove<K: AsRef<[u8]>>(&self, key: K) -> crate::Result<SeqNo> {
        let mut batch = Batch::new();
        batch.remove(key);
        self.write(&mut batch)?;
        Ok(batch.seqno())
    }

    /// Removes all keys in `[start, end)`, returning the tombstone's sequence number.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    ///
    /// # Panics
    ///
    /// Panics if `start >= end`.
    pub fn remove_range<K: AsRef<[u8]>>(&self, start: K, end: K) -> crate::Result<SeqNo> {
        let mut batch = Batch::new();
        batch.remove_range(start, end);
        self.write(&mut batch)?;
        Ok(batch.seqno())
    }

    /// Returns the highest sequence number visible to readers.
    #[must_use]
    pub fn snapshot_seqno(&self) -> SeqNo {
        self.pipeline.visible_seqno()
    }

    /// Returns the highest sequence number that was handed out.
    #[must_use]
    pub fn log_seqno(&self) -> SeqNo {
        self.pipeline.log_seqno()
    }

    /// Returns a raw iterator over all versions visible at the snapshot.
    ///
    /// Defaults to the current snapshot.
    #[must_use]
    pub fn merging_iter(&self, snapshot: Option<SeqNo>) -> MergingIter<'static> {
        let snapshot = snapshot.unwrap_or_else(|| self.snapshot_seqno());
        let version = self.storage().current_version();

        let mut levels = Vec::with_capacity(version.layers.len() + 1);
        levels.push(memtable_level(&version.active_memtable));
        levels.extend(version.layers.iter().map(Layer::merging_level));

        MergingIter::with_snapshot(levels, snapshot)
    }

    /// Returns an iterator over the user keys visible at the snapshot.
    ///
    /// Defaults to the current snapshot.
    #[must_use]
    pub fn iter(&self, snapshot: Option<SeqNo>) -> MvccStream<'static> {
        MvccStream::new(self.merging_iter(snapshot))
            .with_merge_operator(self.config.merge_operator.clone())
    }

    /// Retrieves the value of a key as of the snapshot.
    ///
    /// Defaults to the current snapshot.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn get<K: AsRef<[u8]>>(
        &self,
        key: K,
        snapshot: Option<SeqNo>,
    ) -> crate::Result<Option<UserValue>> {
        let key = key.as_ref();

        let mut iter = self.iter(snapshot);
        let item = iter
            .seek_ge(key)
            .filter(|(k, _)| &**k == key)
            .map(|(_, v)| v);
        iter.close()?;

        Ok(item)
    }

    /// Installs a sorted run of key-value pairs and range deletions,
    /// returning the sequence number every item is stamped with.
    ///
    /// The active memtable is sealed first, so the run shadows every
    /// earlier write, and every later write shadows the run.
    ///
    /// The run is bounded by its largest key (item key or range end).
    ///
    /// # Panics
    ///
    /// Panics if the items are not sorted by key or contain duplicate keys,
    /// or if a range has `start >= end`.
    pub fn ingest(
        &self,
        items: Vec<(UserKey, UserValue)>,
        tombstones: Vec<(UserKey, UserKey)>,
    ) -> SeqNo {
        // NOTE: Validate before taking the prepare lock, a panic under it poisons the pipeline
        for pair in items.windows(2) {
            if let [(a, _), (b, _)] = pair {
                assert!(a < b, "ingested items must be sorted by key without duplicates");
            }
        }
        for (start, end) in &tombstones {
            assert!(start < end, "range tombstone start must be < end");
        }

        let largest_user_key = items
            .last()
            .map(|(key, _)| key)
            .into_iter()
            .chain(tombstones.iter().map(|(_, end)| end))
            .max()
            .cloned();

        let storage = self.storage();
        let item_count = items.len();
        let tombstone_count = tombstones.len();

        self.pipeline.allocate_seqno(
            1,
            |seqno| {
                storage.rotate();

                let items = items
                    .into_iter()
                    .map(|(key, value)| {
                        InternalValue::from_components(key, value, seqno, ValueType::Value)
                    })
                    .collect();

                let tombstones = tombstones
                    .into_iter()
                    .map(|(start, end)| RangeTombstone::new(start, end, seqno))
                    .collect();

                let mut run = SortedRun::new(items, tombstones);
                if let Some(key) = largest_user_key {
                    run = run.with_largest_user_key(key);
                }

                // NOTE: The run stays invisible until its seqno is published
                storage.install_run(Arc::new(run));
            },
            |seqno| {
                log::debug!(
                    "Ingested run with {item_count} items and {tombstone_count} range tombstones at seqno {seqno}",
                );
            },
        )
    }

    /// Seals the active memtable, unless it is empty.
    ///
    /// Returns `true` if a memtable was sealed.
    ///
    /// Batches that are in flight keep writing into the memtable they
    /// picked, so a sealed memtable never holds newer versions than the
    /// memtables above it.
    pub fn rotate_memtable(&self) -> bool {
        self.pipeline.with_prepare_lock(Storage::rotate)
    }

    /// Returns the number of sealed memtables.
    #[must_use]
    pub fn sealed_memtable_count(&self) -> usize {
        self.storage()
            .current_version()
            .layers
            .iter()
            .filter(|layer| matches!(layer, Layer::Memtable(_)))
            .count()
    }

    /// Returns the number of ingested runs.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.storage()
            .current_version()
            .layers
            .iter()
            .filter(|layer| matches!(layer, Layer::Run(_)))
            .count()
    }

    /// Returns the approximate size of the active memtable in bytes.
    #[must_use]
    pub fn active_memtable_size(&self) -> u64 {
        self.storage().active_memtable().size()
    }
}
