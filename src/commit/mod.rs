// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Commit pipeline
//!
//! Batches are committed in four steps:
//!
//! 1. *Prepare*: under the prepare lock, the batch reserves its sequence
//!    numbers, picks the memtable it is applied to and is appended to the
//!    commit queue.
//! 2. *Write*: the batch is appended to the write-ahead log.
//! 3. *Apply*: the batch is inserted into the memtable picked in step 1.
//! 4. *Publish*: the batch is marked as applied, and the commit queue is
//!    drained from its head, advancing the visible sequence number.
//!
//! Write and apply of different batches run concurrently. Because the queue
//! is drained in submission order, readers never observe a batch before all
//! batches with lower sequence numbers.
//!
//! Because targets are picked in sequence number order, a batch never lands
//! in a newer memtable than a batch with a higher sequence number.

pub(crate) mod permits;
pub(crate) mod queue;

use crate::{Batch, SeqNo, SequenceNumberCounter};
use permits::Permits;
use queue::{CommitQueue, PendingCommit};
use std::sync::{Arc, Condvar, Mutex};

/// Position in the write-ahead log, returned by [`CommitEnv::write`]
/// and handed back to [`CommitEnv::sync`]
pub type LogPosition = u64;

/// The environment a [`CommitPipeline`] writes batches into
///
/// Bundles the write-ahead log and the memtable a batch ends up in.
pub trait CommitEnv: Send + Sync {
    /// Data source a batch is applied to, chosen during [`CommitEnv::prepare`]
    type Target;

    /// Picks the target the batch is applied to and reserves room in it.
    ///
    /// Runs under the prepare lock, in sequence number order, after the
    /// batch was stamped. Must not block or re-enter the pipeline.
    fn prepare(&self, batch: &Batch) -> Self::Target;

    /// Appends the batch to the log.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the batch could not be logged.
    fn write(&self, batch: &Batch) -> crate::Result<LogPosition>;

    /// Applies the batch to the target.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the batch could not be applied.
    fn apply(&self, batch: &Batch, target: Self::Target) -> crate::Result<()>;

    /// Waits until the log is durable at least up to the given position.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    fn sync(&self, position: LogPosition) -> crate::Result<()>;
}

/// Assigns sequence numbers to batches and publishes them in order
///
/// # Examples
///
/// ```
/// use lsm_core::{Batch, CommitEnv, CommitPipeline, SequenceNumberCounter};
///
/// struct NoopEnv;
///
/// impl CommitEnv for NoopEnv {
///     type Target = ();
///
///     fn prepare(&self, _: &Batch) {}
///
///     fn write(&self, _: &Batch) -> lsm_core::Result<u64> {
///         Ok(0)
///     }
///
///     fn apply(&self, _: &Batch, (): ()) -> lsm_core::Result<()> {
///         Ok(())
///     }
///
///     fn sync(&self, _: u64) -> lsm_core::Result<()> {
///         Ok(())
///     }
/// }
///
/// let pipeline = CommitPipeline::new(
///     NoopEnv,
///     SequenceNumberCounter::default(),
///     SequenceNumberCounter::default(),
///     16,
/// );
///
/// let mut batch = Batch::new();
/// batch.insert("a", "1");
/// batch.insert("b", "2");
/// pipeline.commit(&mut batch, false)?;
///
/// assert_eq!(1, batch.seqno());
/// assert_eq!(2, pipeline.visible_seqno());
/// #
/// # Ok::<(), lsm_core::Error>(())
/// ```
pub struct CommitPipeline<E: CommitEnv> {
    env: E,

    /// Highest sequence number handed out
    log_seqno: SequenceNumberCounter,

    /// Highest sequence number readers may see
    visible_seqno: SequenceNumberCounter,

    queue: CommitQueue,
    permits: Permits,

    /// Serializes sequence number assignment, target selection and enqueueing
    prepare_lock: Mutex<()>,

    /// Signalled whenever the visible sequence number advances
    publish_lock: Mutex<()>,
    publish_signal: Condvar,
}

impl<E: CommitEnv> std::fmt::Debug for CommitPipeline<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CommitPipeline(log={}, visible={}, inflight={})",
            self.log_seqno(),
            self.visible_seqno(),
            self.queue.len(),
        )
    }
}

impl<E: CommitEnv> CommitPipeline<E> {
    /// Creates a pipeline that allows up to `capacity` in-flight commits.
    ///
    /// `capacity` is rounded up to the next power of two.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(
        env: E,
        log_seqno: SequenceNumberCounter,
        visible_seqno: SequenceNumberCounter,
        capacity: usize,
    ) -> Self {
        assert!(capacity > 0, "commit pipeline capacity must be > 0");

        let capacity = capacity.next_power_of_two();

        Self {
            env,
            log_seqno,
            visible_seqno,
            queue: CommitQueue::new(capacity),
            permits: Permits::new(capacity),
            prepare_lock: Mutex::new(()),
            publish_lock: Mutex::new(()),
            publish_signal: Condvar::new(),
        }
    }

    /// Returns the environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Returns the highest sequence number that was handed out.
    #[must_use]
    pub fn log_seqno(&self) -> SeqNo {
        self.log_seqno.get()
    }

    /// Returns the highest sequence number that is visible to readers.
    #[must_use]
    pub fn visible_seqno(&self) -> SeqNo {
        self.visible_seqno.get()
    }

    /// Returns the maximum number of in-flight commits.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Runs `f` while no batch can be prepared.
    ///
    /// Batches prepared before keep the target they picked, batches prepared
    /// afterwards observe every change `f` made to the environment.
    pub fn with_prepare_lock<R, F: FnOnce(&E) -> R>(&self, f: F) -> R {
        let _lock = self.prepare_lock.lock().expect("lock is poisoned");
        f(&self.env)
    }

    /// Commits a batch.
    ///
    /// Blocks until the batch is visible to readers and, if `sync` is set,
    /// durable. Every mutation of the batch is stamped with its own sequence
    /// number, starting at [`Batch::seqno`].
    ///
    /// A failed commit is still published, so it never blocks later batches.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the batch could not be logged, applied or synced.
    ///
    /// # Panics
    ///
    /// Panics if the batch was already committed.
    pub fn commit(&self, batch: &mut Batch, sync: bool) -> crate::Result<()> {
        batch.mark_committed();

        let _permit = self.permits.acquire();

        let (pending, target) = self.prepare(batch);
        let batch: &Batch = batch;

        let result = self
            .env
            .write(batch)
            .and_then(|position| {
                self.env.apply(batch, target)?;
                Ok(position)
            })
            .inspect_err(|e| {
                log::warn!(
                    "Commit of batch {} failed, it will not be durable: {e:?}",
                    pending.seqno(),
                );
            });

        self.publish(&pending);

        let position = result?;

        if sync {
            self.env.sync(position).inspect_err(|e| {
                log::warn!(
                    "Sync of batch {} failed, it may not be durable: {e:?}",
                    pending.seqno(),
                );
            })?;
        }

        Ok(())
    }

    /// Reserves `count` consecutive sequence numbers without writing a batch,
    /// returning the first one.
    ///
    /// `prepare` runs under the prepare lock, after every earlier commit has
    /// been published. `apply` runs afterwards. Both get the first reserved
    /// sequence number. Once `apply` returns, the reserved range is published.
    ///
    /// # Panics
    ///
    /// Panics if `count` is 0.
    pub fn allocate_seqno<P: FnOnce(SeqNo), A: FnOnce(SeqNo)>(
        &self,
        count: u64,
        prepare: P,
        apply: A,
    ) -> SeqNo {
        assert!(count > 0, "cannot allocate zero sequence numbers");

        let _permit = self.permits.acquire();

        let prepare_lock = self.prepare_lock.lock().expect("lock is poisoned");

        let seqno = self.log_seqno.reserve(count);
        let pending = PendingCommit::new(seqno, count);
        self.queue.enqueue(pending.clone());

        // NOTE: Earlier commits publish without the prepare lock,
        // so this cannot deadlock
        {
            let published = self.publish_lock.lock().expect("lock is poisoned");
            let _published = self
                .publish_signal
                .wait_while(published, |_| self.visible_seqno.get() < seqno - 1)
                .expect("lock is poisoned");
        }

        log::trace!("Allocated seqno range {seqno}..={}", pending.last_seqno());

        prepare(seqno);
        drop(prepare_lock);

        apply(seqno);

        self.publish(&pending);

        seqno
    }

    fn prepare(&self, batch: &mut Batch) -> (Arc<PendingCommit>, E::Target) {
        let _lock = self.prepare_lock.lock().expect("lock is poisoned");

        let count = batch.seqno_count();
        let seqno = self.log_seqno.reserve(count);
        batch.set_seqno(seqno);

        let target = self.env.prepare(batch);

        let pending = PendingCommit::new(seqno, count);
        self.queue.enqueue(pending.clone());

        log::trace!("Prepared batch with seqno range {seqno}..={}", pending.last_seqno());

        (pending, target)
    }

    fn publish(&self, pending: &PendingCommit) {
        pending.mark_applied();

        let mut published = false;

        while let Some(head) = self.queue.dequeue() {
            self.visible_seqno.fetch_max(head.last_seqno());

            log::trace!("Published seqno range {}..={}", head.seqno(), head.last_seqno());

            head.mark_done();
            published = true;
        }

        if published {
            let _lock = self.publish_lock.lock().expect("lock is poisoned");
            self.publish_signal.notify_all();
        }

        // Some earlier commit is still in flight, its publisher will drain us
        pending.wait_done();
    }
}
