// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::SeqNo;
use std::sync::{
    atomic::{
        AtomicBool, AtomicU64,
        Ordering::{AcqRel, Acquire, Release},
    },
    Arc, Condvar, Mutex,
};

/// A batch (or sequence number allocation) that went through prepare,
/// but has not been published yet
pub struct PendingCommit {
    seqno: SeqNo,
    count: u64,
    applied: AtomicBool,
    done: Mutex<bool>,
    done_signal: Condvar,
}

impl PendingCommit {
    pub fn new(seqno: SeqNo, count: u64) -> Arc<Self> {
        debug_assert!(count > 0);

        Arc::new(Self {
            seqno,
            count,
            applied: AtomicBool::new(false),
            done: Mutex::new(false),
            done_signal: Condvar::new(),
        })
    }

    /// First sequence number of the reserved range.
    pub fn seqno(&self) -> SeqNo {
        self.seqno
    }

    /// Last sequence number of the reserved range.
    pub fn last_seqno(&self) -> SeqNo {
        self.seqno + self.count - 1
    }

    pub fn mark_applied(&self) {
        self.applied.store(true, Release);
    }

    pub fn is_applied(&self) -> bool {
        self.applied.load(Acquire)
    }

    /// Signals the submitter that its commit is visible.
    pub fn mark_done(&self) {
        let mut done = self.done.lock().expect("lock is poisoned");
        *done = true;
        self.done_signal.notify_all();
    }

    /// Blocks until [`PendingCommit::mark_done`] was called.
    pub fn wait_done(&self) {
        let mut done = self.done.lock().expect("lock is poisoned");

        while !*done {
            done = self.done_signal.wait(done).expect("lock is poisoned");
        }
    }
}

/// Fixed-size ring of pending commits in submission order
///
/// Producers are serialized by the pipeline's prepare lock,
/// so only the head is contended between publishers.
pub struct CommitQueue {
    head: AtomicU64,
    tail: AtomicU64,
    slots: Box<[Mutex<Option<Arc<PendingCommit>>>]>,
}

impl CommitQueue {
    /// Creates a queue holding up to `capacity` pending commits.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "commit queue capacity must be a power of two"
        );

        Self {
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
            slots: (0..capacity).map(|_| Mutex::new(None)).collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        let tail = self.tail.load(Acquire);
        let head = self.head.load(Acquire);

        #[allow(clippy::cast_possible_truncation)]
        let len = tail.saturating_sub(head) as usize;

        len
    }

    #[allow(clippy::cast_possible_truncation)]
    fn slot(&self, ticket: u64) -> &Mutex<Option<Arc<PendingCommit>>> {
        let mask = self.slots.len() as u64 - 1;

        // NOTE: mask keeps the index in bounds
        #[allow(clippy::indexing_slicing)]
        &self.slots[(ticket & mask) as usize]
    }

    /// Appends a pending commit at the tail.
    ///
    /// Must be called with the prepare lock held.
    ///
    /// # Panics
    ///
    /// Panics if the queue is full. The pipeline's permits make this unreachable.
    pub fn enqueue(&self, commit: Arc<PendingCommit>) {
        let ticket = self.tail.load(Acquire);

        assert!(
            self.len() < self.capacity(),
            "commit queue is full, permits are out of sync",
        );

        let mut slot = self.slot(ticket).lock().expect("lock is poisoned");
        debug_assert!(slot.is_none(), "slot should have been drained");
        *slot = Some(commit);
        drop(slot);

        self.tail.store(ticket + 1, Release);
    }

    /// Removes and returns the head entry, but only if it is applied.
    ///
    /// Returns `None` if the queue is empty or the head is still being written.
    pub fn dequeue(&self) -> Option<Arc<PendingCommit>> {
        loop {
            let head = self.head.load(Acquire);

            if head == self.tail.load(Acquire) {
                return None;
            }

            let slot = self.slot(head);

            {
                let guard = slot.lock().expect("lock is poisoned");

                match guard.as_ref() {
                    Some(commit) if commit.is_applied() => {}
                    _ => return None,
                }
            }

            // Another publisher may have taken the head in the meantime
            if self
                .head
                .compare_exchange(head, head + 1, AcqRel, Acquire)
                .is_ok()
            {
                return slot.lock().expect("lock is poisoned").take();
            }
        }
    }
}
