// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::sync::{Condvar, Mutex};

/// Counting semaphore bounding the number of in-flight commits
pub struct Permits {
    available: Mutex<usize>,
    signal: Condvar,
}

/// Returns its permit on drop
pub struct Permit<'a>(&'a Permits);

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let mut available = self.0.available.lock().expect("lock is poisoned");
        *available += 1;
        self.0.signal.notify_one();
    }
}

impl Permits {
    pub fn new(count: usize) -> Self {
        Self {
            available: Mutex::new(count),
            signal: Condvar::new(),
        }
    }

    /// Blocks until a permit is free.
    pub fn acquire(&self) -> Permit<'_> {
        let mut available = self.available.lock().expect("lock is poisoned");

        while *available == 0 {
            available = self.signal.wait(available).expect("lock is poisoned");
        }

        *available -= 1;

        Permit(self)
    }

    pub fn available(&self) -> usize {
        *self.available.lock().expect("lock is poisoned")
    }
}
