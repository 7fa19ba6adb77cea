// Copyright 2025 The jobq authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Synchronization primitives: a monitor whose single lock can be paired with
//! several condition variables.

use std::sync::{Condvar, Mutex, MutexGuard};

/// Mutex-guarded shared state.
///
/// Lock poisoning is treated as fatal: a poisoned monitor means some thread
/// panicked while holding the lock, and the protocol built on top of it can no
/// longer guarantee progress.
pub struct Monitor<T> {
    state: Mutex<T>,
}

impl<T> Monitor<T> {
    /// Creates a new monitor initialized with the given state.
    pub fn new(t: T) -> Self {
        Self {
            state: Mutex::new(t),
        }
    }

    /// Acquires the lock, panicking if it is poisoned.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.state.lock().unwrap()
    }
}

/// A condition to wait on and signal, tied to a [`Monitor`]'s lock through the
/// guards passed into the wait methods.
///
/// Several events may share one monitor. The wait methods atomically release
/// and reacquire the monitor's lock (standard monitor semantics).
pub struct Event {
    condvar: Condvar,
}

impl Event {
    /// Creates a new event with no waiters.
    pub fn new() -> Self {
        Self {
            condvar: Condvar::new(),
        }
    }

    /// Wakes one thread blocked on this event, if any.
    pub fn notify_one(&self) {
        self.condvar.notify_one();
    }

    /// Wakes every thread blocked on this event.
    pub fn notify_all(&self) {
        self.condvar.notify_all();
    }

    /// Blocks until woken.
    ///
    /// Wakeups may be spurious: the caller must re-test its predicate and wait
    /// again if it doesn't hold.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.condvar.wait(guard).unwrap()
    }

    /// Blocks while the predicate holds, re-testing it after every wakeup.
    pub fn wait_while<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        predicate: impl FnMut(&mut T) -> bool,
    ) -> MutexGuard<'a, T> {
        self.condvar.wait_while(guard, predicate).unwrap()
    }
}
