// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Interruptible wait queue and the pending-transfer counter.
//!
//! Every blocking point of an endpoint (close waiting for pending transfers,
//! blocking receive, send buffer exhaustion) parks on the endpoint's single
//! [`WaitQueue`]. State changes are published first (atomics / lock-free
//! queues), then [`WaitQueue::wake_all`] takes the queue lock and signals, so
//! a waiter that re-checks its predicate under the same lock cannot miss a
//! wakeup.
//!
//! [`WaitQueue::interrupt`] plays the role of a signal: the next (or current)
//! waiter returns [`Error::Interrupted`] and consumes it.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Condvar-backed wait queue with a one-shot interrupt flag.
#[derive(Debug, Default)]
pub struct WaitQueue {
    lock: Mutex<()>,
    cond: Condvar,
    interrupted: AtomicBool,
}

impl WaitQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Wake every waiter so it re-evaluates its predicate.
    pub fn wake_all(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    /// Cancel the current (or next) blocking wait.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        self.wake_all();
    }

    /// Block until `ready()` returns true.
    ///
    /// `ready` runs under the queue lock. Returns [`Error::Interrupted`] if an
    /// interrupt is pending while the predicate is still false.
    pub fn wait_until<F>(&self, mut ready: F) -> Result<()>
    where
        F: FnMut() -> bool,
    {
        let mut guard = self.lock.lock();
        loop {
            if ready() {
                return Ok(());
            }
            if self.interrupted.swap(false, Ordering::AcqRel) {
                return Err(Error::Interrupted);
            }
            self.cond.wait(&mut guard);
        }
    }
}

/// Number of segmented transfers still owned by the session layer.
///
/// Incremented when the first segment of a logical message is handed out,
/// decremented by the session layer when the transfer finishes or aborts.
/// Reaching zero wakes the endpoint's wait queue.
#[derive(Debug)]
pub struct PendingCounter {
    count: AtomicUsize,
    waitq: Arc<WaitQueue>,
}

impl PendingCounter {
    #[must_use]
    pub fn new(waitq: Arc<WaitQueue>) -> Self {
        Self {
            count: AtomicUsize::new(0),
            waitq,
        }
    }

    #[inline]
    pub fn add(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement; wakes waiters when the count reaches zero.
    pub fn del(&self) {
        let prev = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match prev {
            Ok(1) => self.waitq.wake_all(),
            Ok(_) => {}
            Err(_) => log::warn!("[ENDPOINT] pending counter underflow ignored"),
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Block until no transfer is pending (interruptible).
    pub fn wait_idle(&self) -> Result<()> {
        self.waitq.wait_until(|| self.get() == 0)
    }
}
