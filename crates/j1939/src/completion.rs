// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Completion / error channel for segmented sends.
//!
//! Transport sessions report lifecycle events of the transfer they carry
//! (scheduled, acknowledged by the remote, aborted) back to the endpoint that
//! started it. The endpoint turns each event into a [`Notification`] and
//! queues it on its [`ErrorQueue`], separate from (and unordered relative to)
//! the data receive queue.
//!
//! Sessions without an originating endpoint (pure receive transfers) never
//! notify, and an endpoint with the error queue disabled drops events.

use crate::config::TP_PACKET_PAYLOAD;
use crate::error::Error;
use crate::session::TransportSession;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;

/// Lifecycle event emitted by a transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionEvent {
    /// The remote side acknowledged the whole transfer.
    Acknowledged,
    /// The session started transmitting the transfer.
    Scheduled,
    /// The transfer was abandoned; carries the errno reason.
    Aborted(i32),
}

/// Record class, mirroring the two error-queue origins of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Progress stamp (ack or schedule).
    Timestamping,
    /// Local transmit failure.
    LocalError,
}

/// Where the notification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOrigin {
    /// Remote acknowledgment.
    RemoteAck,
    /// Local send schedule.
    LocalSchedule,
    /// Local abort with reason code.
    LocalAbort,
}

/// How far a session got with its transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionProgress {
    /// Data packets confirmed so far.
    pub packets_done: usize,
    /// Declared size of the logical message.
    pub total_size: usize,
}

impl SessionProgress {
    /// Acknowledged byte estimate, capped at the declared size.
    #[must_use]
    pub fn bytes_acked(&self) -> usize {
        self.packets_done
            .saturating_mul(TP_PACKET_PAYLOAD)
            .min(self.total_size)
    }
}

/// One entry of an endpoint's error queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub origin: NotificationOrigin,
    /// `ENOMSG` for timestamping records, the abort reason otherwise.
    pub errno: i32,
    pub bytes_acked: usize,
    pub total_size: usize,
    pub timestamp: SystemTime,
}

impl Notification {
    #[must_use]
    pub fn from_event(event: CompletionEvent, progress: SessionProgress) -> Self {
        let (kind, origin, errno) = match event {
            CompletionEvent::Acknowledged => (
                NotificationKind::Timestamping,
                NotificationOrigin::RemoteAck,
                libc::ENOMSG,
            ),
            CompletionEvent::Scheduled => (
                NotificationKind::Timestamping,
                NotificationOrigin::LocalSchedule,
                libc::ENOMSG,
            ),
            CompletionEvent::Aborted(reason) => (
                NotificationKind::LocalError,
                NotificationOrigin::LocalAbort,
                reason,
            ),
        };
        Self {
            kind,
            origin,
            errno,
            bytes_acked: progress.bytes_acked(),
            total_size: progress.total_size,
            timestamp: SystemTime::now(),
        }
    }
}

/// Back-reference from a transport session to the endpoint that started it.
pub trait SessionOwner: Send + Sync {
    /// Queue a completion record. Returns false if it was not queued.
    fn notify(&self, event: CompletionEvent, progress: SessionProgress) -> bool;

    /// The transfer is over (success or abort); releases one pending slot.
    fn transfer_finished(&self);

    /// Record a sticky error for the owner to pick up.
    fn abort(&self, error: Error);
}

/// Bounded per-endpoint notification queue.
#[derive(Debug)]
pub struct ErrorQueue {
    enabled: AtomicBool,
    queue: ArrayQueue<Notification>,
    dropped: AtomicU64,
}

impl ErrorQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            queue: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enable or disable reporting. Disabling discards queued records.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        if !enabled {
            self.purge();
        }
    }

    /// Queue `notification` if reporting is enabled.
    pub fn push(&self, notification: Notification) -> bool {
        if !self.is_enabled() {
            return false;
        }
        match self.queue.push(notification) {
            Ok(()) => true,
            Err(dropped) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "[ERRQUEUE] queue full, dropping {:?} notification",
                    dropped.origin
                );
                false
            }
        }
    }

    pub fn pop(&self) -> Option<Notification> {
        self.queue.pop()
    }

    /// Discard everything queued; returns how many records were removed.
    pub fn purge(&self) -> usize {
        let mut purged = 0;
        while self.queue.pop().is_some() {
            purged += 1;
        }
        purged
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Records lost to overflow since creation.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Report `event` for `session` to its originating endpoint, if any.
pub fn notify(session: &dyn TransportSession, event: CompletionEvent) -> bool {
    match session.owner() {
        Some(owner) => owner.notify(event, session.progress()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_acked_is_capped() {
        let p = SessionProgress {
            packets_done: 3,
            total_size: 20,
        };
        assert_eq!(p.bytes_acked(), 20);

        let p = SessionProgress {
            packets_done: 2,
            total_size: 20,
        };
        assert_eq!(p.bytes_acked(), 14);
    }

    #[test]
    fn test_notification_origins() {
        let progress = SessionProgress {
            packets_done: 0,
            total_size: 100,
        };
        let ack = Notification::from_event(CompletionEvent::Acknowledged, progress);
        assert_eq!(ack.origin, NotificationOrigin::RemoteAck);
        assert_eq!(ack.kind, NotificationKind::Timestamping);
        assert_eq!(ack.errno, libc::ENOMSG);

        let sched = Notification::from_event(CompletionEvent::Scheduled, progress);
        assert_eq!(sched.origin, NotificationOrigin::LocalSchedule);

        let abort = Notification::from_event(CompletionEvent::Aborted(libc::ETIME), progress);
        assert_eq!(abort.origin, NotificationOrigin::LocalAbort);
        assert_eq!(abort.kind, NotificationKind::LocalError);
        assert_eq!(abort.errno, libc::ETIME);
    }

    #[test]
    fn test_disabled_queue_drops_everything() {
        let q = ErrorQueue::new(4);
        let n = Notification::from_event(CompletionEvent::Scheduled, SessionProgress::default());
        assert!(!q.push(n.clone()));
        assert!(q.is_empty());

        q.set_enabled(true);
        assert!(q.push(n.clone()));
        assert!(q.push(n));
        assert_eq!(q.len(), 2);

        q.set_enabled(false);
        assert!(q.is_empty());
    }

    #[test]
    fn test_overflow_counts_drops() {
        let q = ErrorQueue::new(1);
        q.set_enabled(true);
        let n = Notification::from_event(CompletionEvent::Acknowledged, SessionProgress::default());
        assert!(q.push(n.clone()));
        assert!(!q.push(n));
        assert_eq!(q.dropped(), 1);
        assert!(q.pop().is_some());
        assert!(q.pop().is_none());
    }
}
