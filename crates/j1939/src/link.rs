// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Physical link abstraction.
//!
//! A [`CanLink`] puts single frames on the wire. Frame encoding (29-bit id,
//! DLC) and device lifecycle belong to the implementation; the stack only
//! needs "transmit this message or tell me why not".
//!
//! # Implementations
//!
//! - [`NullLink`] - accepts and discards every frame
//! - [`RecordingLink`] - keeps transmitted frames, can inject failures

use crate::message::{Message, MessageMeta};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

/// Link statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LinkStats {
    /// Frames accepted by the link.
    pub frames_sent: u64,
    /// Payload bytes accepted by the link.
    pub bytes_sent: u64,
    /// Transmit failures.
    pub send_errors: u64,
}

/// Single-frame transmitter for one interface.
pub trait CanLink: Send + Sync {
    /// Transmit one frame.
    fn transmit(&self, frame: &Message) -> io::Result<()>;

    /// Get link statistics.
    ///
    /// Default implementation returns empty statistics.
    fn stats(&self) -> LinkStats {
        LinkStats::default()
    }
}

#[derive(Debug, Default)]
struct AtomicLinkStats {
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_errors: AtomicU64,
}

impl AtomicLinkStats {
    fn record_ok(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_err(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LinkStats {
        LinkStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// NullLink
// ============================================================================

/// Link that drops every frame after counting it.
#[derive(Debug, Default)]
pub struct NullLink {
    stats: AtomicLinkStats,
}

impl NullLink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CanLink for NullLink {
    fn transmit(&self, frame: &Message) -> io::Result<()> {
        self.stats.record_ok(frame.len());
        Ok(())
    }

    fn stats(&self) -> LinkStats {
        self.stats.snapshot()
    }
}

// ============================================================================
// RecordingLink
// ============================================================================

/// Copy of a frame handed to a [`RecordingLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub meta: MessageMeta,
    pub payload: Vec<u8>,
}

/// Link that records every transmitted frame.
///
/// Failures queued with [`RecordingLink::fail_next`] are returned by the
/// following transmits, one per call.
#[derive(Debug, Default)]
pub struct RecordingLink {
    frames: Mutex<Vec<SentFrame>>,
    failures: Mutex<VecDeque<io::ErrorKind>>,
    stats: AtomicLinkStats,
}

impl RecordingLink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next transmit fail with `kind`.
    pub fn fail_next(&self, kind: io::ErrorKind) {
        self.failures.lock().push_back(kind);
    }

    /// Frames transmitted so far.
    #[must_use]
    pub fn frames(&self) -> Vec<SentFrame> {
        self.frames.lock().clone()
    }

    /// Remove and return the recorded frames.
    pub fn take_frames(&self) -> Vec<SentFrame> {
        std::mem::take(&mut *self.frames.lock())
    }
}

impl CanLink for RecordingLink {
    fn transmit(&self, frame: &Message) -> io::Result<()> {
        if let Some(kind) = self.failures.lock().pop_front() {
            self.stats.record_err();
            return Err(io::Error::new(kind, "injected link failure"));
        }
        self.frames.lock().push(SentFrame {
            meta: *frame.meta(),
            payload: frame.payload().to_vec(),
        });
        self.stats.record_ok(frame.len());
        Ok(())
    }

    fn stats(&self) -> LinkStats {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Address;

    #[test]
    fn test_recording_link_records_and_fails() {
        let link = RecordingLink::new();
        let frame = Message::inbound(1, Address::default(), 6, &[1, 2, 3]);

        link.transmit(&frame).expect("transmit");
        link.fail_next(io::ErrorKind::Other);
        assert!(link.transmit(&frame).is_err());
        link.transmit(&frame).expect("transmit after failure");

        let stats = link.stats();
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.bytes_sent, 6);
        assert_eq!(stats.send_errors, 1);
        assert_eq!(link.take_frames().len(), 2);
        assert!(link.frames().is_empty());
    }

    #[test]
    fn test_null_link_counts() {
        let link = NullLink::new();
        let frame = Message::inbound(1, Address::default(), 6, &[0; 8]);
        link.transmit(&frame).expect("transmit");
        assert_eq!(link.stats().bytes_sent, 8);
    }
}
