// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Messages travelling between endpoints, the link and transport sessions.
//!
//! A [`Message`] is an immutable payload (`Arc<[u8]>`, cheap to fan out) plus
//! routing metadata. Outbound frames and segments additionally hold a
//! [`TxCredit`] against the sending endpoint's [`SendBuffer`]; the credit is
//! returned when the message is dropped by whoever consumed it (link or
//! session). Copies queued to receivers never carry credit.

use crate::addr::Address;
use crate::error::{Error, Result};
use crate::wait::WaitQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Opaque identity of an endpoint on a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub(crate) u64);

impl EndpointId {
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Per-message delivery flags seen by receivers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MsgFlags {
    /// The message was sent by an endpoint on this host.
    pub loopback: bool,
    /// The message was sent by the receiving endpoint itself.
    pub confirm: bool,
}

/// Routing metadata attached to every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageMeta {
    /// Interface the message was sent on or received from.
    pub ifindex: i32,
    /// Source/destination/PGN.
    pub addr: Address,
    /// J1939 priority (0-7).
    pub priority: u8,
    /// Byte offset of this segment inside its logical message.
    pub offset: usize,
    /// Delivery flags.
    pub flags: MsgFlags,
    /// Local sender, `None` for frames received from the bus.
    pub origin: Option<EndpointId>,
    /// Creation time.
    pub timestamp: SystemTime,
}

/// Everything an endpoint stamps onto an outbound message.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OutboundTemplate {
    pub ifindex: i32,
    pub addr: Address,
    pub priority: u8,
    pub origin: EndpointId,
}

/// A J1939 message (single frame, segment, or received datagram).
#[derive(Debug)]
pub struct Message {
    meta: MessageMeta,
    payload: Arc<[u8]>,
    /// Returned to the sender's send buffer on drop.
    _credit: Option<TxCredit>,
}

impl Message {
    /// A message arriving from the bus on `ifindex`.
    #[must_use]
    pub fn inbound(ifindex: i32, addr: Address, priority: u8, payload: &[u8]) -> Self {
        Self {
            meta: MessageMeta {
                ifindex,
                addr,
                priority,
                offset: 0,
                flags: MsgFlags::default(),
                origin: None,
                timestamp: SystemTime::now(),
            },
            payload: Arc::from(payload),
            _credit: None,
        }
    }

    pub(crate) fn outbound(
        template: &OutboundTemplate,
        payload: &[u8],
        offset: usize,
        credit: TxCredit,
    ) -> Self {
        Self {
            meta: MessageMeta {
                ifindex: template.ifindex,
                addr: template.addr,
                priority: template.priority,
                offset,
                flags: MsgFlags::default(),
                origin: Some(template.origin),
                timestamp: SystemTime::now(),
            },
            payload: Arc::from(payload),
            _credit: Some(credit),
        }
    }

    #[inline]
    #[must_use]
    pub fn meta(&self) -> &MessageMeta {
        &self.meta
    }

    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Copy for a receive queue: shares the payload, drops send credit,
    /// clears delivery flags.
    #[must_use]
    pub fn clone_for_delivery(&self) -> Self {
        let mut meta = self.meta;
        meta.flags = MsgFlags::default();
        Self {
            meta,
            payload: Arc::clone(&self.payload),
            _credit: None,
        }
    }

    pub(crate) fn set_flags(&mut self, flags: MsgFlags) {
        self.meta.flags = flags;
    }
}

/// Per-endpoint accounting of bytes held by in-flight outbound messages.
#[derive(Debug)]
pub struct SendBuffer {
    capacity: usize,
    used: AtomicUsize,
    waitq: Arc<WaitQueue>,
}

impl SendBuffer {
    #[must_use]
    pub fn new(capacity: usize, waitq: Arc<WaitQueue>) -> Self {
        Self {
            capacity,
            used: AtomicUsize::new(0),
            waitq,
        }
    }

    #[must_use]
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// An empty buffer always admits one message, even an oversized one.
    fn try_reserve(&self, bytes: usize) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                if used == 0 || used + bytes <= self.capacity {
                    Some(used + bytes)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Reserve `bytes`; waits for space unless `dont_wait`.
    pub fn reserve(self: &Arc<Self>, bytes: usize, dont_wait: bool) -> Result<TxCredit> {
        if !self.try_reserve(bytes) {
            if dont_wait {
                return Err(Error::WouldBlock);
            }
            self.waitq.wait_until(|| self.try_reserve(bytes))?;
        }
        Ok(TxCredit {
            buffer: Arc::clone(self),
            bytes,
        })
    }

    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
        self.waitq.wake_all();
    }
}

/// Bytes reserved in a [`SendBuffer`], returned on drop.
#[derive(Debug)]
pub struct TxCredit {
    buffer: Arc<SendBuffer>,
    bytes: usize,
}

impl Drop for TxCredit {
    fn drop(&mut self) {
        self.buffer.release(self.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NO_PGN;

    fn template() -> OutboundTemplate {
        OutboundTemplate {
            ifindex: 1,
            addr: Address::new(0x10, 0x20, NO_PGN),
            priority: 6,
            origin: EndpointId(7),
        }
    }

    #[test]
    fn test_credit_released_on_drop() {
        let buf = Arc::new(SendBuffer::new(16, WaitQueue::shared()));
        let credit = buf.reserve(10, true).expect("space available");
        let msg = Message::outbound(&template(), &[0u8; 10], 0, credit);
        assert_eq!(buf.used(), 10);

        let copy = msg.clone_for_delivery();
        drop(msg);
        assert_eq!(buf.used(), 0);
        assert_eq!(copy.len(), 10);
        assert_eq!(copy.meta().origin, Some(EndpointId(7)));
    }

    #[test]
    fn test_reserve_would_block_when_full() {
        let buf = Arc::new(SendBuffer::new(16, WaitQueue::shared()));
        let _held = buf.reserve(12, true).expect("space available");
        assert!(matches!(buf.reserve(8, true), Err(Error::WouldBlock)));
        assert!(buf.reserve(4, true).is_ok());
    }

    #[test]
    fn test_oversized_reservation_admitted_when_empty() {
        let buf = Arc::new(SendBuffer::new(4, WaitQueue::shared()));
        let credit = buf.reserve(100, true).expect("empty buffer admits one message");
        assert_eq!(buf.used(), 100);
        drop(credit);
        assert_eq!(buf.used(), 0);
    }

    #[test]
    fn test_blocking_reserve_interrupted() {
        let waitq = WaitQueue::shared();
        let buf = Arc::new(SendBuffer::new(8, Arc::clone(&waitq)));
        let _held = buf.reserve(8, true).expect("space available");
        waitq.interrupt();
        assert!(matches!(buf.reserve(8, false), Err(Error::Interrupted)));
    }

    #[test]
    fn test_clone_for_delivery_clears_flags() {
        let mut msg = Message::inbound(1, Address::default(), 3, &[1, 2, 3]);
        msg.set_flags(MsgFlags {
            loopback: true,
            confirm: true,
        });
        let copy = msg.clone_for_delivery();
        assert_eq!(copy.meta().flags, MsgFlags::default());
        assert_eq!(copy.payload(), &[1, 2, 3]);
    }
}
