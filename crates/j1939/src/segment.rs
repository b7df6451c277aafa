// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Segmented send: split an oversized write and hand it to a transport session.
//!
//! A logical message may arrive in several writes. The endpoint remembers the
//! declared size of the message in flight (`complete`) and how much of it was
//! already handed over (`done`):
//!
//! ```text
//! write #1 (done == 0)  : complete = len, pending += 1, create session
//! write #n (done  > 0)  : complete must equal done + len, look session up
//! ```
//!
//! Each write is cut into segments of at most `max_segment` bytes; every
//! segment carries its byte offset inside the logical message.
//!
//! Failure handling:
//!
//! - session creation/lookup/attach failure: drop the segment, reset
//!   `done`, return the error
//! - retriable failure (`WouldBlock`, `Interrupted`) after progress: return
//!   the bytes queued and keep `done` so the caller can continue
//! - any other failure: reset `done`, return the error
//!
//! Segments already attached are never taken back; the session layer aborts
//! the transfer downstream.

use crate::completion::SessionOwner;
use crate::config::{MAX_ETP_PACKET_SIZE, MAX_TP_PACKET_SIZE};
use crate::endpoint::EndpointCore;
use crate::error::{Error, Result};
use crate::iface::Interface;
use crate::message::{Message, OutboundTemplate};
use crate::session::{SessionHandle, SessionKey};
use std::sync::Arc;

/// Progress of the logical message currently being written.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TxProgress {
    /// Declared size of the logical message.
    pub complete: usize,
    /// Bytes already handed to the session.
    pub done: usize,
}

impl TxProgress {
    #[inline]
    pub fn in_flight(&self) -> bool {
        self.done != 0
    }
}

/// Queue `payload` as one or more segments of the endpoint's logical message.
pub(crate) fn send_multi(
    core: &Arc<EndpointCore>,
    iface: &Interface,
    template: &OutboundTemplate,
    payload: &[u8],
    dont_wait: bool,
    max_segment: usize,
) -> Result<usize> {
    let size = payload.len();
    let max_segment = max_segment.max(1);
    let mut tx = core.tx.lock();

    let fresh = !tx.in_flight();
    if fresh {
        if size > MAX_ETP_PACKET_SIZE {
            return Err(Error::MessageTooLarge(size));
        }
        core.pending.add();
        tx.complete = size;
    } else if tx.complete != tx.done + size {
        log::debug!(
            "[SEGMENT] endpoint {} continuation of {} bytes does not fit (complete={} done={})",
            core.id.as_u64(),
            size,
            tx.complete,
            tx.done
        );
        return Err(Error::Io("continuation does not match declared message size"));
    }

    let extended = tx.complete > MAX_TP_PACKET_SIZE;
    let key = SessionKey::from(&template.addr);
    let mut session: Option<SessionHandle> = None;
    let mut created = false;
    let mut todo = size;
    let mut status = Ok(());

    while todo > 0 {
        let seg_len = todo.min(max_segment);
        let start = size - todo;

        let credit = match core.sndbuf.reserve(seg_len, dont_wait) {
            Ok(credit) => credit,
            Err(e) => {
                status = Err(e);
                break;
            }
        };
        let segment =
            Message::outbound(template, &payload[start..start + seg_len], tx.done, credit);

        let attached = match &session {
            Some(s) => s.queue_segment(segment),
            None => match open_session(core, iface, &key, &tx, extended) {
                Ok(s) => {
                    created = !tx.in_flight();
                    let queued = s.queue_segment(segment);
                    session = Some(s);
                    queued
                }
                Err(e) => Err(e),
            },
        };

        if let Err(e) = attached {
            log::debug!(
                "[SEGMENT] endpoint {} segment at offset {} not attached: {}",
                core.id.as_u64(),
                tx.done,
                e
            );
            tx.done = 0;
            if fresh && !created {
                core.pending.del();
            }
            return Err(e);
        }

        todo -= seg_len;
        tx.done += seg_len;
    }

    match status {
        Ok(()) => {
            log::debug!(
                "[SEGMENT] endpoint {} queued {} of {} bytes (extended={}, new_session={})",
                core.id.as_u64(),
                size,
                tx.complete,
                extended,
                created
            );
            tx.done = 0;
            Ok(size)
        }
        Err(e) => {
            if fresh && !created {
                core.pending.del();
            }
            if e.is_retriable() {
                if todo != size {
                    return Ok(size - todo);
                }
                return Err(e);
            }
            tx.done = 0;
            Err(e)
        }
    }
}

/// First segment of this write: create the session for a new message, or
/// find the one a previous write started.
fn open_session(
    core: &Arc<EndpointCore>,
    iface: &Interface,
    key: &SessionKey,
    tx: &TxProgress,
    extended: bool,
) -> Result<SessionHandle> {
    if tx.in_flight() {
        return iface
            .sessions()
            .lookup_session(key, extended, true)?
            .ok_or(Error::NotFound);
    }
    let owner: Arc<dyn SessionOwner> = Arc::clone(core) as Arc<dyn SessionOwner>;
    iface
        .sessions()
        .create_session(*key, tx.complete, extended, owner)
}
