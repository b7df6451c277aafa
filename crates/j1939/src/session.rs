// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport session collaborator.
//!
//! A transport session carries one segmented transfer between two peers. The
//! frame-level protocol (RTS/CTS, data packets, retries, timeouts) lives
//! behind [`SessionManager`]; the send path only creates sessions, finds them
//! again for continuation segments, and hands segments over.
//!
//! [`SessionTable`] is the in-process manager every [`crate::Interface`] gets
//! by default. It keeps queued segments and exposes a driver API
//! (`schedule`, `acknowledge`, `complete`, `abort`) through which a protocol
//! engine (or a test) reports the transfer's progress back to the sender.
//!
//! # Lifecycle
//!
//! ```text
//! create_session ──→ Active ──┬── complete() ──→ removed (Acknowledged)
//!                      │      └── abort(err) ──→ removed (Aborted)
//!                 queue_segment
//! ```
//!
//! Handles are `Arc`s: the table drops its reference on completion or abort,
//! the session itself is freed when the last holder releases it.

use crate::addr::Address;
use crate::completion::{self, CompletionEvent, SessionOwner, SessionProgress};
use crate::config::TP_PACKET_PAYLOAD;
use crate::error::{Error, Result};
use crate::message::Message;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Addressing tuple identifying a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub src_addr: u8,
    pub src_name: u64,
    pub dst_addr: u8,
    pub dst_name: u64,
    pub pgn: u32,
}

impl From<&Address> for SessionKey {
    fn from(addr: &Address) -> Self {
        Self {
            src_addr: addr.src_addr,
            src_name: addr.src_name,
            dst_addr: addr.dst_addr,
            dst_name: addr.dst_name,
            pgn: addr.pgn,
        }
    }
}

/// One in-flight segmented transfer.
pub trait TransportSession: Send + Sync {
    fn key(&self) -> SessionKey;

    /// Extended transport (message above the regular transport limit).
    fn extended(&self) -> bool;

    /// Take ownership of the next segment. Either the segment is attached
    /// or an error is returned and the segment is dropped.
    fn queue_segment(&self, segment: Message) -> Result<()>;

    fn progress(&self) -> SessionProgress;

    /// Endpoint that started the transfer; `None` for receive sessions.
    fn owner(&self) -> Option<Arc<dyn SessionOwner>>;
}

/// Shared session handle; dropping it is the release.
pub type SessionHandle = Arc<dyn TransportSession>;

/// Creates and finds transport sessions for an interface.
pub trait SessionManager: Send + Sync {
    /// Open a transmit session for a logical message of `total_size` bytes.
    fn create_session(
        &self,
        key: SessionKey,
        total_size: usize,
        extended: bool,
        owner: Arc<dyn SessionOwner>,
    ) -> Result<SessionHandle>;

    /// Find an active session. `local_origin` selects transmit sessions.
    fn lookup_session(
        &self,
        key: &SessionKey,
        extended: bool,
        local_origin: bool,
    ) -> Result<Option<SessionHandle>>;
}

// ============================================================================
// In-process session table
// ============================================================================

#[derive(Debug, Default)]
struct SessionState {
    segments: Vec<Message>,
    queued_bytes: usize,
    packets_done: usize,
    scheduled: bool,
    finished: bool,
}

/// Session kept by [`SessionTable`]: segments are stored until the
/// transfer completes or aborts.
pub struct QueuedSession {
    key: SessionKey,
    extended: bool,
    local: bool,
    total_size: usize,
    owner: Option<Arc<dyn SessionOwner>>,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for QueuedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedSession")
            .field("key", &self.key)
            .field("extended", &self.extended)
            .field("local", &self.local)
            .field("total_size", &self.total_size)
            .field("has_owner", &self.owner.is_some())
            .finish_non_exhaustive()
    }
}

impl QueuedSession {
    fn new(
        key: SessionKey,
        total_size: usize,
        extended: bool,
        owner: Option<Arc<dyn SessionOwner>>,
    ) -> Self {
        Self {
            key,
            extended,
            local: owner.is_some(),
            total_size,
            owner,
            state: Mutex::new(SessionState::default()),
        }
    }

    #[must_use]
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Transmit session (started by a local endpoint).
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Bytes handed over so far.
    #[must_use]
    pub fn queued_bytes(&self) -> usize {
        self.state.lock().queued_bytes
    }

    /// Segments still held (queued and not yet acknowledged).
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.state.lock().segments.len()
    }

    /// `(offset, len)` of every segment still held, in queue order.
    #[must_use]
    pub fn segment_layout(&self) -> Vec<(usize, usize)> {
        self.state
            .lock()
            .segments
            .iter()
            .map(|m| (m.meta().offset, m.len()))
            .collect()
    }

    /// Concatenated payload of the segments still held.
    #[must_use]
    pub fn assembled(&self) -> Vec<u8> {
        let state = self.state.lock();
        let mut out = Vec::with_capacity(state.queued_bytes);
        for seg in &state.segments {
            out.extend_from_slice(seg.payload());
        }
        out
    }

    fn is_scheduled(&self) -> bool {
        self.state.lock().scheduled
    }

    /// Mark finished and release the queued segments (and their send credit).
    fn finish(&self, packets_done: Option<usize>) {
        let segments = {
            let mut state = self.state.lock();
            state.finished = true;
            if let Some(done) = packets_done {
                state.packets_done = done;
            }
            std::mem::take(&mut state.segments)
        };
        drop(segments);
    }
}

impl TransportSession for QueuedSession {
    fn key(&self) -> SessionKey {
        self.key
    }

    fn extended(&self) -> bool {
        self.extended
    }

    fn queue_segment(&self, segment: Message) -> Result<()> {
        let mut state = self.state.lock();
        if state.finished {
            return Err(Error::Io("transport session already finished"));
        }
        if segment.meta().offset != state.queued_bytes {
            return Err(Error::Io("segment offset out of sequence"));
        }
        if state.queued_bytes + segment.len() > self.total_size {
            return Err(Error::Io("segment exceeds declared size"));
        }
        state.queued_bytes += segment.len();
        state.segments.push(segment);
        Ok(())
    }

    fn progress(&self) -> SessionProgress {
        SessionProgress {
            packets_done: self.state.lock().packets_done,
            total_size: self.total_size,
        }
    }

    fn owner(&self) -> Option<Arc<dyn SessionOwner>> {
        self.owner.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TableKey {
    key: SessionKey,
    extended: bool,
    local: bool,
}

/// In-process [`SessionManager`] with a driver API.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: DashMap<TableKey, Arc<QueuedSession>>,
    created: AtomicU64,
    max_sessions: Option<usize>,
}

impl SessionTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Refuse new sessions with [`Error::ResourceExhausted`] once `max` are
    /// active. Concurrent creators may overshoot by the number of racing
    /// inserts.
    #[must_use]
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = Some(max);
        self
    }

    /// Active transmit session for `key`.
    #[must_use]
    pub fn session(&self, key: &SessionKey, extended: bool) -> Option<Arc<QueuedSession>> {
        self.get(key, extended, true)
    }

    /// Every active session (transmit and receive).
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<QueuedSession>> {
        self.sessions.iter().map(|e| Arc::clone(e.value())).collect()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Sessions created since startup.
    #[must_use]
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Register a receive session (no owner, never notifies).
    pub fn open_receive(
        &self,
        key: SessionKey,
        total_size: usize,
        extended: bool,
    ) -> Result<Arc<QueuedSession>> {
        self.insert(QueuedSession::new(key, total_size, extended, None))
    }

    /// The first data packet went out.
    pub fn schedule(&self, key: &SessionKey, extended: bool) -> bool {
        let Some(session) = self.session(key, extended) else {
            return false;
        };
        {
            let mut state = session.state.lock();
            if state.scheduled {
                return true;
            }
            state.scheduled = true;
        }
        completion::notify(session.as_ref(), CompletionEvent::Scheduled);
        true
    }

    /// The remote confirmed `packets` data packets so far.
    ///
    /// Segments entirely covered by the acknowledgment are released, which
    /// returns their bytes to the sender's send buffer.
    pub fn acknowledge(&self, key: &SessionKey, extended: bool, packets: usize) -> bool {
        let Some(session) = self.session(key, extended) else {
            return false;
        };
        let released: Vec<Message> = {
            let mut state = session.state.lock();
            state.packets_done = state.packets_done.max(packets);
            let acked = state.packets_done.saturating_mul(TP_PACKET_PAYLOAD);
            let (done, keep): (Vec<Message>, Vec<Message>) = std::mem::take(&mut state.segments)
                .into_iter()
                .partition(|m| m.meta().offset + m.len() <= acked);
            state.segments = keep;
            done
        };
        drop(released);
        true
    }

    /// Transfer fully acknowledged: notify, release segments, drop the session.
    pub fn complete(&self, key: &SessionKey, extended: bool) -> bool {
        let Some((_, session)) = self.sessions.remove(&TableKey {
            key: *key,
            extended,
            local: true,
        }) else {
            return false;
        };

        let packets = session.total_size.div_ceil(TP_PACKET_PAYLOAD);
        session.finish(Some(packets));
        if !session.is_scheduled() {
            completion::notify(session.as_ref(), CompletionEvent::Scheduled);
        }
        completion::notify(session.as_ref(), CompletionEvent::Acknowledged);
        if let Some(owner) = session.owner() {
            owner.transfer_finished();
        }
        log::debug!("[SESSION] completed {:?} ({} bytes)", key, session.total_size);
        true
    }

    /// Transfer abandoned with `errno`: notify, report, drop the session.
    pub fn abort(&self, key: &SessionKey, extended: bool, errno: i32) -> bool {
        let Some((_, session)) = self.sessions.remove(&TableKey {
            key: *key,
            extended,
            local: true,
        }) else {
            return false;
        };

        session.finish(None);
        completion::notify(session.as_ref(), CompletionEvent::Aborted(errno));
        if let Some(owner) = session.owner() {
            owner.abort(Error::TransferAborted(errno));
            owner.transfer_finished();
        }
        log::debug!("[SESSION] aborted {:?} (errno {})", key, errno);
        true
    }

    fn get(&self, key: &SessionKey, extended: bool, local: bool) -> Option<Arc<QueuedSession>> {
        self.sessions
            .get(&TableKey {
                key: *key,
                extended,
                local,
            })
            .map(|e| Arc::clone(e.value()))
    }

    fn insert(&self, session: QueuedSession) -> Result<Arc<QueuedSession>> {
        use dashmap::mapref::entry::Entry;

        let table_key = TableKey {
            key: session.key,
            extended: session.extended,
            local: session.local,
        };
        // len() takes every shard lock; it must run before entry() holds one.
        if let Some(max) = self.max_sessions {
            if self.sessions.len() >= max && !self.sessions.contains_key(&table_key) {
                log::debug!("[SESSION] table full ({} active), refusing {:?}", max, session.key);
                return Err(Error::ResourceExhausted("transport session table full"));
            }
        }
        match self.sessions.entry(table_key) {
            Entry::Occupied(_) => Err(Error::Busy("transport session already active")),
            Entry::Vacant(slot) => {
                let session = Arc::new(session);
                slot.insert(Arc::clone(&session));
                self.created.fetch_add(1, Ordering::Relaxed);
                Ok(session)
            }
        }
    }
}

impl SessionManager for SessionTable {
    fn create_session(
        &self,
        key: SessionKey,
        total_size: usize,
        extended: bool,
        owner: Arc<dyn SessionOwner>,
    ) -> Result<SessionHandle> {
        let session = self.insert(QueuedSession::new(key, total_size, extended, Some(owner)))?;
        log::debug!(
            "[SESSION] created {:?} total={} extended={}",
            key,
            total_size,
            extended
        );
        Ok(session)
    }

    fn lookup_session(
        &self,
        key: &SessionKey,
        extended: bool,
        local_origin: bool,
    ) -> Result<Option<SessionHandle>> {
        Ok(self
            .get(key, extended, local_origin)
            .map(|s| s as SessionHandle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::Notification;
    use crate::config::NO_PGN;
    use crate::message::{EndpointId, OutboundTemplate, SendBuffer};
    use crate::wait::WaitQueue;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingOwner {
        events: Mutex<Vec<Notification>>,
        finished: AtomicUsize,
        errors: Mutex<Vec<Error>>,
    }

    impl SessionOwner for RecordingOwner {
        fn notify(&self, event: CompletionEvent, progress: SessionProgress) -> bool {
            self.events.lock().push(Notification::from_event(event, progress));
            true
        }

        fn transfer_finished(&self) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }

        fn abort(&self, error: Error) {
            self.errors.lock().push(error);
        }
    }

    fn key() -> SessionKey {
        SessionKey::from(&Address::new(0x10, 0x20, NO_PGN))
    }

    fn segment(buf: &Arc<SendBuffer>, offset: usize, len: usize) -> Message {
        let template = OutboundTemplate {
            ifindex: 1,
            addr: Address::new(0x10, 0x20, NO_PGN),
            priority: 6,
            origin: EndpointId(1),
        };
        let credit = buf.reserve(len, true).expect("buffer space");
        Message::outbound(&template, &vec![0xAB; len], offset, credit)
    }

    #[test]
    fn test_duplicate_session_is_busy() {
        let table = SessionTable::new();
        let owner: Arc<dyn SessionOwner> = Arc::new(RecordingOwner::default());
        table
            .create_session(key(), 20, false, Arc::clone(&owner))
            .expect("first session");
        let err = table.create_session(key(), 20, false, owner).err();
        assert!(matches!(err, Some(Error::Busy(_))));

        // Extended transfers live in a separate namespace.
        let owner: Arc<dyn SessionOwner> = Arc::new(RecordingOwner::default());
        assert!(table.create_session(key(), 4000, true, owner).is_ok());
        assert_eq!(table.created_count(), 2);
    }

    #[test]
    fn test_full_table_refuses_new_sessions() {
        let table = SessionTable::new().with_max_sessions(1);
        let owner: Arc<dyn SessionOwner> = Arc::new(RecordingOwner::default());
        table
            .create_session(key(), 20, false, Arc::clone(&owner))
            .expect("first session");

        let err = table
            .create_session(key(), 4000, true, Arc::clone(&owner))
            .err()
            .expect("table full");
        assert!(matches!(err, Error::ResourceExhausted(_)));
        assert_eq!(err.errno(), libc::ENOBUFS);
        // A duplicate is still reported as busy, not as exhaustion.
        assert!(matches!(
            table.create_session(key(), 20, false, Arc::clone(&owner)),
            Err(Error::Busy(_))
        ));

        assert!(table.complete(&key(), false));
        assert!(table.create_session(key(), 4000, true, owner).is_ok());
        assert_eq!(table.created_count(), 2);
    }

    #[test]
    fn test_segments_must_be_contiguous() {
        let table = SessionTable::new();
        let buf = Arc::new(SendBuffer::new(1024, WaitQueue::shared()));
        let owner: Arc<dyn SessionOwner> = Arc::new(RecordingOwner::default());
        let session = table
            .create_session(key(), 20, false, owner)
            .expect("session");

        session.queue_segment(segment(&buf, 0, 7)).expect("first");
        assert!(matches!(
            session.queue_segment(segment(&buf, 8, 7)),
            Err(Error::Io(_))
        ));
        session.queue_segment(segment(&buf, 7, 7)).expect("second");
        assert!(matches!(
            session.queue_segment(segment(&buf, 14, 7)),
            Err(Error::Io(_))
        ));
        session.queue_segment(segment(&buf, 14, 6)).expect("last");

        let queued = table.session(&key(), false).expect("active");
        assert_eq!(queued.segment_layout(), vec![(0, 7), (7, 7), (14, 6)]);
        assert_eq!(buf.used(), 20);
    }

    #[test]
    fn test_complete_notifies_and_releases() {
        let table = SessionTable::new();
        let buf = Arc::new(SendBuffer::new(1024, WaitQueue::shared()));
        let owner = Arc::new(RecordingOwner::default());
        let session = table
            .create_session(key(), 10, false, owner.clone())
            .expect("session");
        session.queue_segment(segment(&buf, 0, 10)).expect("segment");
        drop(session);

        assert!(table.schedule(&key(), false));
        assert!(table.complete(&key(), false));
        assert!(!table.complete(&key(), false));

        let events = owner.events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].bytes_acked, 10);
        assert_eq!(owner.finished.load(Ordering::SeqCst), 1);
        assert_eq!(buf.used(), 0);
        assert_eq!(table.active_count(), 0);
    }

    #[test]
    fn test_abort_reports_error() {
        let table = SessionTable::new();
        let owner = Arc::new(RecordingOwner::default());
        table
            .create_session(key(), 100, false, owner.clone())
            .expect("session");
        table.acknowledge(&key(), false, 3);

        assert!(table.abort(&key(), false, libc::ETIME));
        let events = owner.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].errno, libc::ETIME);
        assert_eq!(events[0].bytes_acked, 21);
        assert!(matches!(
            owner.errors.lock().first(),
            Some(Error::TransferAborted(e)) if *e == libc::ETIME
        ));
        assert_eq!(owner.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_receive_sessions_are_separate_and_silent() {
        let table = SessionTable::new();
        let rx = table.open_receive(key(), 30, false).expect("rx session");
        assert!(rx.owner().is_none());
        assert!(!completion::notify(rx.as_ref(), CompletionEvent::Acknowledged));

        let found = table.lookup_session(&key(), false, true).expect("lookup");
        assert!(found.is_none());
        let found = table.lookup_session(&key(), false, false).expect("lookup");
        assert!(found.is_some());
    }
}
