// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! J1939 endpoints: binding, connection, options, send and receive.
//!
//! # State Machine
//!
//! ```text
//!   Unbound ── bind() ──→ Bound ── connect() ──→ Connected
//!      │                  │  ↑ bind() (same ifindex)   │
//!      │                  └──┘                         │
//!      └──────────────── close() ──→ Closed ←──────────┘
//! ```
//!
//! # Locking
//!
//! - `state`: binding, flags, filters and priority. Every change republishes
//!   the lock-free [`MatchView`] read by dispatch threads.
//! - `tx`: progress of the segmented message in flight.
//! - pending transfers, queues and the send buffer are lock-free.
//!
//! `close()` waits for pending transfers without holding `state`.

use crate::addr::{
    address_is_valid, j1939_priority, pgn_is_clean_pdu, pgn_is_valid, socket_priority, Address,
    SockAddr,
};
use crate::completion::{CompletionEvent, ErrorQueue, Notification, SessionOwner, SessionProgress};
use crate::config::{EndpointOptions, DEFAULT_PRIORITY, NO_ADDR, NO_NAME, NO_PGN};
use crate::error::{Error, Result};
use crate::filter::{compile_rules, FilterRule, MatchView};
use crate::iface::{Bus, Interface};
use crate::message::{EndpointId, Message, MsgFlags, OutboundTemplate, SendBuffer};
use crate::registry::DispatchTarget;
use crate::segment::{self, TxProgress};
use crate::wait::{PendingCounter, WaitQueue};
use arc_swap::ArcSwap;
use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;

/// Boolean endpoint options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Accept every message on the interface (rule list still applies).
    Promisc,
    /// Receive copies of own transmissions.
    RecvOwn,
    /// Queue completion notifications.
    ErrQueue,
    /// Allow broadcast destinations and receive broadcast traffic.
    Broadcast,
}

/// Snapshot of the endpoint's state flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointFlags {
    pub bound: bool,
    pub connected: bool,
    pub promisc: bool,
    pub recv_own: bool,
    pub errqueue: bool,
    pub broadcast: bool,
}

/// Options for a single send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendFlags {
    /// Fail with `WouldBlock` instead of waiting for send buffer space.
    pub dont_wait: bool,
}

impl SendFlags {
    #[must_use]
    pub fn nonblocking() -> Self {
        Self { dont_wait: true }
    }
}

/// Options for a single receive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecvFlags {
    /// Fail with `WouldBlock` instead of waiting for a message.
    pub dont_wait: bool,
}

impl RecvFlags {
    #[must_use]
    pub fn nonblocking() -> Self {
        Self { dont_wait: true }
    }
}

/// Per-message metadata returned next to the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ancillary {
    /// Destination address, when it is not the broadcast address.
    pub dst_addr: Option<u8>,
    /// Destination NAME, when set.
    pub dst_name: Option<u64>,
    /// J1939 priority.
    pub priority: u8,
}

/// A received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    /// Payload, cut to the requested size.
    pub payload: Vec<u8>,
    /// The message was longer than the requested size.
    pub truncated: bool,
    /// Sender: interface, NAME, address and PGN.
    pub source: SockAddr,
    pub ancillary: Ancillary,
    pub flags: MsgFlags,
    pub timestamp: SystemTime,
}

// ============================================================================
// Endpoint core (shared with dispatch and sessions)
// ============================================================================

#[derive(Debug)]
struct EndpointState {
    flags: EndpointFlags,
    ifindex: i32,
    iface: Option<Arc<Interface>>,
    addr: Address,
    pgn_rx_filter: u32,
    rules: Arc<[FilterRule]>,
    sk_priority: u32,
    ecu_reserved: bool,
    netdev_held: bool,
    closed: bool,
}

impl Default for EndpointState {
    fn default() -> Self {
        Self {
            flags: EndpointFlags::default(),
            ifindex: 0,
            iface: None,
            addr: Address::default(),
            pgn_rx_filter: NO_PGN,
            rules: Arc::from(Vec::new()),
            sk_priority: socket_priority(DEFAULT_PRIORITY),
            ecu_reserved: false,
            netdev_held: false,
            closed: false,
        }
    }
}

impl EndpointState {
    fn match_view(&self) -> MatchView {
        MatchView {
            ifindex: self.ifindex,
            bound: self.flags.bound,
            connected: self.flags.connected,
            promisc: self.flags.promisc,
            recv_own: self.flags.recv_own,
            broadcast: self.flags.broadcast,
            addr: self.addr,
            pgn_rx_filter: self.pgn_rx_filter,
            rules: Arc::clone(&self.rules),
        }
    }

    /// Drop the reservation and user count held on `iface`.
    fn release_iface(&mut self, iface: &Interface, id: EndpointId) {
        if self.ecu_reserved {
            iface.local_ecu_put(self.addr.src_name, self.addr.src_addr, id);
            self.ecu_reserved = false;
        }
        if self.netdev_held {
            iface.netdev_stop();
            self.netdev_held = false;
        }
    }
}

#[derive(Debug)]
pub(crate) struct EndpointCore {
    pub(crate) id: EndpointId,
    options: EndpointOptions,
    state: Mutex<EndpointState>,
    view: ArcSwap<MatchView>,
    waitq: Arc<WaitQueue>,
    pub(crate) pending: PendingCounter,
    rx: ArrayQueue<Message>,
    errqueue: ErrorQueue,
    pub(crate) sndbuf: Arc<SendBuffer>,
    sk_err: Mutex<Option<Error>>,
    pub(crate) tx: Mutex<TxProgress>,
}

impl EndpointCore {
    fn publish(&self, state: &EndpointState) {
        self.view.store(Arc::new(state.match_view()));
    }

    fn set_error(&self, error: Error) {
        *self.sk_err.lock() = Some(error);
        self.waitq.wake_all();
    }

    fn take_error(&self) -> Option<Error> {
        self.sk_err.lock().take()
    }

    fn has_error(&self) -> bool {
        self.sk_err.lock().is_some()
    }

    /// Deregister, release interface resources, drop queued data.
    fn teardown(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        if let Some(iface) = state.iface.take() {
            iface.deregister(self.id);
            state.release_iface(&iface, self.id);
        }
        state.flags.bound = false;
        state.flags.connected = false;
        state.closed = true;
        self.publish(&state);
        drop(state);

        while self.rx.pop().is_some() {}
        self.errqueue.purge();
        log::debug!("[ENDPOINT] {} closed", self.id.as_u64());
    }
}

impl DispatchTarget for EndpointCore {
    fn id(&self) -> EndpointId {
        self.id
    }

    fn match_view(&self) -> Arc<MatchView> {
        self.view.load_full()
    }

    fn enqueue(&self, msg: Message) -> bool {
        if self.rx.push(msg).is_err() {
            return false;
        }
        self.waitq.wake_all();
        true
    }

    fn link_event(&self, iface: &Interface, error: &Error) {
        if let Error::NoDevice(_) = error {
            let mut state = self.state.lock();
            state.release_iface(iface, self.id);
        }
        self.set_error(error.clone());
    }
}

impl SessionOwner for EndpointCore {
    fn notify(&self, event: CompletionEvent, progress: SessionProgress) -> bool {
        if !self.errqueue.is_enabled() {
            return false;
        }
        self.errqueue.push(Notification::from_event(event, progress))
    }

    fn transfer_finished(&self) {
        self.pending.del();
    }

    fn abort(&self, error: Error) {
        log::debug!("[ENDPOINT] {} transfer aborted: {}", self.id.as_u64(), error);
        self.set_error(error);
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// A J1939 endpoint (the analog of a `CAN_J1939` datagram socket).
pub struct Endpoint {
    core: Arc<EndpointCore>,
    bus: Bus,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.core.id)
            .field("flags", &self.flags())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    /// Unbound endpoint on `bus` with default options.
    #[must_use]
    pub fn new(bus: &Bus) -> Self {
        Self::with_options(bus, EndpointOptions::default())
    }

    #[must_use]
    pub fn with_options(bus: &Bus, options: EndpointOptions) -> Self {
        let config = bus.config();
        let waitq = WaitQueue::shared();
        let state = EndpointState::default();
        let view = ArcSwap::from_pointee(state.match_view());
        let core = EndpointCore {
            id: bus.next_endpoint_id(),
            options,
            state: Mutex::new(state),
            view,
            pending: PendingCounter::new(Arc::clone(&waitq)),
            rx: ArrayQueue::new(config.rx_queue_capacity.max(1)),
            errqueue: ErrorQueue::new(config.errqueue_capacity),
            sndbuf: Arc::new(SendBuffer::new(
                config.send_buffer_bytes,
                Arc::clone(&waitq),
            )),
            sk_err: Mutex::new(None),
            tx: Mutex::new(TxProgress::default()),
            waitq,
        };
        Self {
            core: Arc::new(core),
            bus: bus.clone(),
        }
    }

    #[must_use]
    pub fn id(&self) -> EndpointId {
        self.core.id
    }

    // ------------------------------------------------------------------------
    // Binding
    // ------------------------------------------------------------------------

    /// Attach to `addr.ifindex` with local NAME/address `addr.name`/`addr.addr`.
    ///
    /// A valid `addr.pgn` becomes the receive PGN filter. Binding again on the
    /// same interface swaps the local reservation; binding to another
    /// interface is rejected.
    pub fn bind(&self, addr: &SockAddr) -> Result<()> {
        addr.sanity_check()?;
        let iface = self
            .bus
            .interface(addr.ifindex)
            .ok_or(Error::NoDevice(addr.ifindex))?;
        let id = self.core.id;

        let mut state = self.core.state.lock();
        if state.closed {
            return Err(Error::InvalidState("endpoint closed"));
        }

        if state.flags.bound && state.ifindex != addr.ifindex {
            return Err(Error::InvalidArgument("already bound to another interface"));
        }
        // Same index, new device: the old one was removed from the bus.
        let replaced = !state
            .iface
            .as_ref()
            .is_some_and(|old| Arc::ptr_eq(old, &iface));
        if state.flags.bound && replaced {
            if let Some(old) = state.iface.take() {
                old.deregister(id);
                state.release_iface(&old, id);
            }
            state.flags.bound = false;
            self.core.publish(&state);
            log::debug!(
                "[ENDPOINT] {} ifindex={} was replaced, binding to the new interface",
                id.as_u64(),
                addr.ifindex
            );
        }

        let rebind = state.flags.bound;
        let old_addr = state.addr;
        let old_rx_filter = state.pgn_rx_filter;
        let was_reserved = state.ecu_reserved;

        if rebind {
            if was_reserved {
                iface.local_ecu_put(old_addr.src_name, old_addr.src_addr, id);
                state.ecu_reserved = false;
            }
        } else {
            iface.netdev_start();
        }

        if pgn_is_valid(addr.pgn) {
            state.pgn_rx_filter = addr.pgn;
        }
        state.addr.src_name = addr.name;
        state.addr.src_addr = addr.addr;

        if let Err(e) = iface.local_ecu_get(addr.name, addr.addr, id) {
            state.addr = old_addr;
            state.pgn_rx_filter = old_rx_filter;
            if rebind {
                if was_reserved
                    && iface
                        .local_ecu_get(old_addr.src_name, old_addr.src_addr, id)
                        .is_ok()
                {
                    state.ecu_reserved = true;
                }
            } else {
                iface.netdev_stop();
            }
            log::debug!("[ENDPOINT] {} bind to {:?} failed: {}", id.as_u64(), addr, e);
            return Err(e);
        }
        state.ecu_reserved = true;

        if !rebind {
            state.ifindex = addr.ifindex;
            state.iface = Some(Arc::clone(&iface));
            state.netdev_held = true;
            state.flags.bound = true;
            iface.register(Arc::clone(&self.core) as Arc<dyn DispatchTarget>);
        }
        self.core.publish(&state);
        log::debug!(
            "[ENDPOINT] {} bound ifindex={} name=0x{:016x} addr=0x{:02x} rebind={}",
            id.as_u64(),
            addr.ifindex,
            addr.name,
            addr.addr,
            rebind
        );
        Ok(())
    }

    /// Fix the remote peer. A valid `addr.pgn` becomes the default transmit PGN.
    pub fn connect(&self, addr: &SockAddr) -> Result<()> {
        addr.sanity_check()?;
        let mut state = self.core.state.lock();

        if !state.flags.bound {
            return Err(Error::InvalidState("connect before bind"));
        }
        if state.ifindex != addr.ifindex {
            return Err(Error::InvalidArgument("peer on another interface"));
        }
        if addr.is_broadcast() && !state.flags.broadcast {
            return Err(Error::PermissionDenied("broadcast peer without broadcast flag"));
        }

        state.addr.dst_name = addr.name;
        state.addr.dst_addr = addr.addr;
        if pgn_is_valid(addr.pgn) {
            state.addr.pgn = addr.pgn;
        }
        state.flags.connected = true;
        self.core.publish(&state);
        log::debug!(
            "[ENDPOINT] {} connected name=0x{:016x} addr=0x{:02x}",
            self.core.id.as_u64(),
            addr.name,
            addr.addr
        );
        Ok(())
    }

    /// Local interface, NAME, address and default transmit PGN.
    #[must_use]
    pub fn local_addr(&self) -> SockAddr {
        let state = self.core.state.lock();
        SockAddr {
            ifindex: state.ifindex,
            name: state.addr.src_name,
            addr: state.addr.src_addr,
            pgn: state.addr.pgn,
        }
    }

    pub fn peer_addr(&self) -> Result<SockAddr> {
        let state = self.core.state.lock();
        if !state.flags.connected {
            return Err(Error::AddressNotAvailable);
        }
        Ok(SockAddr {
            ifindex: state.ifindex,
            name: state.addr.dst_name,
            addr: state.addr.dst_addr,
            pgn: state.addr.pgn,
        })
    }

    // ------------------------------------------------------------------------
    // Options
    // ------------------------------------------------------------------------

    /// Replace the receive rule list. An empty list accepts everything.
    pub fn set_filters(&self, rules: &[FilterRule]) -> Result<()> {
        let compiled = compile_rules(rules)?;
        let old = {
            let mut state = self.core.state.lock();
            let old = std::mem::replace(&mut state.rules, compiled);
            self.core.publish(&state);
            old
        };
        drop(old);
        Ok(())
    }

    #[must_use]
    pub fn filters(&self) -> Vec<FilterRule> {
        self.core.state.lock().rules.to_vec()
    }

    pub fn set_flag(&self, flag: Flag, on: bool) {
        let mut state = self.core.state.lock();
        match flag {
            Flag::Promisc => state.flags.promisc = on,
            Flag::RecvOwn => state.flags.recv_own = on,
            Flag::Broadcast => state.flags.broadcast = on,
            Flag::ErrQueue => {
                state.flags.errqueue = on;
                self.core.errqueue.set_enabled(on);
            }
        }
        self.core.publish(&state);
    }

    #[must_use]
    pub fn flag(&self, flag: Flag) -> bool {
        let flags = self.flags();
        match flag {
            Flag::Promisc => flags.promisc,
            Flag::RecvOwn => flags.recv_own,
            Flag::ErrQueue => flags.errqueue,
            Flag::Broadcast => flags.broadcast,
        }
    }

    #[must_use]
    pub fn flags(&self) -> EndpointFlags {
        self.core.state.lock().flags
    }

    /// J1939 send priority, 0 (most urgent) to 7. 0 and 1 need `net_admin`.
    pub fn set_send_priority(&self, prio: u8) -> Result<()> {
        if prio > 7 {
            return Err(Error::OutOfRange(prio));
        }
        if prio < 2 && !self.core.options.net_admin {
            return Err(Error::NotPermitted("send priority 0-1 requires net_admin"));
        }
        self.core.state.lock().sk_priority = socket_priority(prio);
        Ok(())
    }

    #[must_use]
    pub fn send_priority(&self) -> u8 {
        j1939_priority(self.core.state.lock().sk_priority)
    }

    // ------------------------------------------------------------------------
    // Send
    // ------------------------------------------------------------------------

    /// Send to the connected peer (or broadcast).
    pub fn send(&self, payload: &[u8]) -> Result<usize> {
        self.send_with(payload, None, SendFlags::default())
    }

    /// Send to `dest`, overriding the connected peer.
    pub fn send_to(&self, payload: &[u8], dest: &SockAddr) -> Result<usize> {
        self.send_with(payload, Some(dest), SendFlags::default())
    }

    /// Send `payload`; returns the number of bytes accepted.
    ///
    /// Payloads up to one frame go straight to the link. Larger payloads are
    /// segmented into a transport session and may be written in several calls
    /// (see the `segment` module).
    pub fn send_with(
        &self,
        payload: &[u8],
        dest: Option<&SockAddr>,
        flags: SendFlags,
    ) -> Result<usize> {
        let template = self.outbound_template(dest)?;
        let iface = self
            .bus
            .interface(template.ifindex)
            .ok_or(Error::NoDevice(template.ifindex))?;
        let config = self.bus.config();

        if payload.len() > config.single_frame_capacity {
            return segment::send_multi(
                &self.core,
                &iface,
                &template,
                payload,
                flags.dont_wait,
                config.max_segment_size,
            );
        }

        let credit = self.core.sndbuf.reserve(payload.len(), flags.dont_wait)?;
        iface.send_one(Message::outbound(&template, payload, 0, credit))?;
        Ok(payload.len())
    }

    fn outbound_template(&self, dest: Option<&SockAddr>) -> Result<OutboundTemplate> {
        let state = self.core.state.lock();
        if !state.flags.bound {
            return Err(Error::InvalidState("send on unbound endpoint"));
        }
        if !state.addr.has_source() {
            return Err(Error::InvalidState("no source address assigned"));
        }

        let mut addr = state.addr;
        match dest {
            Some(d) => {
                if d.ifindex != 0 && d.ifindex != state.ifindex {
                    return Err(Error::InvalidState("destination on another interface"));
                }
                if pgn_is_valid(d.pgn) && !pgn_is_clean_pdu(d.pgn) {
                    return Err(Error::InvalidArgument("PDU1 PGN with destination byte set"));
                }
                if d.is_broadcast() && !state.flags.broadcast {
                    return Err(Error::PermissionDenied("broadcast without broadcast flag"));
                }
                if d.name != NO_NAME || d.addr != NO_ADDR {
                    addr.dst_name = d.name;
                    addr.dst_addr = d.addr;
                }
                if pgn_is_valid(d.pgn) {
                    addr.pgn = d.pgn;
                }
            }
            None => {
                if state.addr.is_broadcast() && !state.flags.broadcast {
                    return Err(Error::PermissionDenied("broadcast without broadcast flag"));
                }
            }
        }

        Ok(OutboundTemplate {
            ifindex: state.ifindex,
            addr,
            priority: j1939_priority(state.sk_priority),
            origin: self.core.id,
        })
    }

    // ------------------------------------------------------------------------
    // Receive
    // ------------------------------------------------------------------------

    /// Take the next datagram, cut to `max_size` bytes.
    ///
    /// Blocks (interruptibly) unless `flags.dont_wait`. A pending sticky error
    /// is returned instead of waiting.
    pub fn recv(&self, max_size: usize, flags: RecvFlags) -> Result<Received> {
        let msg = match self.core.rx.pop() {
            Some(msg) => msg,
            None => {
                if let Some(err) = self.core.take_error() {
                    return Err(err);
                }
                if flags.dont_wait {
                    return Err(Error::WouldBlock);
                }
                let mut slot = None;
                self.core.waitq.wait_until(|| {
                    if slot.is_none() {
                        slot = self.core.rx.pop();
                    }
                    slot.is_some() || self.core.has_error()
                })?;
                match slot {
                    Some(msg) => msg,
                    None => return Err(self.core.take_error().unwrap_or(Error::WouldBlock)),
                }
            }
        };

        let meta = msg.meta();
        let copied = msg.len().min(max_size);
        Ok(Received {
            payload: msg.payload()[..copied].to_vec(),
            truncated: msg.len() > max_size,
            source: SockAddr {
                ifindex: meta.ifindex,
                name: meta.addr.src_name,
                addr: meta.addr.src_addr,
                pgn: meta.addr.pgn,
            },
            ancillary: Ancillary {
                dst_addr: address_is_valid(meta.addr.dst_addr).then_some(meta.addr.dst_addr),
                dst_name: (meta.addr.dst_name != NO_NAME).then_some(meta.addr.dst_name),
                priority: meta.priority,
            },
            flags: meta.flags,
            timestamp: meta.timestamp,
        })
    }

    /// Next completion notification, or `WouldBlock`.
    pub fn recv_errqueue(&self) -> Result<Notification> {
        self.core.errqueue.pop().ok_or(Error::WouldBlock)
    }

    /// Read and clear the sticky error.
    pub fn take_error(&self) -> Option<Error> {
        self.core.take_error()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Segmented transfers still owned by the session layer.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.core.pending.get()
    }

    /// Bytes held by in-flight frames and segments.
    #[must_use]
    pub fn send_buffer_used(&self) -> usize {
        self.core.sndbuf.used()
    }

    /// Cancel the current (or next) blocking wait of this endpoint.
    pub fn interrupt(&self) {
        self.core.waitq.interrupt();
    }

    /// Wait for pending transfers, then release the interface.
    ///
    /// Returns `Interrupted` if the wait is cancelled; the endpoint stays
    /// open and close can be retried. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let bound = {
            let state = self.core.state.lock();
            if state.closed {
                return Ok(());
            }
            state.flags.bound
        };
        if bound {
            self.core.pending.wait_idle()?;
        }
        self.core.teardown();
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.state.lock().closed
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        let pending = self.core.pending.get();
        if pending > 0 {
            log::warn!(
                "[ENDPOINT] {} dropped with {} transfer(s) pending",
                self.core.id.as_u64(),
                pending
            );
        }
        self.core.teardown();
    }
}
