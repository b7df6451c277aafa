// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bus and interfaces.
//!
//! A [`Bus`] is the set of CAN interfaces endpoints can bind to, addressed by
//! interface index. Each [`Interface`] owns:
//!
//! - its [`DispatchRegistry`] (endpoints bound to it)
//! - its local ECU reservation table
//! - its [`CanLink`] for single frames
//! - its [`SessionManager`] for segmented transfers
//! - a user count (one per bound endpoint)
//!
//! Lock order: endpoint state, then registry, then the reservation table.

use crate::addr::address_is_unicast;
use crate::config::{StackConfig, NO_NAME};
use crate::error::{Error, Result};
use crate::link::CanLink;
use crate::message::{EndpointId, Message};
use crate::registry::{DispatchRegistry, DispatchStats, DispatchTarget};
use crate::session::{SessionManager, SessionTable};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Local ECU reservations
// ============================================================================

/// Local names and addresses claimed by endpoints of one interface.
///
/// NAME reservations are reference counted and never conflict. A bare
/// unicast address (no NAME) belongs to exactly one endpoint.
#[derive(Debug, Default)]
struct LocalEcuTable {
    names: HashMap<u64, usize>,
    addrs: HashMap<u8, EndpointId>,
}

impl LocalEcuTable {
    fn get(&mut self, name: u64, sa: u8, owner: EndpointId) -> Result<()> {
        if name != NO_NAME {
            *self.names.entry(name).or_insert(0) += 1;
            return Ok(());
        }
        if !address_is_unicast(sa) {
            return Ok(());
        }
        match self.addrs.get(&sa) {
            Some(holder) if *holder != owner => Err(Error::AddressInUse(sa)),
            _ => {
                self.addrs.insert(sa, owner);
                Ok(())
            }
        }
    }

    fn put(&mut self, name: u64, sa: u8, owner: EndpointId) {
        if name != NO_NAME {
            if let Some(refs) = self.names.get_mut(&name) {
                *refs -= 1;
                if *refs == 0 {
                    self.names.remove(&name);
                }
            }
            return;
        }
        if address_is_unicast(sa) && self.addrs.get(&sa) == Some(&owner) {
            self.addrs.remove(&sa);
        }
    }
}

// ============================================================================
// Interface
// ============================================================================

/// One CAN interface.
pub struct Interface {
    ifindex: i32,
    link: Arc<dyn CanLink>,
    sessions: Arc<dyn SessionManager>,
    registry: DispatchRegistry,
    ecus: Mutex<LocalEcuTable>,
    users: AtomicUsize,
}

impl std::fmt::Debug for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface")
            .field("ifindex", &self.ifindex)
            .field("registry", &self.registry)
            .field("users", &self.users())
            .finish_non_exhaustive()
    }
}

impl Interface {
    fn new(ifindex: i32, link: Arc<dyn CanLink>, sessions: Arc<dyn SessionManager>) -> Self {
        Self {
            ifindex,
            link,
            sessions,
            registry: DispatchRegistry::new(),
            ecus: Mutex::new(LocalEcuTable::default()),
            users: AtomicUsize::new(0),
        }
    }

    #[inline]
    #[must_use]
    pub fn ifindex(&self) -> i32 {
        self.ifindex
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<dyn SessionManager> {
        &self.sessions
    }

    #[must_use]
    pub fn registry(&self) -> &DispatchRegistry {
        &self.registry
    }

    #[must_use]
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.registry.metrics()
    }

    /// Bound endpoints holding the interface.
    #[must_use]
    pub fn users(&self) -> usize {
        self.users.load(Ordering::Acquire)
    }

    /// Inbound frame or reassembled message from the bus.
    ///
    /// Returns how many endpoints queued a copy.
    pub fn receive(&self, msg: &Message) -> usize {
        if msg.meta().ifindex != self.ifindex {
            log::debug!(
                "[IFACE] {} ignoring message stamped for ifindex {}",
                self.ifindex,
                msg.meta().ifindex
            );
            return 0;
        }
        self.registry.deliver(msg)
    }

    /// Transmit one frame, then echo it to local listeners.
    pub fn send_one(&self, msg: Message) -> Result<()> {
        self.link.transmit(&msg).map_err(Error::Link)?;
        self.registry.deliver(&msg);
        Ok(())
    }

    /// Device event: report `error` to every bound endpoint.
    ///
    /// `NoDevice` additionally drops every endpoint's reservation and user
    /// count. Filters are left alone.
    pub fn link_event(&self, error: Error) {
        log::debug!("[IFACE] {} link event: {}", self.ifindex, error);
        for target in self.registry.snapshot() {
            target.link_event(self, &error);
        }
    }

    pub(crate) fn netdev_start(&self) {
        let users = self.users.fetch_add(1, Ordering::AcqRel) + 1;
        log::debug!("[IFACE] {} start users={}", self.ifindex, users);
    }

    pub(crate) fn netdev_stop(&self) {
        let prev = self
            .users
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match prev {
            Ok(n) => log::debug!("[IFACE] {} stop users={}", self.ifindex, n - 1),
            Err(_) => log::warn!("[IFACE] {} stop without matching start", self.ifindex),
        }
    }

    pub(crate) fn local_ecu_get(&self, name: u64, sa: u8, owner: EndpointId) -> Result<()> {
        self.ecus.lock().get(name, sa, owner)
    }

    pub(crate) fn local_ecu_put(&self, name: u64, sa: u8, owner: EndpointId) {
        self.ecus.lock().put(name, sa, owner);
    }

    pub(crate) fn register(&self, target: Arc<dyn DispatchTarget>) -> bool {
        self.registry.register(target)
    }

    pub(crate) fn deregister(&self, id: EndpointId) -> bool {
        self.registry.deregister(id)
    }
}

// ============================================================================
// Bus
// ============================================================================

struct BusInner {
    interfaces: DashMap<i32, Arc<Interface>>,
    config: StackConfig,
    next_id: AtomicU64,
}

/// Set of interfaces endpoints can bind to. Cheap to clone.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("interfaces", &self.inner.interfaces.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    /// Bus with [`StackConfig::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StackConfig::default())
    }

    #[must_use]
    pub fn with_config(config: StackConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                interfaces: DashMap::new(),
                config,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &StackConfig {
        &self.inner.config
    }

    /// Add an interface using an in-process [`SessionTable`].
    pub fn add_interface(&self, ifindex: i32, link: Arc<dyn CanLink>) -> Result<Arc<Interface>> {
        self.add_interface_with_sessions(ifindex, link, SessionTable::shared())
    }

    /// Add an interface with an explicit session manager.
    pub fn add_interface_with_sessions(
        &self,
        ifindex: i32,
        link: Arc<dyn CanLink>,
        sessions: Arc<dyn SessionManager>,
    ) -> Result<Arc<Interface>> {
        use dashmap::mapref::entry::Entry;

        if ifindex <= 0 {
            return Err(Error::InvalidArgument("interface index must be positive"));
        }
        match self.inner.interfaces.entry(ifindex) {
            Entry::Occupied(_) => Err(Error::Busy("interface index already registered")),
            Entry::Vacant(slot) => {
                let iface = Arc::new(Interface::new(ifindex, link, sessions));
                slot.insert(Arc::clone(&iface));
                log::debug!("[IFACE] {} added", ifindex);
                Ok(iface)
            }
        }
    }

    #[must_use]
    pub fn interface(&self, ifindex: i32) -> Option<Arc<Interface>> {
        self.inner
            .interfaces
            .get(&ifindex)
            .map(|e| Arc::clone(e.value()))
    }

    /// Unregister an interface; bound endpoints see `NoDevice`.
    pub fn remove_interface(&self, ifindex: i32) -> Option<Arc<Interface>> {
        let (_, iface) = self.inner.interfaces.remove(&ifindex)?;
        iface.link_event(Error::NoDevice(ifindex));
        log::debug!("[IFACE] {} removed", ifindex);
        Some(iface)
    }

    pub(crate) fn next_endpoint_id(&self) -> EndpointId {
        EndpointId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }
}
