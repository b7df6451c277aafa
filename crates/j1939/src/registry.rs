// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-interface dispatch registry and inbound fan-out.
//!
//! The registry owns the list of endpoints bound to one interface. Inbound
//! messages (from the link, or echoed back after a local send) are offered to
//! every registered endpoint; each one decides through the filter matcher
//! whether it accepts a copy.
//!
//! Registration and removal take the write lock. Delivery takes the read lock
//! only long enough to clone the endpoint list, so a slow receiver never holds
//! up registration or other endpoints.

use crate::error::Error;
use crate::filter::{self, MatchView};
use crate::iface::Interface;
use crate::message::{EndpointId, Message, MsgFlags};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// Dispatch target
// ============================================================================

/// What the registry needs from an endpoint.
pub trait DispatchTarget: Send + Sync {
    fn id(&self) -> EndpointId;

    /// Current matching snapshot. Must not block.
    fn match_view(&self) -> Arc<MatchView>;

    /// Push onto the receive queue. Returns false if the queue is full.
    fn enqueue(&self, msg: Message) -> bool;

    /// Device event on the interface the target is bound to.
    fn link_event(&self, iface: &Interface, error: &Error) {
        let _ = (iface, error);
    }
}

/// Result of offering one message to one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Copy queued.
    Delivered,
    /// Not bound here, or own message without receive-own.
    Skipped,
    /// Rejected by the filter matcher.
    Filtered,
    /// Accepted but the receive queue was full.
    Dropped,
}

/// Offer `msg` to a single endpoint.
pub fn deliver_to(target: &dyn DispatchTarget, msg: &Message) -> DeliveryOutcome {
    let view = target.match_view();
    let meta = msg.meta();

    if !view.bound || view.ifindex != meta.ifindex {
        return DeliveryOutcome::Skipped;
    }
    let own = meta.origin == Some(target.id());
    if own && !view.recv_own {
        return DeliveryOutcome::Skipped;
    }
    if !filter::matches(&view, &meta.addr) {
        return DeliveryOutcome::Filtered;
    }

    let mut copy = msg.clone_for_delivery();
    copy.set_flags(MsgFlags {
        loopback: meta.origin.is_some(),
        confirm: own,
    });
    if target.enqueue(copy) {
        DeliveryOutcome::Delivered
    } else {
        log::warn!(
            "[DISPATCH] receive queue full on endpoint {}, dropping pgn=0x{:05x}",
            target.id().as_u64(),
            meta.addr.pgn
        );
        DeliveryOutcome::Dropped
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Fan-out counters, updated lock-free.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    pub messages: AtomicU64,
    pub delivered: AtomicU64,
    pub filtered: AtomicU64,
    pub dropped: AtomicU64,
    pub delivery_errors: AtomicU64,
}

/// Point-in-time copy of [`DispatchMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub messages: u64,
    pub delivered: u64,
    pub filtered: u64,
    pub dropped: u64,
    pub delivery_errors: u64,
}

impl DispatchMetrics {
    #[must_use]
    pub fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            messages: self.messages.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivery_errors: self.delivery_errors.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: DeliveryOutcome) {
        let counter = match outcome {
            DeliveryOutcome::Delivered => &self.delivered,
            DeliveryOutcome::Filtered => &self.filtered,
            DeliveryOutcome::Dropped => &self.dropped,
            DeliveryOutcome::Skipped => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Endpoints bound to one interface.
#[derive(Default)]
pub struct DispatchRegistry {
    endpoints: RwLock<Vec<Arc<dyn DispatchTarget>>>,
    metrics: DispatchMetrics,
}

impl std::fmt::Debug for DispatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRegistry")
            .field("endpoints", &self.len())
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl DispatchRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `target`. Returns false if it is already registered.
    pub fn register(&self, target: Arc<dyn DispatchTarget>) -> bool {
        let mut endpoints = self.endpoints.write();
        let id = target.id();
        if endpoints.iter().any(|e| e.id() == id) {
            log::debug!("[REGISTRY] register skip (exists) endpoint={}", id.as_u64());
            return false;
        }
        endpoints.push(target);
        log::debug!(
            "[REGISTRY] registered endpoint={} total={}",
            id.as_u64(),
            endpoints.len()
        );
        true
    }

    /// Remove the endpoint with `id`. Returns false if it was not registered.
    pub fn deregister(&self, id: EndpointId) -> bool {
        let mut endpoints = self.endpoints.write();
        let before = endpoints.len();
        endpoints.retain(|e| e.id() != id);
        let removed = endpoints.len() != before;
        if removed {
            log::debug!(
                "[REGISTRY] deregistered endpoint={} total={}",
                id.as_u64(),
                endpoints.len()
            );
        }
        removed
    }

    #[must_use]
    pub fn contains(&self, id: EndpointId) -> bool {
        self.endpoints.read().iter().any(|e| e.id() == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }

    /// Copy of the current endpoint list.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn DispatchTarget>> {
        self.endpoints.read().clone()
    }

    #[must_use]
    pub fn metrics(&self) -> DispatchStats {
        self.metrics.snapshot()
    }

    /// Fan `msg` out to every matching endpoint.
    ///
    /// Returns the number of endpoints that queued a copy.
    ///
    /// # Performance
    /// HOT PATH: called for every frame received or echoed on the interface.
    pub fn deliver(&self, msg: &Message) -> usize {
        self.metrics.messages.fetch_add(1, Ordering::Relaxed);
        let endpoints = self.snapshot();
        let mut delivered = 0;

        for target in &endpoints {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                deliver_to(target.as_ref(), msg)
            }));
            match result {
                Ok(outcome) => {
                    if outcome == DeliveryOutcome::Delivered {
                        delivered += 1;
                    }
                    self.metrics.record(outcome);
                }
                Err(_) => {
                    self.metrics.delivery_errors.fetch_add(1, Ordering::Relaxed);
                    log::debug!(
                        "[DISPATCH] endpoint {} panicked during delivery",
                        target.id().as_u64()
                    );
                }
            }
        }

        delivered
    }
}
