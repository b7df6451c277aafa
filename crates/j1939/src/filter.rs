// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receive-side filtering: which inbound messages an endpoint accepts.
//!
//! Matching is a pure function of an immutable [`MatchView`] (a snapshot of
//! the endpoint's binding state, published whenever that state changes) and
//! the message [`Address`]. Dispatch threads evaluate it without taking any
//! endpoint lock.
//!
//! Evaluation order, first failure wins:
//!
//! 1. promiscuous endpoints skip steps 2-4
//! 2. destination: NAME match when both sides have one, else unicast address
//!    match, else broadcast requires the broadcast flag
//! 3. connected endpoints: source must be the connected peer (NAME, else address)
//! 4. receive PGN filter
//! 5. rule list: any rule matches, or the list is empty

use crate::addr::{address_is_unicast, pgn_is_valid, Address};
use crate::config::{FILTER_MAX, NO_NAME, NO_PGN};
use crate::error::{Error, Result};
use std::sync::Arc;

/// Masked-equality rule over PGN, source address and source NAME.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FilterRule {
    pub pgn: u32,
    pub pgn_mask: u32,
    pub addr: u8,
    pub addr_mask: u8,
    pub name: u64,
    pub name_mask: u64,
}

impl FilterRule {
    /// Rule matching everything.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pgn(mut self, pgn: u32, mask: u32) -> Self {
        self.pgn = pgn;
        self.pgn_mask = mask;
        self
    }

    #[must_use]
    pub fn addr(mut self, addr: u8, mask: u8) -> Self {
        self.addr = addr;
        self.addr_mask = mask;
        self
    }

    #[must_use]
    pub fn name(mut self, name: u64, mask: u64) -> Self {
        self.name = name;
        self.name_mask = mask;
        self
    }

    /// Clear value bits outside the mask so comparisons are plain equality.
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            pgn: self.pgn & self.pgn_mask,
            addr: self.addr & self.addr_mask,
            name: self.name & self.name_mask,
            ..self
        }
    }

    /// Rule must be normalized.
    #[inline]
    #[must_use]
    pub fn matches(&self, addr: &Address) -> bool {
        (addr.pgn & self.pgn_mask) == self.pgn
            && (addr.src_addr & self.addr_mask) == self.addr
            && (addr.src_name & self.name_mask) == self.name
    }
}

/// Validate and normalize a caller-supplied rule list.
pub fn compile_rules(rules: &[FilterRule]) -> Result<Arc<[FilterRule]>> {
    if rules.len() > FILTER_MAX {
        return Err(Error::InvalidArgument("too many filter rules"));
    }
    Ok(rules.iter().map(|r| r.normalized()).collect())
}

/// Immutable snapshot of the endpoint state consulted by dispatch.
#[derive(Debug, Clone)]
pub struct MatchView {
    pub ifindex: i32,
    pub bound: bool,
    pub connected: bool,
    pub promisc: bool,
    pub recv_own: bool,
    pub broadcast: bool,
    /// Local address in `src_*`, connected peer in `dst_*`.
    pub addr: Address,
    pub pgn_rx_filter: u32,
    pub rules: Arc<[FilterRule]>,
}

impl Default for MatchView {
    fn default() -> Self {
        Self {
            ifindex: 0,
            bound: false,
            connected: false,
            promisc: false,
            recv_own: false,
            broadcast: false,
            addr: Address::default(),
            pgn_rx_filter: NO_PGN,
            rules: Arc::from(Vec::new()),
        }
    }
}

/// Destination, peer and PGN checks (steps 1-4).
#[must_use]
pub fn matches_dst(view: &MatchView, msg: &Address) -> bool {
    if view.promisc {
        return true;
    }

    if view.addr.src_name != NO_NAME && msg.dst_name != NO_NAME {
        if view.addr.src_name != msg.dst_name {
            return false;
        }
    } else if address_is_unicast(msg.dst_addr) {
        if view.addr.src_addr != msg.dst_addr {
            return false;
        }
    } else if !view.broadcast {
        return false;
    }

    if view.connected {
        if view.addr.dst_name != NO_NAME && msg.src_name != NO_NAME {
            if view.addr.dst_name != msg.src_name {
                return false;
            }
        } else if view.addr.dst_addr != msg.src_addr {
            return false;
        }
    }

    !(pgn_is_valid(view.pgn_rx_filter) && view.pgn_rx_filter != msg.pgn)
}

/// Rule-list check (step 5).
#[must_use]
pub fn matches_rules(rules: &[FilterRule], msg: &Address) -> bool {
    rules.is_empty() || rules.iter().any(|rule| rule.matches(msg))
}

/// Full receive predicate.
#[inline]
#[must_use]
pub fn matches(view: &MatchView, msg: &Address) -> bool {
    matches_dst(view, msg) && matches_rules(&view.rules, msg)
}
