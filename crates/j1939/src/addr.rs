// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! J1939 addressing: source/destination address and NAME, PGN helpers.
//!
//! An [`Address`] is used twice: as the binding state of an endpoint (source =
//! local side, destination = connected peer) and as the routing header of a
//! [`crate::Message`]. `NO_ADDR` / `NO_NAME` mean "unconstrained" when
//! matching and "broadcast" when sending.

use crate::config::{IDLE_ADDR, NO_ADDR, NO_NAME, NO_PGN, PGN_MAX};
use crate::error::{Error, Result};

/// PGN is within the 18-bit range.
#[inline]
#[must_use]
pub fn pgn_is_valid(pgn: u32) -> bool {
    pgn <= PGN_MAX
}

/// PDU1 format (PF < 240): the low byte of the id is a destination address.
#[inline]
#[must_use]
pub fn pgn_is_pdu1(pgn: u32) -> bool {
    (pgn & 0xFF00) < 0xF000
}

/// A PDU1 PGN must not carry a destination placeholder in its low byte.
#[inline]
#[must_use]
pub fn pgn_is_clean_pdu(pgn: u32) -> bool {
    if pgn_is_pdu1(pgn) {
        pgn & 0xFF == 0
    } else {
        true
    }
}

/// Address identifies a single ECU.
#[inline]
#[must_use]
pub fn address_is_unicast(addr: u8) -> bool {
    addr < IDLE_ADDR
}

/// Address is anything but the broadcast/null address.
#[inline]
#[must_use]
pub fn address_is_valid(addr: u8) -> bool {
    addr != NO_ADDR
}

/// Convert a socket-level priority (higher = more urgent) to J1939 (lower = more urgent).
#[inline]
#[must_use]
pub fn j1939_priority(socket_priority: u32) -> u8 {
    7 - socket_priority.min(7) as u8
}

/// Convert a J1939 priority back to the socket-level value.
#[inline]
#[must_use]
pub fn socket_priority(prio: u8) -> u32 {
    7 - u32::from(prio.min(7))
}

/// Source/destination pair plus PGN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    /// Source (local) address.
    pub src_addr: u8,
    /// Source (local) NAME.
    pub src_name: u64,
    /// Destination (remote) address.
    pub dst_addr: u8,
    /// Destination (remote) NAME.
    pub dst_name: u64,
    /// Parameter group number.
    pub pgn: u32,
}

impl Default for Address {
    fn default() -> Self {
        Self {
            src_addr: NO_ADDR,
            src_name: NO_NAME,
            dst_addr: NO_ADDR,
            dst_name: NO_NAME,
            pgn: NO_PGN,
        }
    }
}

impl Address {
    /// Address with the given source and destination, no names, no PGN.
    #[must_use]
    pub fn new(src_addr: u8, dst_addr: u8, pgn: u32) -> Self {
        Self {
            src_addr,
            dst_addr,
            pgn,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_src_name(mut self, name: u64) -> Self {
        self.src_name = name;
        self
    }

    #[must_use]
    pub fn with_dst_name(mut self, name: u64) -> Self {
        self.dst_name = name;
        self
    }

    /// Neither a destination NAME nor a destination address is set.
    #[inline]
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.dst_name == NO_NAME && self.dst_addr == NO_ADDR
    }

    /// No source NAME and no source address: nothing to send from.
    #[inline]
    #[must_use]
    pub fn has_source(&self) -> bool {
        self.src_name != NO_NAME || self.src_addr != NO_ADDR
    }
}

/// Caller-facing endpoint address: interface, NAME, address and PGN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SockAddr {
    /// Interface index (0 = none).
    pub ifindex: i32,
    /// 64-bit NAME, or `NO_NAME`.
    pub name: u64,
    /// 8-bit address, or `NO_ADDR`.
    pub addr: u8,
    /// PGN, or `NO_PGN`.
    pub pgn: u32,
}

impl SockAddr {
    /// Address-only target on `ifindex` with no PGN.
    #[must_use]
    pub fn new(ifindex: i32, addr: u8) -> Self {
        Self {
            ifindex,
            name: NO_NAME,
            addr,
            pgn: NO_PGN,
        }
    }

    /// NAME-only target on `ifindex`.
    #[must_use]
    pub fn named(ifindex: i32, name: u64) -> Self {
        Self {
            ifindex,
            name,
            addr: NO_ADDR,
            pgn: NO_PGN,
        }
    }

    #[must_use]
    pub fn with_pgn(mut self, pgn: u32) -> Self {
        self.pgn = pgn;
        self
    }

    #[must_use]
    pub fn with_addr(mut self, addr: u8) -> Self {
        self.addr = addr;
        self
    }

    /// No NAME and no address.
    #[inline]
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.name == NO_NAME && self.addr == NO_ADDR
    }

    /// Validation shared by bind and connect.
    pub fn sanity_check(&self) -> Result<()> {
        if self.ifindex == 0 {
            return Err(Error::NoDevice(0));
        }
        if pgn_is_valid(self.pgn) && !pgn_is_clean_pdu(self.pgn) {
            return Err(Error::InvalidArgument("PDU1 PGN with destination byte set"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pgn_classification() {
        assert!(pgn_is_valid(0));
        assert!(pgn_is_valid(PGN_MAX));
        assert!(!pgn_is_valid(NO_PGN));

        // PF = 0xEA (request) is PDU1
        assert!(pgn_is_pdu1(0x0EA00));
        assert!(pgn_is_clean_pdu(0x0EA00));
        assert!(!pgn_is_clean_pdu(0x0EA12));

        // PF = 0xFE is PDU2; low byte is group extension
        assert!(!pgn_is_pdu1(0x0FECA));
        assert!(pgn_is_clean_pdu(0x0FECA));
    }

    #[test]
    fn test_address_classes() {
        assert!(address_is_unicast(0x00));
        assert!(address_is_unicast(0xFD));
        assert!(!address_is_unicast(IDLE_ADDR));
        assert!(!address_is_unicast(NO_ADDR));
        assert!(address_is_valid(IDLE_ADDR));
        assert!(!address_is_valid(NO_ADDR));
    }

    #[test]
    fn test_priority_conversion_is_symmetric() {
        for prio in 0..=7u8 {
            assert_eq!(j1939_priority(socket_priority(prio)), prio);
        }
        assert_eq!(j1939_priority(42), 0);
    }

    #[test]
    fn test_sanity_check() {
        assert!(matches!(
            SockAddr::new(0, 0x10).sanity_check(),
            Err(Error::NoDevice(0))
        ));
        assert!(matches!(
            SockAddr::new(1, 0x10).with_pgn(0x0EA12).sanity_check(),
            Err(Error::InvalidArgument(_))
        ));
        assert!(SockAddr::new(1, 0x10).with_pgn(0x0FECA).sanity_check().is_ok());
        assert!(SockAddr::new(1, NO_ADDR).sanity_check().is_ok());
    }

    #[test]
    fn test_broadcast_detection() {
        assert!(Address::default().is_broadcast());
        assert!(!Address::default().has_source());
        assert!(!Address::new(0x10, 0x20, NO_PGN).is_broadcast());
        assert!(!Address::default().with_dst_name(7).is_broadcast());
        assert!(SockAddr::new(1, NO_ADDR).is_broadcast());
    }
}
