// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::unreadable_literal)] // NAME constants
#![allow(clippy::missing_panics_doc)] // Tests panic on failure

//! Endpoint binding protocol: bind, rebind, reservations, connect, close.

use j1939::{
    Address, Bus, Endpoint, Error, Flag, Message, RecordingLink, RecvFlags, SockAddr, NO_ADDR,
    NO_NAME, NO_PGN,
};
use std::sync::Arc;

fn bus_with_interfaces(ifindexes: &[i32]) -> Bus {
    let bus = Bus::new();
    for &ifindex in ifindexes {
        bus.add_interface(ifindex, Arc::new(RecordingLink::new()))
            .expect("add interface");
    }
    bus
}

// ============================================================================
// bind
// ============================================================================

#[test]
fn test_bind_requires_known_interface() {
    let bus = bus_with_interfaces(&[1]);
    let ep = Endpoint::new(&bus);

    assert!(matches!(
        ep.bind(&SockAddr::new(0, 0x10)),
        Err(Error::NoDevice(0))
    ));
    assert!(matches!(
        ep.bind(&SockAddr::new(7, 0x10)),
        Err(Error::NoDevice(7))
    ));
    assert!(!ep.flags().bound);
}

#[test]
fn test_bind_rejects_unclean_pdu1_pgn() {
    let bus = bus_with_interfaces(&[1]);
    let ep = Endpoint::new(&bus);
    let err = ep
        .bind(&SockAddr::new(1, 0x10).with_pgn(0x0EF12))
        .expect_err("PDU1 with destination byte");
    assert_eq!(err.errno(), libc::EINVAL);
}

#[test]
fn test_rebind_same_interface_is_idempotent() {
    let bus = bus_with_interfaces(&[1]);
    let iface = bus.interface(1).expect("iface");
    let ep = Endpoint::new(&bus);

    ep.bind(&SockAddr::new(1, 0x10)).expect("bind");
    ep.bind(&SockAddr::new(1, 0x10)).expect("rebind");

    assert_eq!(iface.registry().len(), 1);
    assert_eq!(iface.users(), 1);
    assert_eq!(ep.local_addr().addr, 0x10);
}

#[test]
fn test_rebind_moves_address_reservation() {
    let bus = bus_with_interfaces(&[1]);
    let a = Endpoint::new(&bus);
    a.bind(&SockAddr::new(1, 0x10)).expect("bind");
    a.bind(&SockAddr::new(1, 0x11)).expect("rebind to new address");

    // 0x10 is free again, 0x11 is taken.
    let b = Endpoint::new(&bus);
    b.bind(&SockAddr::new(1, 0x10)).expect("old address released");
    assert!(matches!(
        Endpoint::new(&bus).bind(&SockAddr::new(1, 0x11)),
        Err(Error::AddressInUse(0x11))
    ));
}

#[test]
fn test_rebind_to_other_interface_rejected() {
    let bus = bus_with_interfaces(&[1, 2]);
    let ep = Endpoint::new(&bus);
    ep.bind(&SockAddr::new(1, 0x10)).expect("bind");

    assert!(matches!(
        ep.bind(&SockAddr::new(2, 0x10)),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(ep.local_addr().ifindex, 1);
}

#[test]
fn test_failed_rebind_keeps_old_reservation() {
    let bus = bus_with_interfaces(&[1]);
    let a = Endpoint::new(&bus);
    let b = Endpoint::new(&bus);
    a.bind(&SockAddr::new(1, 0x10)).expect("bind a");
    b.bind(&SockAddr::new(1, 0x20)).expect("bind b");

    assert!(matches!(
        a.bind(&SockAddr::new(1, 0x20)),
        Err(Error::AddressInUse(0x20))
    ));
    assert_eq!(a.local_addr().addr, 0x10);
    assert!(a.flags().bound);

    // a still holds 0x10
    assert!(matches!(
        Endpoint::new(&bus).bind(&SockAddr::new(1, 0x10)),
        Err(Error::AddressInUse(0x10))
    ));
}

#[test]
fn test_failed_first_bind_releases_interface() {
    let bus = bus_with_interfaces(&[1]);
    let iface = bus.interface(1).expect("iface");
    let a = Endpoint::new(&bus);
    a.bind(&SockAddr::new(1, 0x10)).expect("bind");

    let b = Endpoint::new(&bus);
    assert!(b.bind(&SockAddr::new(1, 0x10)).is_err());
    assert!(!b.flags().bound);
    assert_eq!(iface.users(), 1);
    assert_eq!(iface.registry().len(), 1);
}

// ============================================================================
// reservations
// ============================================================================

#[test]
fn test_exclusive_address_per_interface() {
    let bus = bus_with_interfaces(&[1, 2]);
    let a = Endpoint::new(&bus);
    let b = Endpoint::new(&bus);
    a.bind(&SockAddr::new(1, 0x10)).expect("bind a");

    let err = b.bind(&SockAddr::new(1, 0x10)).expect_err("conflict");
    assert_eq!(err.errno(), libc::EADDRINUSE);

    // Same address on another interface is fine.
    b.bind(&SockAddr::new(2, 0x10)).expect("other interface");

    a.close().expect("close a");
    let c = Endpoint::new(&bus);
    c.bind(&SockAddr::new(1, 0x10)).expect("released by close");
}

#[test]
fn test_named_bindings_never_collide() {
    let bus = bus_with_interfaces(&[1]);
    let name = 0x00A0_0000_1234_5678;
    let a = Endpoint::new(&bus);
    let b = Endpoint::new(&bus);

    a.bind(&SockAddr::named(1, name).with_addr(0x10)).expect("bind a");
    b.bind(&SockAddr::named(1, name).with_addr(0x10)).expect("bind b");

    // NAME claims do not take the bare address.
    Endpoint::new(&bus)
        .bind(&SockAddr::new(1, 0x10))
        .expect("address-only bind");
}

#[test]
fn test_listen_only_binds_reserve_nothing() {
    let bus = bus_with_interfaces(&[1]);
    let a = Endpoint::new(&bus);
    let b = Endpoint::new(&bus);
    a.bind(&SockAddr::new(1, NO_ADDR)).expect("bind a");
    b.bind(&SockAddr::new(1, NO_ADDR)).expect("bind b");
    assert_eq!(bus.interface(1).expect("iface").users(), 2);
}

// ============================================================================
// connect / getname
// ============================================================================

#[test]
fn test_connect_requires_bind() {
    let bus = bus_with_interfaces(&[1]);
    let ep = Endpoint::new(&bus);
    let err = ep.connect(&SockAddr::new(1, 0x20)).expect_err("unbound");
    assert!(matches!(err, Error::InvalidState(_)));
}

#[test]
fn test_connect_other_interface_rejected() {
    let bus = bus_with_interfaces(&[1, 2]);
    let ep = Endpoint::new(&bus);
    ep.bind(&SockAddr::new(1, 0x10)).expect("bind");
    assert!(matches!(
        ep.connect(&SockAddr::new(2, 0x20)),
        Err(Error::InvalidArgument(_))
    ));
}

#[test]
fn test_connect_broadcast_needs_flag() {
    let bus = bus_with_interfaces(&[1]);
    let ep = Endpoint::new(&bus);
    ep.bind(&SockAddr::new(1, 0x10)).expect("bind");

    let err = ep
        .connect(&SockAddr::new(1, NO_ADDR))
        .expect_err("broadcast peer");
    assert_eq!(err.errno(), libc::EACCES);
    assert!(!ep.flags().connected);

    ep.set_flag(Flag::Broadcast, true);
    ep.connect(&SockAddr::new(1, NO_ADDR)).expect("broadcast allowed");
    assert!(ep.flags().connected);
}

#[test]
fn test_local_and_peer_addresses() {
    let bus = bus_with_interfaces(&[1]);
    let ep = Endpoint::new(&bus);
    ep.bind(&SockAddr::named(1, 0x1111).with_addr(0x10))
        .expect("bind");

    assert!(matches!(ep.peer_addr(), Err(Error::AddressNotAvailable)));

    ep.connect(&SockAddr::named(1, 0x2222).with_addr(0x20).with_pgn(0x0EF00))
        .expect("connect");

    let local = ep.local_addr();
    assert_eq!(local.ifindex, 1);
    assert_eq!(local.name, 0x1111);
    assert_eq!(local.addr, 0x10);
    assert_eq!(local.pgn, 0x0EF00);

    let peer = ep.peer_addr().expect("connected");
    assert_eq!(peer.name, 0x2222);
    assert_eq!(peer.addr, 0x20);
    assert_eq!(peer.pgn, 0x0EF00);
}

#[test]
fn test_connect_without_pgn_keeps_transmit_pgn() {
    let bus = bus_with_interfaces(&[1]);
    let ep = Endpoint::new(&bus);
    ep.bind(&SockAddr::new(1, 0x10)).expect("bind");
    ep.connect(&SockAddr::new(1, 0x20).with_pgn(0x0EF00))
        .expect("connect");
    ep.connect(&SockAddr::new(1, 0x21)).expect("reconnect");

    let peer = ep.peer_addr().expect("connected");
    assert_eq!(peer.addr, 0x21);
    assert_eq!(peer.pgn, 0x0EF00);
    assert_eq!(peer.name, NO_NAME);
}

// ============================================================================
// close / link events
// ============================================================================

#[test]
fn test_close_releases_everything() {
    let bus = bus_with_interfaces(&[1]);
    let iface = bus.interface(1).expect("iface");
    let ep = Endpoint::new(&bus);
    ep.bind(&SockAddr::new(1, 0x10)).expect("bind");

    ep.close().expect("close");
    assert!(ep.is_closed());
    assert_eq!(iface.users(), 0);
    assert!(iface.registry().is_empty());

    ep.close().expect("second close is a no-op");
    assert!(matches!(
        ep.bind(&SockAddr::new(1, 0x10)),
        Err(Error::InvalidState(_))
    ));
}

#[test]
fn test_close_unbound_endpoint() {
    let bus = bus_with_interfaces(&[1]);
    let ep = Endpoint::new(&bus);
    ep.close().expect("close");
    assert!(ep.is_closed());
}

#[test]
fn test_interface_removal_reports_no_device() {
    let bus = bus_with_interfaces(&[1]);
    let iface = bus.interface(1).expect("iface");
    let ep = Endpoint::new(&bus);
    ep.bind(&SockAddr::new(1, 0x10).with_pgn(0x0FECA)).expect("bind");
    ep.set_filters(&[j1939::FilterRule::any().pgn(0x0FECA, 0x3FFFF)])
        .expect("filters");

    bus.remove_interface(1).expect("removed");

    assert!(matches!(ep.take_error(), Some(Error::NoDevice(1))));
    assert!(ep.take_error().is_none());
    assert_eq!(iface.users(), 0);
    // Filters survive the event.
    assert_eq!(ep.filters().len(), 1);

    assert!(matches!(
        ep.send_to(&[1, 2, 3], &SockAddr::new(1, 0x20)),
        Err(Error::NoDevice(1))
    ));
    ep.close().expect("close after removal");
    assert_eq!(iface.users(), 0);
}

#[test]
fn test_bind_after_interface_readded_starts_fresh() {
    let bus = bus_with_interfaces(&[1]);
    let old = bus.interface(1).expect("iface");
    let ep = Endpoint::new(&bus);
    ep.bind(&SockAddr::new(1, 0x10)).expect("bind");

    bus.remove_interface(1).expect("removed");
    let new = bus
        .add_interface(1, Arc::new(RecordingLink::new()))
        .expect("re-add interface");
    assert!(matches!(ep.take_error(), Some(Error::NoDevice(1))));

    ep.bind(&SockAddr::new(1, 0x10)).expect("bind on new interface");
    assert!(ep.flags().bound);
    assert_eq!(new.users(), 1);
    assert_eq!(new.registry().len(), 1);
    assert_eq!(old.users(), 0);
    assert!(old.registry().is_empty());

    let msg = Message::inbound(1, Address::new(0x20, 0x10, 0x0EF00), 6, &[7]);
    assert_eq!(new.receive(&msg), 1);
    let got = ep.recv(8, RecvFlags::nonblocking()).expect("recv");
    assert_eq!(got.payload, vec![7]);

    ep.close().expect("close");
    assert_eq!(new.users(), 0);
    assert!(new.registry().is_empty());

    let other = Endpoint::new(&bus);
    other
        .bind(&SockAddr::new(1, 0x10))
        .expect("address released on the new interface");
}

#[test]
fn test_link_event_sets_sticky_error_only() {
    let bus = bus_with_interfaces(&[1]);
    let iface = bus.interface(1).expect("iface");
    let ep = Endpoint::new(&bus);
    ep.bind(&SockAddr::new(1, 0x10)).expect("bind");

    iface.link_event(Error::Link(std::io::Error::from_raw_os_error(libc::ENETDOWN)));
    let err = ep.take_error().expect("sticky error");
    assert_eq!(err.errno(), libc::ENETDOWN);
    assert_eq!(iface.users(), 1);
    assert_eq!(ep.local_addr().pgn, NO_PGN);
}
