// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # j1939 - SAE J1939 endpoint dispatch and segmented send
//!
//! In-process J1939 endpoints over a shared CAN bus: NAME/address binding,
//! receive filtering and fan-out, single-frame and segmented transmission,
//! and asynchronous completion reporting.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use j1939::{Bus, Endpoint, Flag, RecvFlags, RecordingLink, SockAddr, NO_ADDR, Result};
//!
//! fn main() -> Result<()> {
//!     let bus = Bus::new();
//!     bus.add_interface(1, Arc::new(RecordingLink::new()))?;
//!
//!     let tx = Endpoint::new(&bus);
//!     tx.bind(&SockAddr::new(1, 0x10))?;
//!     tx.set_flag(Flag::Broadcast, true);
//!
//!     let rx = Endpoint::new(&bus);
//!     rx.bind(&SockAddr::new(1, 0x20))?;
//!     rx.set_flag(Flag::Broadcast, true);
//!
//!     tx.send_to(&[1, 2, 3], &SockAddr::new(1, NO_ADDR).with_pgn(0x0FECA))?;
//!     let msg = rx.recv(8, RecvFlags::nonblocking())?;
//!     assert_eq!(msg.payload, vec![1, 2, 3]);
//!     assert_eq!(msg.source.addr, 0x10);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                        Endpoint (socket API)                        |
//! |   bind | connect | options | send | recv | errqueue | close         |
//! +---------------------------------------------------------------------+
//! |   Segmented send          |   Dispatch registry + filter matcher    |
//! |   (split, attach session) |   (fan-out of inbound messages)         |
//! +---------------------------------------------------------------------+
//! |   Session manager (TP/ETP) -- completion events --> error queue     |
//! +---------------------------------------------------------------------+
//! |                      CanLink (single frames)                        |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Bus`] | Set of interfaces, entry point |
//! | [`Interface`] | One CAN device: registry, reservations, link, sessions |
//! | [`Endpoint`] | Bound communication handle |
//! | [`FilterRule`] | Masked-equality receive rule |
//! | [`SessionManager`] | Transport session collaborator |
//! | [`SessionTable`] | In-process session manager with a driver API |
//!
//! ## Environment Variables
//!
//! See [`config`] for `J1939_*` tunables read by [`StackConfig::from_env`].

/// Address, NAME and PGN helpers.
pub mod addr;
/// Completion notifications and the per-endpoint error queue.
pub mod completion;
/// Protocol constants and runtime configuration.
pub mod config;
/// Endpoint API.
pub mod endpoint;
/// Error type.
pub mod error;
/// Receive filter matching.
pub mod filter;
/// Bus, interfaces and local ECU reservations.
pub mod iface;
/// Single-frame link abstraction.
pub mod link;
/// Messages and send buffer accounting.
pub mod message;
/// Dispatch registry and fan-out.
pub mod registry;
mod segment;
/// Transport session collaborator and the in-process session table.
pub mod session;
/// Interruptible waits and the pending-transfer counter.
pub mod wait;

pub use addr::{Address, SockAddr};
pub use completion::{
    CompletionEvent, ErrorQueue, Notification, NotificationKind, NotificationOrigin,
    SessionOwner, SessionProgress,
};
pub use config::{
    EndpointOptions, StackConfig, IDLE_ADDR, MAX_ETP_PACKET_SIZE, MAX_TP_PACKET_SIZE, NO_ADDR,
    NO_NAME, NO_PGN, PGN_MAX, PGN_REQUEST,
};
pub use endpoint::{Ancillary, Endpoint, EndpointFlags, Flag, Received, RecvFlags, SendFlags};
pub use error::{Error, Result};
pub use filter::FilterRule;
pub use iface::{Bus, Interface};
pub use link::{CanLink, LinkStats, NullLink, RecordingLink, SentFrame};
pub use message::{EndpointId, Message, MessageMeta, MsgFlags};
pub use registry::{DeliveryOutcome, DispatchRegistry, DispatchStats, DispatchTarget};
pub use session::{
    QueuedSession, SessionHandle, SessionKey, SessionManager, SessionTable, TransportSession,
};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
