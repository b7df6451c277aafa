// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by every J1939 endpoint operation.
//!
//! Each variant maps onto the errno the equivalent socket call would report
//! (see [`Error::errno`]), so callers bridging to a C socket API can forward
//! the code unchanged.

use std::io;

/// Errors returned by J1939 endpoint, dispatch and segmentation operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Argument / state errors
    // ========================================================================
    /// Malformed address, filter list or option value.
    InvalidArgument(&'static str),
    /// Operation not valid in the current binding state (e.g. connect before bind).
    InvalidState(&'static str),
    /// Option value outside its domain (send priority above 7).
    OutOfRange(u8),

    // ========================================================================
    // Addressing errors
    // ========================================================================
    /// Local address already reserved by another endpoint on this interface.
    AddressInUse(u8),
    /// Exclusive resource (e.g. a transport session for the same peers) busy.
    Busy(&'static str),
    /// Peer address requested on an unconnected endpoint.
    AddressNotAvailable,
    /// Interface index unknown to the bus.
    NoDevice(i32),
    /// Broadcast without the broadcast flag.
    PermissionDenied(&'static str),
    /// Privileged option set without the required capability.
    NotPermitted(&'static str),

    // ========================================================================
    // Transfer errors
    // ========================================================================
    /// Continuation segment found no transport session.
    NotFound,
    /// Continuation write inconsistent with the declared total size.
    Io(&'static str),
    /// Logical message exceeds the extended transport limit.
    MessageTooLarge(usize),
    /// No room for another transport session.
    ResourceExhausted(&'static str),
    /// Transport session aborted the transfer with the given errno.
    TransferAborted(i32),
    /// Non-blocking operation could not make progress.
    WouldBlock,
    /// Blocking wait cancelled by [`crate::Endpoint::interrupt`].
    Interrupted,
    /// Physical link refused the frame.
    Link(io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errno the equivalent socket call reports for this error.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Error::InvalidArgument(_) => libc::EINVAL,
            Error::InvalidState(_) => libc::EBADFD,
            Error::OutOfRange(_) => libc::EDOM,
            Error::AddressInUse(_) => libc::EADDRINUSE,
            Error::Busy(_) => libc::EBUSY,
            Error::AddressNotAvailable => libc::EADDRNOTAVAIL,
            Error::NoDevice(_) => libc::ENODEV,
            Error::PermissionDenied(_) => libc::EACCES,
            Error::NotPermitted(_) => libc::EPERM,
            Error::NotFound => libc::ENOENT,
            Error::Io(_) => libc::EIO,
            Error::MessageTooLarge(_) => libc::EMSGSIZE,
            Error::ResourceExhausted(_) => libc::ENOBUFS,
            Error::TransferAborted(errno) => *errno,
            Error::WouldBlock => libc::EAGAIN,
            Error::Interrupted => libc::EINTR,
            Error::Link(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }

    /// True when a partially queued segmented send may report progress
    /// instead of failing.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::WouldBlock | Error::Interrupted)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::OutOfRange(v) => write!(f, "Value out of range: {} (must be 0-7)", v),
            Error::AddressInUse(sa) => write!(f, "Address 0x{:02x} already in use", sa),
            Error::Busy(msg) => write!(f, "Busy: {}", msg),
            Error::AddressNotAvailable => write!(f, "Peer address not available"),
            Error::NoDevice(ifindex) => write!(f, "No such interface: {}", ifindex),
            Error::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            Error::NotPermitted(msg) => write!(f, "Operation not permitted: {}", msg),
            Error::NotFound => write!(f, "Transport session not found"),
            Error::Io(msg) => write!(f, "I/O error: {}", msg),
            Error::MessageTooLarge(size) => write!(f, "Message too large: {} bytes", size),
            Error::ResourceExhausted(msg) => write!(f, "Resource exhausted: {}", msg),
            Error::TransferAborted(errno) => write!(f, "Transfer aborted (errno {})", errno),
            Error::WouldBlock => write!(f, "Operation would block"),
            Error::Interrupted => write!(f, "Interrupted"),
            Error::Link(e) => write!(f, "Link error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Link(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Link(e)
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Link(inner) => inner,
            Error::WouldBlock => io::Error::from(io::ErrorKind::WouldBlock),
            Error::Interrupted => io::Error::from(io::ErrorKind::Interrupted),
            other => io::Error::from_raw_os_error(other.errno()),
        }
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::InvalidArgument(m) => Error::InvalidArgument(*m),
            Error::InvalidState(m) => Error::InvalidState(*m),
            Error::OutOfRange(v) => Error::OutOfRange(*v),
            Error::AddressInUse(sa) => Error::AddressInUse(*sa),
            Error::Busy(m) => Error::Busy(*m),
            Error::AddressNotAvailable => Error::AddressNotAvailable,
            Error::NoDevice(i) => Error::NoDevice(*i),
            Error::PermissionDenied(m) => Error::PermissionDenied(*m),
            Error::NotPermitted(m) => Error::NotPermitted(*m),
            Error::NotFound => Error::NotFound,
            Error::Io(m) => Error::Io(*m),
            Error::MessageTooLarge(s) => Error::MessageTooLarge(*s),
            Error::ResourceExhausted(m) => Error::ResourceExhausted(*m),
            Error::TransferAborted(e) => Error::TransferAborted(*e),
            Error::WouldBlock => Error::WouldBlock,
            Error::Interrupted => Error::Interrupted,
            Error::Link(e) => Error::Link(match e.raw_os_error() {
                Some(code) => io::Error::from_raw_os_error(code),
                None => io::Error::new(e.kind(), e.to_string()),
            }),
        }
    }
}
