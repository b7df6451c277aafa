// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! J1939 constants and runtime configuration.
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: protocol constants (addresses, PGN range, frame sizes)
//! - **Level 2 (Dynamic)**: [`StackConfig`] for queue depths and segmentation,
//!   passed explicitly to [`crate::Bus::with_config`]
//!
//! # Environment Variables
//!
//! - `J1939_RX_QUEUE` - receive queue depth per endpoint (messages)
//! - `J1939_ERRQUEUE` - error queue depth per endpoint (notifications)
//! - `J1939_SNDBUF` - send buffer per endpoint (bytes)
//! - `J1939_MAX_SEGMENT` - maximum segment handed to a transport session (bytes)

// =======================================================================
// Addressing (SAE J1939-81)
// =======================================================================

/// Null/global address: "no address" on bind, broadcast on send.
pub const NO_ADDR: u8 = 0xFF;

/// Address used while an address claim is pending. Never unicast.
pub const IDLE_ADDR: u8 = 0xFE;

/// Unset 64-bit NAME.
pub const NO_NAME: u64 = 0;

/// Unset PGN marker (one past the valid 18-bit range).
pub const NO_PGN: u32 = 0x40000;

/// Highest valid PGN.
pub const PGN_MAX: u32 = 0x3FFFF;

/// Request PGN.
pub const PGN_REQUEST: u32 = 0x0EA00;

// =======================================================================
// Frame and transport sizes (SAE J1939-21)
// =======================================================================

/// Payload of a single CAN frame.
pub const SINGLE_FRAME_CAPACITY: usize = 8;

/// Payload carried by one TP.DT / ETP.DT packet.
pub const TP_PACKET_PAYLOAD: usize = 7;

/// Largest message the regular transport protocol can carry (7 * 255).
pub const MAX_TP_PACKET_SIZE: usize = TP_PACKET_PAYLOAD * 255;

/// Largest message the extended transport protocol can carry.
pub const MAX_ETP_PACKET_SIZE: usize = TP_PACKET_PAYLOAD * 0x00FF_FFFF;

/// Maximum number of receive filter rules per endpoint.
pub const FILTER_MAX: usize = 512;

/// Default J1939 send priority (0 = most urgent, 7 = least).
pub const DEFAULT_PRIORITY: u8 = 6;

// =======================================================================
// Runtime configuration
// =======================================================================

const DEFAULT_RX_QUEUE: usize = 256;
const DEFAULT_ERRQUEUE: usize = 64;
const DEFAULT_SNDBUF: usize = 212_992;

/// Per-bus tunables applied to every endpoint created on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackConfig {
    /// Receive queue depth per endpoint (messages).
    pub rx_queue_capacity: usize,
    /// Error queue depth per endpoint (notifications).
    pub errqueue_capacity: usize,
    /// Send buffer per endpoint (bytes held by in-flight frames and segments).
    pub send_buffer_bytes: usize,
    /// Largest chunk handed to a transport session in one segment.
    pub max_segment_size: usize,
    /// Largest payload sent as one direct frame.
    pub single_frame_capacity: usize,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            rx_queue_capacity: DEFAULT_RX_QUEUE,
            errqueue_capacity: DEFAULT_ERRQUEUE,
            send_buffer_bytes: DEFAULT_SNDBUF,
            max_segment_size: MAX_TP_PACKET_SIZE,
            single_frame_capacity: SINGLE_FRAME_CAPACITY,
        }
    }
}

impl StackConfig {
    /// Defaults overridden by `J1939_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builder-style override of the segment size.
    #[must_use]
    pub fn with_max_segment_size(mut self, size: usize) -> Self {
        self.max_segment_size = size.max(1);
        self
    }

    /// Builder-style override of the send buffer.
    #[must_use]
    pub fn with_send_buffer(mut self, bytes: usize) -> Self {
        self.send_buffer_bytes = bytes;
        self
    }

    /// Builder-style override of the receive queue depth.
    #[must_use]
    pub fn with_rx_queue(mut self, capacity: usize) -> Self {
        self.rx_queue_capacity = capacity.max(1);
        self
    }

    /// Builder-style override of the error queue depth.
    #[must_use]
    pub fn with_errqueue(mut self, capacity: usize) -> Self {
        self.errqueue_capacity = capacity.max(1);
        self
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = parse_positive(&lookup, "J1939_RX_QUEUE") {
            config.rx_queue_capacity = v;
        }
        if let Some(v) = parse_positive(&lookup, "J1939_ERRQUEUE") {
            config.errqueue_capacity = v;
        }
        if let Some(v) = parse_positive(&lookup, "J1939_SNDBUF") {
            config.send_buffer_bytes = v;
        }
        if let Some(v) = parse_positive(&lookup, "J1939_MAX_SEGMENT") {
            config.max_segment_size = v;
        }
        config
    }
}

fn parse_positive<F>(lookup: &F, key: &str) -> Option<usize>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<usize>() {
        Ok(v) if v > 0 => Some(v),
        _ => {
            log::warn!("[CONFIG] ignoring {}='{}' (expected positive integer)", key, raw);
            None
        }
    }
}

/// Per-endpoint capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointOptions {
    /// Caller may use the two most urgent send priorities (0 and 1).
    pub net_admin: bool,
}

impl EndpointOptions {
    /// Options for a privileged caller.
    #[must_use]
    pub fn privileged() -> Self {
        Self { net_admin: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_transport_limits() {
        assert_eq!(MAX_TP_PACKET_SIZE, 1785);
        assert_eq!(MAX_ETP_PACKET_SIZE, 117_440_505);
        assert!(PGN_MAX < NO_PGN);
    }

    #[test]
    fn test_defaults() {
        let cfg = StackConfig::default();
        assert_eq!(cfg.single_frame_capacity, 8);
        assert_eq!(cfg.max_segment_size, MAX_TP_PACKET_SIZE);
        assert!(cfg.rx_queue_capacity > 0);
    }

    #[test]
    fn test_from_lookup_overrides_and_ignores_garbage() {
        let env: HashMap<&str, &str> = [
            ("J1939_RX_QUEUE", "16"),
            ("J1939_SNDBUF", "not-a-number"),
            ("J1939_MAX_SEGMENT", "0"),
        ]
        .into_iter()
        .collect();

        let cfg = StackConfig::from_lookup(|k| env.get(k).map(|v| (*v).to_string()));
        assert_eq!(cfg.rx_queue_capacity, 16);
        assert_eq!(cfg.send_buffer_bytes, DEFAULT_SNDBUF);
        assert_eq!(cfg.max_segment_size, MAX_TP_PACKET_SIZE);
    }

    #[test]
    fn test_builder_clamps_zero() {
        let cfg = StackConfig::default().with_max_segment_size(0).with_rx_queue(0);
        assert_eq!(cfg.max_segment_size, 1);
        assert_eq!(cfg.rx_queue_capacity, 1);
    }
}
