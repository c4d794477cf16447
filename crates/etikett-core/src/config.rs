// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Engine configuration.
//
// One `EngineConfig` is owned by each engine instance. There are no
// ambient globals; tests construct independent engines with their own
// timeouts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Zebra Technologies USB vendor id.
pub const ZEBRA_VENDOR_ID: u16 = 2655;

/// USB base class for printers.
pub const USB_PRINTER_CLASS: u8 = 7;

/// ZPL "Cancel All" control sequence, flushes the printer's job buffer.
pub const CLEAR_BUFFER_SEQUENCE: &[u8] = b"~JA";

/// Tunables for discovery and dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Raw printing port (JetDirect).
    pub raw_port: u16,
    /// UDP port probed during broadcast/multicast discovery.
    pub discovery_port: u16,
    /// Vendor id accepted by the USB printer filter.
    pub vendor_id: u16,
    /// Device class accepted by the USB printer filter.
    pub printer_class: u8,
    /// How long an mDNS LAN query collects responses before snapshotting.
    pub lan_query_window: Duration,
    /// How long a UDP probe collects replies before finishing.
    pub broadcast_window: Duration,
    /// TCP connect timeout inside a dispatch attempt.
    pub connect_timeout: Duration,
    /// Watchdog deadline for a whole dispatch.
    pub dispatch_timeout: Duration,
    /// Deadline for the bounded USB re-discovery fallback.
    pub usb_fallback_timeout: Duration,
    /// Bytes written to flush the printer's buffer after an unclean session.
    pub clear_sequence: Vec<u8>,
    /// Pause after a buffer clear so the printer settles before the job.
    pub clear_settle: Duration,
    /// Pause after a USB command write before closing the connection.
    pub usb_write_settle: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            raw_port: 9100,
            discovery_port: 4201,
            vendor_id: ZEBRA_VENDOR_ID,
            printer_class: USB_PRINTER_CLASS,
            lan_query_window: Duration::from_secs(5),
            broadcast_window: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(4),
            dispatch_timeout: Duration::from_secs(5),
            usb_fallback_timeout: Duration::from_secs(5),
            clear_sequence: CLEAR_BUFFER_SEQUENCE.to_vec(),
            clear_settle: Duration::from_millis(100),
            usb_write_settle: Duration::from_millis(200),
        }
    }
}
