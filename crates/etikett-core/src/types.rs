// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Etikett discovery & dispatch engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transports a printer can be reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Network,
    Usb,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Usb => write!(f, "usb"),
        }
    }
}

/// A printer found on the local network.
///
/// `port` is only present when the printer reported one; serialization
/// omits it otherwise, matching the wire shape remote callers expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPrinter {
    /// IP address the printer answered from.
    pub address: String,
    /// Reported DNS name, or "Unknown".
    pub dns_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// A printer found on the USB bus.
///
/// `address` is the OS device node (`/dev/bus/usb/BBB/DDD`); the remaining
/// fields are a snapshot of the device descriptor at enumeration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsbPrinter {
    pub address: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_name: String,
    pub serial_number: String,
    pub manufacturer_name: String,
    pub device_id: u32,
    pub device_class: u8,
    pub device_protocol: u8,
    pub device_subclass: u8,
    pub interface_count: u8,
    /// Display name: manufacturer string when present, device node otherwise.
    pub dns_name: String,
}

impl UsbPrinter {
    /// The `vendorId:productId` identity string (decimal, e.g. "2655:379").
    ///
    /// Dispatch targets may name a device either by address or by this
    /// identity, so both must resolve to the same printer.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.vendor_id, self.product_id)
    }

    /// Whether a dispatch target string designates this device.
    pub fn matches(&self, target: &str) -> bool {
        self.address == target || self.identity() == target
    }
}

/// An immutable record identifying a discovered device and how to reach it.
///
/// Produced only by discovery. Identity (equality, hashing, dedup) is the
/// `(transport, address)` pair; the remaining descriptor fields are
/// metadata and deliberately excluded, which is why the impls below are
/// written by hand instead of derived.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum DeviceDescriptor {
    Network(NetworkPrinter),
    Usb(UsbPrinter),
}

impl DeviceDescriptor {
    pub fn transport(&self) -> Transport {
        match self {
            Self::Network(_) => Transport::Network,
            Self::Usb(_) => Transport::Usb,
        }
    }

    pub fn address(&self) -> &str {
        match self {
            Self::Network(p) => &p.address,
            Self::Usb(p) => &p.address,
        }
    }
}

impl PartialEq for DeviceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.transport() == other.transport() && self.address() == other.address()
    }
}

impl Eq for DeviceDescriptor {}

impl std::hash::Hash for DeviceDescriptor {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.transport().hash(state);
        self.address().hash(state);
    }
}

/// How a discovery pass probes for printers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// mDNS query for raw-port printing services on the local network.
    LanQuery,
    /// UDP probe to the limited-broadcast address.
    LocalBroadcast,
    /// UDP probe to a directed broadcast address.
    DirectedBroadcast,
    /// UDP probe to the discovery multicast group with a hop bound.
    Multicast { hops: u32 },
    /// Enumerate the USB bus.
    UsbEnumeration,
}

impl DiscoveryMode {
    pub fn transport(&self) -> Transport {
        match self {
            Self::UsbEnumeration => Transport::Usb,
            _ => Transport::Network,
        }
    }
}

impl std::fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LanQuery => write!(f, "lan-query"),
            Self::LocalBroadcast => write!(f, "local-broadcast"),
            Self::DirectedBroadcast => write!(f, "directed-broadcast"),
            Self::Multicast { hops } => write!(f, "multicast(hops={hops})"),
            Self::UsbEnumeration => write!(f, "usb-enumeration"),
        }
    }
}

/// One discovery invocation. Created per call, discarded after the
/// terminal result is reported.
#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    /// Correlation id for log lines belonging to this pass.
    pub id: Uuid,
    pub mode: DiscoveryMode,
}

impl DiscoveryRequest {
    pub fn new(mode: DiscoveryMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
        }
    }
}

/// The result of one completed discovery pass.
///
/// Always a fresh snapshot; nothing is cached across calls.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverySnapshot {
    pub request_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub devices: Vec<DeviceDescriptor>,
}

/// The printer a dispatch should reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchTarget {
    Network { ip: String, port: u16 },
    Usb { address: String },
}

impl std::fmt::Display for DispatchTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network { ip, port } => write!(f, "{ip}:{port}"),
            Self::Usb { address } => write!(f, "usb {address}"),
        }
    }
}

/// Which path a successful dispatch took to the printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchRoute {
    /// Connected straight to the resolved address / identity.
    Direct,
    /// Direct connect failed; reached the printer via bounded re-discovery.
    Discovery,
}
