// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Etikett Transport — concrete device transports behind a narrow provider
// contract. The engine crate only depends on the traits in `traits`; the
// network (mDNS + UDP probe + raw TCP) and USB (nusb) implementations live
// here so they can be swapped for mocks in engine tests.

pub mod net;
pub mod permission;
pub mod traits;
pub mod usb;

pub use net::NetworkTransport;
pub use permission::{HostPermissionBroker, PermissionBroker, PermissionDecision};
pub use traits::{Connection, DiscoveryEvent, TransportProvider};
pub use usb::UsbTransport;
