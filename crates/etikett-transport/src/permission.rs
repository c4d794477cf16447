// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The OS permission seam for USB devices.
//
// Platforms with a permission dialog deliver a broadcast-style decision
// event some time after a request is fired; the engine's coordinator owns
// the single-flight bookkeeping. This module only defines the seam and a
// host implementation that models udev-style access, where the outcome of
// a probe open IS the decision.

use tokio::sync::broadcast;
use tracing::{debug, info};

use etikett_core::types::UsbPrinter;

use crate::usb::find_device;

/// One permission decision from the OS.
///
/// `device` carries the granted device's address; `None` means denial or
/// a system-level failure. Subscribers treat each decision as fire-once.
#[derive(Debug, Clone)]
pub struct PermissionDecision {
    pub device: Option<String>,
}

/// Asynchronous OS permission collaborator.
///
/// `request_permission` fires the platform prompt and returns
/// immediately; the decision arrives later on the subscription channel,
/// off the calling thread. Subscribe before requesting or the decision
/// can be lost.
pub trait PermissionBroker: Send + Sync {
    /// Whether the device can be opened right now without a prompt.
    fn has_permission(&self, device: &UsbPrinter) -> bool;

    /// Fire the permission prompt for this device.
    fn request_permission(&self, device: &UsbPrinter);

    /// Subscribe to future decisions.
    fn subscribe(&self) -> broadcast::Receiver<PermissionDecision>;
}

/// Host (desktop) broker: access is governed by device-node permissions,
/// so a probe open decides and the decision is published exactly once per
/// request.
pub struct HostPermissionBroker {
    decisions: broadcast::Sender<PermissionDecision>,
}

impl HostPermissionBroker {
    pub fn new() -> Self {
        let (decisions, _) = broadcast::channel(16);
        Self { decisions }
    }

    fn probe(address: &str) -> bool {
        match find_device(address) {
            Ok(Some(info)) => info.open().is_ok(),
            _ => false,
        }
    }
}

impl Default for HostPermissionBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionBroker for HostPermissionBroker {
    fn has_permission(&self, device: &UsbPrinter) -> bool {
        Self::probe(&device.address)
    }

    fn request_permission(&self, device: &UsbPrinter) {
        let address = device.address.clone();
        let decisions = self.decisions.clone();
        info!(device = %address, "usb permission requested");
        tokio::task::spawn_blocking(move || {
            let granted = Self::probe(&address);
            debug!(device = %address, granted, "usb permission decision");
            let _ = decisions.send(PermissionDecision {
                device: granted.then_some(address),
            });
        });
    }

    fn subscribe(&self) -> broadcast::Receiver<PermissionDecision> {
        self.decisions.subscribe()
    }
}
