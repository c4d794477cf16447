// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The USB permission coordinator.
//
// OS permission decisions arrive as broadcast events on whatever thread
// the platform uses. This coordinator turns that into a single-flight
// state machine: Idle, then AwaitingPermission while exactly one request
// holds the pending slot, then back to Idle once the decision lands. A
// second request during AwaitingPermission is rejected immediately so the
// original caller's continuation is never silently replaced.

use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use etikett_core::error::{EtikettError, Result};
use etikett_core::types::UsbPrinter;
use etikett_transport::permission::PermissionBroker;

/// Terminal result of one permission round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionOutcome {
    /// Permission holds for the device at this address.
    Granted(String),
    /// The OS reported no usable device (denial or system failure).
    Denied,
}

/// Single-flight bridge from the OS decision stream to one pending
/// request.
pub struct UsbPermissionCoordinator {
    broker: Arc<dyn PermissionBroker>,
    /// The one pending continuation. Read-and-clear is a single
    /// `Option::take` under the lock, so a duplicate decision event can
    /// never complete a continuation twice.
    pending: Arc<Mutex<Option<oneshot::Sender<PermissionOutcome>>>>,
}

impl UsbPermissionCoordinator {
    /// Build the coordinator and start its decision listener.
    ///
    /// Must run inside a tokio runtime; the listener lives as long as the
    /// broker keeps its decision channel open.
    pub fn new(broker: Arc<dyn PermissionBroker>) -> Arc<Self> {
        let coordinator = Arc::new(Self {
            broker,
            pending: Arc::new(Mutex::new(None)),
        });
        coordinator.spawn_listener();
        coordinator
    }

    fn spawn_listener(&self) {
        let mut decisions = self.broker.subscribe();
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            loop {
                match decisions.recv().await {
                    Ok(decision) => {
                        let responder = pending
                            .lock()
                            .expect("permission slot lock poisoned")
                            .take();
                        let Some(responder) = responder else {
                            debug!("permission decision with no pending request dropped");
                            continue;
                        };
                        let outcome = match decision.device {
                            Some(address) => {
                                info!(device = %address, "usb permission granted");
                                PermissionOutcome::Granted(address)
                            }
                            None => {
                                info!("usb permission denied or no device");
                                PermissionOutcome::Denied
                            }
                        };
                        let _ = responder.send(outcome);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "permission decision stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Whether the device can be opened right now. May block briefly on
    /// an OS probe.
    pub fn has_permission(&self, device: &UsbPrinter) -> bool {
        self.broker.has_permission(device)
    }

    /// Whether a permission request is currently in flight.
    pub fn is_awaiting(&self) -> bool {
        self.pending
            .lock()
            .expect("permission slot lock poisoned")
            .is_some()
    }

    /// Resolve permission for `device`, prompting at most once.
    ///
    /// Returns immediately with `Granted` when permission already holds.
    /// Otherwise claims the single pending slot, fires the prompt, and
    /// awaits the decision. A concurrent request while one is pending
    /// fails with `PermissionBusy` without touching the pending slot.
    pub async fn ensure_permission(&self, device: &UsbPrinter) -> Result<PermissionOutcome> {
        if self.broker.has_permission(device) {
            return Ok(PermissionOutcome::Granted(device.address.clone()));
        }

        let receiver = {
            let mut slot = self.pending.lock().expect("permission slot lock poisoned");
            if slot.is_some() {
                return Err(EtikettError::PermissionBusy);
            }
            let (responder, receiver) = oneshot::channel();
            *slot = Some(responder);
            receiver
        };

        info!(device = %device.address, "awaiting usb permission");
        self.broker.request_permission(device);

        receiver
            .await
            .map_err(|_| EtikettError::Unexpected("permission responder dropped".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBroker;
    use etikett_transport::permission::PermissionDecision;
    use std::time::Duration;

    fn printer(address: &str) -> UsbPrinter {
        UsbPrinter {
            address: address.into(),
            vendor_id: 2655,
            product_id: 379,
            device_name: address.into(),
            serial_number: String::new(),
            manufacturer_name: String::new(),
            device_id: 1002,
            device_class: 7,
            device_protocol: 0,
            device_subclass: 0,
            interface_count: 1,
            dns_name: address.into(),
        }
    }

    #[tokio::test]
    async fn granted_without_prompt_when_permission_holds() {
        let broker = Arc::new(MockBroker::new());
        broker.grant("/dev/bus/usb/001/002");
        let coordinator = UsbPermissionCoordinator::new(broker.clone());

        let outcome = coordinator
            .ensure_permission(&printer("/dev/bus/usb/001/002"))
            .await
            .expect("outcome");
        assert_eq!(
            outcome,
            PermissionOutcome::Granted("/dev/bus/usb/001/002".into())
        );
        assert!(broker.requests().is_empty());
    }

    #[tokio::test]
    async fn prompt_then_grant_completes_the_request() {
        let broker = Arc::new(MockBroker::new());
        broker.auto_respond(PermissionDecision {
            device: Some("/dev/bus/usb/001/002".into()),
        });
        let coordinator = UsbPermissionCoordinator::new(broker.clone());

        let outcome = coordinator
            .ensure_permission(&printer("/dev/bus/usb/001/002"))
            .await
            .expect("outcome");
        assert_eq!(
            outcome,
            PermissionOutcome::Granted("/dev/bus/usb/001/002".into())
        );
        assert_eq!(broker.requests(), vec!["/dev/bus/usb/001/002".to_string()]);
        assert!(!coordinator.is_awaiting());
    }

    #[tokio::test]
    async fn prompt_then_denial_completes_with_denied() {
        let broker = Arc::new(MockBroker::new());
        broker.auto_respond(PermissionDecision { device: None });
        let coordinator = UsbPermissionCoordinator::new(broker.clone());

        let outcome = coordinator
            .ensure_permission(&printer("/dev/bus/usb/001/002"))
            .await
            .expect("outcome");
        assert_eq!(outcome, PermissionOutcome::Denied);
        assert!(!coordinator.is_awaiting());
    }

    #[tokio::test]
    async fn second_request_while_pending_is_rejected_busy() {
        let broker = Arc::new(MockBroker::new());
        // No auto-response: the first request stays pending.
        let coordinator = UsbPermissionCoordinator::new(broker.clone());

        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .ensure_permission(&printer("/dev/bus/usb/001/002"))
                    .await
            })
        };

        // Wait until the first request holds the slot.
        while !coordinator.is_awaiting() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let err = coordinator
            .ensure_permission(&printer("/dev/bus/usb/001/003"))
            .await
            .expect_err("second request must be rejected");
        assert_eq!(err.code(), "PERMISSION_BUSY");

        // The original request is still pending and still completes.
        broker.publish(PermissionDecision {
            device: Some("/dev/bus/usb/001/002".into()),
        });
        let outcome = first.await.expect("join").expect("outcome");
        assert_eq!(
            outcome,
            PermissionOutcome::Granted("/dev/bus/usb/001/002".into())
        );
    }

    #[tokio::test]
    async fn duplicate_decision_fires_the_continuation_once() {
        let broker = Arc::new(MockBroker::new());
        let coordinator = UsbPermissionCoordinator::new(broker.clone());

        let pending = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .ensure_permission(&printer("/dev/bus/usb/001/002"))
                    .await
            })
        };
        while !coordinator.is_awaiting() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // The OS event firing twice must not complete anything twice.
        broker.publish(PermissionDecision {
            device: Some("/dev/bus/usb/001/002".into()),
        });
        broker.publish(PermissionDecision {
            device: Some("/dev/bus/usb/001/002".into()),
        });

        let outcome = pending.await.expect("join").expect("outcome");
        assert_eq!(
            outcome,
            PermissionOutcome::Granted("/dev/bus/usb/001/002".into())
        );
        assert!(!coordinator.is_awaiting());
    }
}
