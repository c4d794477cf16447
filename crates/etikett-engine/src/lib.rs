// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Etikett Engine — discovery passes, the USB permission state machine,
// and the serialized command dispatcher, wired together behind the
// `PrintEngine` facade. Transports are injected, so tests run the whole
// engine against scripted providers.

use std::sync::Arc;

use etikett_core::config::EngineConfig;
use etikett_core::error::{EtikettError, Result};
use etikett_core::types::{
    DeviceDescriptor, DiscoveryMode, DiscoveryRequest, DiscoverySnapshot, DispatchRoute,
    DispatchTarget,
};
use etikett_transport::permission::PermissionBroker;
use etikett_transport::traits::TransportProvider;
use etikett_transport::{HostPermissionBroker, NetworkTransport, UsbTransport};

pub mod discovery;
pub mod dispatch;
pub mod health;
pub mod permission;

#[cfg(test)]
mod testing;

pub use discovery::DiscoveryEngine;
pub use dispatch::CommandDispatcher;
pub use health::ConnectionHealth;
pub use permission::{PermissionOutcome, UsbPermissionCoordinator};

/// One printing subsystem instance.
///
/// Owns the two pieces of cross-call mutable state (connection health and
/// the pending permission slot) and the FIFO dispatch worker. Independent
/// instances share nothing, so tests construct as many as they like.
pub struct PrintEngine {
    config: EngineConfig,
    discovery: Arc<DiscoveryEngine>,
    permissions: Arc<UsbPermissionCoordinator>,
    dispatcher: CommandDispatcher,
}

impl PrintEngine {
    /// Build an engine on the host transports. Must run inside a tokio
    /// runtime; worker tasks are spawned here.
    pub fn new(config: EngineConfig) -> Self {
        let network: Arc<dyn TransportProvider> = Arc::new(NetworkTransport::new(config.clone()));
        let usb: Arc<dyn TransportProvider> = Arc::new(UsbTransport::new(config.clone()));
        let broker: Arc<dyn PermissionBroker> = Arc::new(HostPermissionBroker::new());
        Self::with_providers(config, network, usb, broker)
    }

    /// Build an engine on injected transports and permission broker.
    pub fn with_providers(
        config: EngineConfig,
        network: Arc<dyn TransportProvider>,
        usb: Arc<dyn TransportProvider>,
        broker: Arc<dyn PermissionBroker>,
    ) -> Self {
        let health = Arc::new(ConnectionHealth::new());
        let discovery = Arc::new(DiscoveryEngine::new(
            config.clone(),
            Arc::clone(&network),
            Arc::clone(&usb),
        ));
        let permissions = UsbPermissionCoordinator::new(broker);
        let dispatcher = CommandDispatcher::new(
            config.clone(),
            health,
            network,
            usb,
            Arc::clone(&discovery),
            Arc::clone(&permissions),
        );
        Self {
            config,
            discovery,
            permissions,
            dispatcher,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one discovery pass for the given mode.
    ///
    /// USB enumeration folds in the permission flow: when a discovered
    /// printer lacks permission, one prompt is issued, and on grant the
    /// pass re-runs with permission in place.
    pub async fn discover(&self, mode: DiscoveryMode) -> Result<DiscoverySnapshot> {
        match mode {
            DiscoveryMode::UsbEnumeration => self.discover_usb().await,
            _ => self.discovery.run(DiscoveryRequest::new(mode)).await,
        }
    }

    async fn discover_usb(&self) -> Result<DiscoverySnapshot> {
        let snapshot = self
            .discovery
            .run(DiscoveryRequest::new(DiscoveryMode::UsbEnumeration))
            .await?;
        let lacking = snapshot.devices.iter().find_map(|device| match device {
            DeviceDescriptor::Usb(p) if !self.permissions.has_permission(p) => Some(p.clone()),
            _ => None,
        });
        // All discovered printers already usable: the snapshot stands.
        let Some(printer) = lacking else {
            return Ok(snapshot);
        };
        match self.permissions.ensure_permission(&printer).await? {
            PermissionOutcome::Granted(_) => {
                self.discovery
                    .run(DiscoveryRequest::new(DiscoveryMode::UsbEnumeration))
                    .await
            }
            PermissionOutcome::Denied => Err(EtikettError::NoDevice(
                "usb permission request yielded no usable device".into(),
            )),
        }
    }

    /// Send raw command bytes to a network printer.
    pub async fn send_command(&self, ip: &str, port: u16, command: &[u8]) -> Result<DispatchRoute> {
        if ip.trim().is_empty() {
            return Err(EtikettError::InvalidArgument(
                "ipAddress must not be empty".into(),
            ));
        }
        self.dispatcher
            .dispatch(
                DispatchTarget::Network {
                    ip: ip.to_string(),
                    port,
                },
                command.to_vec(),
            )
            .await
    }

    /// Send raw command bytes to a USB printer, by device node or
    /// `vid:pid` identity.
    pub async fn send_command_usb(&self, address: &str, command: &[u8]) -> Result<DispatchRoute> {
        if address.trim().is_empty() {
            return Err(EtikettError::InvalidArgument(
                "deviceAddress must not be empty".into(),
            ));
        }
        self.dispatcher
            .dispatch(
                DispatchTarget::Usb {
                    address: address.to_string(),
                },
                command.to_vec(),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{plan, MockBroker, MockProvider};
    use etikett_core::types::{NetworkPrinter, UsbPrinter};
    use etikett_transport::permission::PermissionDecision;

    struct Fixture {
        engine: PrintEngine,
        usb: Arc<MockProvider>,
        broker: Arc<MockBroker>,
    }

    fn fixture() -> Fixture {
        let network = Arc::new(MockProvider::default());
        let usb = Arc::new(MockProvider::default());
        let broker = Arc::new(MockBroker::new());
        let engine = PrintEngine::with_providers(
            EngineConfig::default(),
            network.clone(),
            usb.clone(),
            broker.clone(),
        );
        Fixture {
            engine,
            usb,
            broker,
        }
    }

    fn zebra_printer(address: &str) -> UsbPrinter {
        UsbPrinter {
            address: address.into(),
            vendor_id: 2655,
            product_id: 379,
            device_name: address.into(),
            serial_number: String::new(),
            manufacturer_name: "Zebra Technologies".into(),
            device_id: 1003,
            device_class: 7,
            device_protocol: 2,
            device_subclass: 1,
            interface_count: 1,
            dns_name: "Zebra Technologies".into(),
        }
    }

    #[tokio::test]
    async fn network_discovery_passes_through() {
        let fx = fixture();
        let network = Arc::new(MockProvider::with_plan(plan::devices(vec![
            DeviceDescriptor::Network(NetworkPrinter {
                address: "10.0.0.5".into(),
                dns_name: "zt410.local".into(),
                port: Some(9100),
            }),
        ])));
        let engine = PrintEngine::with_providers(
            EngineConfig::default(),
            network,
            fx.usb.clone(),
            fx.broker.clone(),
        );

        let snapshot = engine
            .discover(DiscoveryMode::Multicast { hops: 3 })
            .await
            .expect("snapshot");
        assert_eq!(snapshot.devices.len(), 1);
        assert_eq!(snapshot.devices[0].address(), "10.0.0.5");
    }

    #[tokio::test]
    async fn usb_discovery_without_prompt_when_permitted() {
        let fx = fixture();
        let printer = zebra_printer("/dev/bus/usb/001/003");
        fx.usb
            .set_plan(plan::devices(vec![DeviceDescriptor::Usb(printer)]));
        fx.broker.grant("/dev/bus/usb/001/003");

        let snapshot = fx
            .engine
            .discover(DiscoveryMode::UsbEnumeration)
            .await
            .expect("snapshot");
        assert_eq!(snapshot.devices.len(), 1);
        assert_eq!(fx.usb.discovery_runs(), 1);
        assert!(fx.broker.requests().is_empty());
    }

    #[tokio::test]
    async fn usb_discovery_prompts_once_and_reruns_on_grant() {
        let fx = fixture();
        let printer = zebra_printer("/dev/bus/usb/001/003");
        fx.usb
            .set_plan(plan::devices(vec![DeviceDescriptor::Usb(printer)]));
        fx.broker.auto_respond(PermissionDecision {
            device: Some("/dev/bus/usb/001/003".into()),
        });

        let snapshot = fx
            .engine
            .discover(DiscoveryMode::UsbEnumeration)
            .await
            .expect("snapshot");
        assert_eq!(snapshot.devices.len(), 1);
        assert_eq!(fx.usb.discovery_runs(), 2);
        assert_eq!(
            fx.broker.requests(),
            vec!["/dev/bus/usb/001/003".to_string()]
        );
    }

    #[tokio::test]
    async fn usb_discovery_denial_reports_no_device() {
        let fx = fixture();
        let printer = zebra_printer("/dev/bus/usb/001/003");
        fx.usb
            .set_plan(plan::devices(vec![DeviceDescriptor::Usb(printer)]));
        fx.broker.auto_respond(PermissionDecision { device: None });

        let err = fx
            .engine
            .discover(DiscoveryMode::UsbEnumeration)
            .await
            .expect_err("denial should fail the pass");
        assert_eq!(err.code(), "NO_DEVICE");
    }

    #[tokio::test]
    async fn usb_discovery_with_no_devices_is_an_empty_snapshot() {
        let fx = fixture();
        let snapshot = fx
            .engine
            .discover(DiscoveryMode::UsbEnumeration)
            .await
            .expect("snapshot");
        assert!(snapshot.devices.is_empty());
        assert!(fx.broker.requests().is_empty());
    }

    #[tokio::test]
    async fn blank_addresses_fail_fast() {
        let fx = fixture();
        let err = fx
            .engine
            .send_command(" ", 9100, b"^XA^XZ")
            .await
            .expect_err("blank ip");
        assert_eq!(err.code(), "INVALID_ARGUMENT");

        let err = fx
            .engine
            .send_command_usb("", b"^XA^XZ")
            .await
            .expect_err("blank address");
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }
}
