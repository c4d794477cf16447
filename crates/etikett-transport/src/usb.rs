// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// USB transport backed by `nusb`.
//
// Enumeration reports every device on the bus; the engine applies the
// printer filter. A connection claims the device's printer-class
// interface (or interface 0 when none advertises class 07h) and writes
// through its bulk-OUT endpoint.

use async_trait::async_trait;
use nusb::transfer::{Direction, EndpointType};
use nusb::{Device, DeviceInfo, Interface, list_devices};
use tokio::sync::mpsc;
use tracing::{debug, info};

use etikett_core::config::EngineConfig;
use etikett_core::error::{EtikettError, Result};
use etikett_core::types::{
    DeviceDescriptor, DiscoveryMode, DiscoveryRequest, DispatchTarget, UsbPrinter,
};

use crate::traits::{Connection, DiscoveryEvent, TransportProvider};

/// The USB transport provider.
pub struct UsbTransport {
    config: EngineConfig,
}

impl UsbTransport {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Snapshot every device currently on the bus.
    ///
    /// Blocking; callers run this on a blocking-capable worker.
    pub fn enumerate() -> Result<Vec<UsbPrinter>> {
        let devices = list_devices()
            .map_err(|e| EtikettError::Discovery(format!("usb enumeration failed: {e}")))?;
        Ok(devices.map(|info| descriptor_from_info(&info)).collect())
    }
}

#[async_trait]
impl TransportProvider for UsbTransport {
    fn start_discovery(
        &self,
        request: &DiscoveryRequest,
        events: mpsc::UnboundedSender<DiscoveryEvent>,
    ) -> Result<()> {
        match request.mode {
            DiscoveryMode::UsbEnumeration => {
                let id = request.id;
                tokio::task::spawn_blocking(move || match UsbTransport::enumerate() {
                    Ok(printers) => {
                        info!(request = %id, count = printers.len(), "usb enumeration complete");
                        for printer in printers {
                            let _ =
                                events.send(DiscoveryEvent::Found(DeviceDescriptor::Usb(printer)));
                        }
                        let _ = events.send(DiscoveryEvent::Finished);
                    }
                    Err(e) => {
                        let _ = events.send(DiscoveryEvent::Error(e.to_string()));
                    }
                });
                Ok(())
            }
            other => Err(EtikettError::Unexpected(format!(
                "{other} routed to the usb provider"
            ))),
        }
    }

    async fn connect(&self, target: &DispatchTarget) -> Result<Box<dyn Connection>> {
        let DispatchTarget::Usb { address } = target else {
            return Err(EtikettError::Unexpected(format!(
                "network target {target} routed to the usb provider"
            )));
        };
        let lookup = address.clone();
        let info = tokio::task::spawn_blocking(move || find_device(&lookup))
            .await
            .map_err(|e| EtikettError::Unexpected(format!("usb lookup task failed: {e}")))??
            .ok_or_else(|| EtikettError::NoDevice(format!("no usb device matching {address}")))?;
        Ok(Box::new(UsbConnection::new(info, self.config.printer_class)))
    }
}

/// The OS device node for a bus/address pair.
pub(crate) fn device_node(bus: u8, address: u8) -> String {
    format!("/dev/bus/usb/{bus:03}/{address:03}")
}

/// Whether a dispatch target string designates the device with this node
/// and identity. Targets may use either the device node or `vid:pid`.
fn target_designates(node: &str, vendor_id: u16, product_id: u16, target: &str) -> bool {
    node == target || format!("{vendor_id}:{product_id}") == target
}

/// Build the full bridge-facing descriptor for one enumerated device.
fn descriptor_from_info(info: &DeviceInfo) -> UsbPrinter {
    let address = device_node(info.bus_number(), info.device_address());
    let manufacturer = info.manufacturer_string().unwrap_or("").to_string();
    let dns_name = if manufacturer.is_empty() {
        address.clone()
    } else {
        manufacturer.clone()
    };
    UsbPrinter {
        device_name: address.clone(),
        vendor_id: info.vendor_id(),
        product_id: info.product_id(),
        serial_number: info.serial_number().unwrap_or("").to_string(),
        manufacturer_name: manufacturer,
        // Bus/address folded the way the kernel numbers device nodes.
        device_id: info.bus_number() as u32 * 1000 + info.device_address() as u32,
        device_class: info.class(),
        device_protocol: info.protocol(),
        device_subclass: info.subclass(),
        interface_count: info.interfaces().count() as u8,
        dns_name,
        address,
    }
}

/// Look up a live device by node or `vid:pid` identity.
pub(crate) fn find_device(target: &str) -> Result<Option<DeviceInfo>> {
    let mut devices = list_devices()
        .map_err(|e| EtikettError::Discovery(format!("usb enumeration failed: {e}")))?;
    Ok(devices.find(|info| {
        target_designates(
            &device_node(info.bus_number(), info.device_address()),
            info.vendor_id(),
            info.product_id(),
            target,
        )
    }))
}

/// A claimed interface plus the bulk-OUT endpoint writes go through.
struct OpenInterface {
    interface: Interface,
    endpoint: u8,
}

/// A byte-stream connection to one USB printer.
pub struct UsbConnection {
    info: DeviceInfo,
    printer_class: u8,
    open_state: Option<OpenInterface>,
}

impl UsbConnection {
    fn new(info: DeviceInfo, printer_class: u8) -> Self {
        Self {
            info,
            printer_class,
            open_state: None,
        }
    }
}

#[async_trait]
impl Connection for UsbConnection {
    async fn open(&mut self) -> Result<()> {
        if self.open_state.is_some() {
            return Ok(());
        }
        let device = self.info.open()?;
        // Prefer the interface that declares itself a printer; some
        // devices only expose the class at interface level.
        let printer_class = self.printer_class;
        let interface_number = self
            .info
            .interfaces()
            .find(|i| i.class() == printer_class)
            .map(|i| i.interface_number())
            .unwrap_or(0);
        let interface = device.claim_interface(interface_number)?;
        let endpoint = bulk_out_endpoint(&device, interface_number)?;
        debug!(
            device = %device_node(self.info.bus_number(), self.info.device_address()),
            interface = interface_number,
            endpoint = format!("{endpoint:#04x}"),
            "usb interface claimed"
        );
        self.open_state = Some(OpenInterface {
            interface,
            endpoint,
        });
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open_state.is_some()
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let state = self
            .open_state
            .as_mut()
            .ok_or_else(|| EtikettError::Unexpected("write on a closed connection".into()))?;
        state
            .interface
            .bulk_out(state.endpoint, bytes.to_vec())
            .await
            .into_result()
            .map_err(|e| EtikettError::Unexpected(format!("usb bulk write: {e}")))?;
        debug!(len = bytes.len(), "usb bulk write complete");
        Ok(())
    }

    async fn close(&mut self) {
        // Dropping the claimed interface releases it; there is no
        // explicit shutdown handshake for bulk pipes.
        if self.open_state.take().is_some() {
            debug!(
                device = %device_node(self.info.bus_number(), self.info.device_address()),
                "usb interface released"
            );
        }
    }
}

/// Find the bulk-OUT endpoint of the claimed interface.
fn bulk_out_endpoint(device: &Device, interface_number: u8) -> Result<u8> {
    let config = device
        .active_configuration()
        .map_err(|e| EtikettError::Unexpected(format!("no active usb configuration: {e}")))?;
    for alt in config.interface_alt_settings() {
        if alt.interface_number() != interface_number {
            continue;
        }
        for endpoint in alt.endpoints() {
            if endpoint.direction() == Direction::Out
                && endpoint.transfer_type() == EndpointType::Bulk
            {
                return Ok(endpoint.address());
            }
        }
    }
    Err(EtikettError::Unexpected(format!(
        "no bulk-out endpoint on interface {interface_number}"
    )))
}
