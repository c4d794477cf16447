// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The discovery engine.
//
// Providers push events from their own threads and tasks; this engine
// drains them from a channel on the calling task, which is the single
// serialization point for one pass. Each pass owns its accumulation
// buffer, so concurrent passes never share state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use etikett_core::config::EngineConfig;
use etikett_core::error::{EtikettError, Result};
use etikett_core::types::{
    DeviceDescriptor, DiscoveryMode, DiscoveryRequest, DiscoverySnapshot, Transport,
};
use etikett_transport::traits::{DiscoveryEvent, TransportProvider};

pub struct DiscoveryEngine {
    config: EngineConfig,
    network: Arc<dyn TransportProvider>,
    usb: Arc<dyn TransportProvider>,
}

impl DiscoveryEngine {
    pub fn new(
        config: EngineConfig,
        network: Arc<dyn TransportProvider>,
        usb: Arc<dyn TransportProvider>,
    ) -> Self {
        Self {
            config,
            network,
            usb,
        }
    }

    /// Run one discovery pass to its transport-signalled completion.
    ///
    /// Network passes have no engine-side deadline; the transport's own
    /// completion ends them.
    pub async fn run(&self, request: DiscoveryRequest) -> Result<DiscoverySnapshot> {
        self.collect(request, None).await
    }

    /// Run one discovery pass with an engine-imposed deadline.
    ///
    /// Used for the bounded USB re-discovery fallback. If neither
    /// completion nor error arrives in time, the pass resolves to
    /// `Timeout` and late results are discarded.
    pub async fn run_with_deadline(
        &self,
        request: DiscoveryRequest,
        deadline: Duration,
    ) -> Result<DiscoverySnapshot> {
        self.collect(request, Some(deadline)).await
    }

    fn provider_for(&self, transport: Transport) -> &Arc<dyn TransportProvider> {
        match transport {
            Transport::Network => &self.network,
            Transport::Usb => &self.usb,
        }
    }

    async fn collect(
        &self,
        request: DiscoveryRequest,
        deadline: Option<Duration>,
    ) -> Result<DiscoverySnapshot> {
        let request = normalize(request);
        let usb_pass = request.mode == DiscoveryMode::UsbEnumeration;
        info!(request = %request.id, mode = %request.mode, "discovery started");

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.provider_for(request.mode.transport())
            .start_discovery(&request, tx)?;

        let mut devices: Vec<DeviceDescriptor> = Vec::new();
        // One terminal signal ends the pass; anything the provider emits
        // afterwards lands in a dropped channel and is ignored.
        let drain = async {
            while let Some(event) = rx.recv().await {
                match event {
                    DiscoveryEvent::Found(device) => {
                        if usb_pass && !self.admit_usb(&device, &devices) {
                            continue;
                        }
                        devices.push(device);
                    }
                    DiscoveryEvent::Finished => return Ok(()),
                    DiscoveryEvent::Error(message) => {
                        return Err(EtikettError::Discovery(message));
                    }
                }
            }
            Err(EtikettError::Discovery(
                "discovery ended without a terminal signal".into(),
            ))
        };

        let outcome = match deadline {
            None => drain.await,
            Some(limit) => match tokio::time::timeout(limit, drain).await {
                Ok(outcome) => outcome,
                Err(_) => Err(EtikettError::Timeout(format!(
                    "discovery did not complete within {}ms",
                    limit.as_millis()
                ))),
            },
        };

        match outcome {
            Ok(()) => {
                info!(request = %request.id, count = devices.len(), "discovery finished");
                Ok(DiscoverySnapshot {
                    request_id: request.id,
                    completed_at: Utc::now(),
                    devices,
                })
            }
            // An error voids the partial list; the two never mix.
            Err(e) => {
                warn!(request = %request.id, error = %e, "discovery failed");
                Err(e)
            }
        }
    }

    /// USB admission: printer filter plus first-wins per address.
    fn admit_usb(&self, device: &DeviceDescriptor, seen: &[DeviceDescriptor]) -> bool {
        let DeviceDescriptor::Usb(printer) = device else {
            return false;
        };
        if printer.vendor_id != self.config.vendor_id
            && printer.device_class != self.config.printer_class
        {
            debug!(
                address = %printer.address,
                vendor = printer.vendor_id,
                class = printer.device_class,
                "device excluded by printer filter"
            );
            return false;
        }
        if seen.iter().any(|d| d.address() == printer.address) {
            debug!(address = %printer.address, "duplicate usb arrival discarded");
            return false;
        }
        true
    }
}

/// Clamp invalid hop counts to 1, mirroring the permissive legacy
/// behavior. Rejecting them as `InvalidArgument` was considered and
/// deliberately not done; see DESIGN.md.
fn normalize(mut request: DiscoveryRequest) -> DiscoveryRequest {
    if let DiscoveryMode::Multicast { hops } = request.mode {
        if hops == 0 {
            warn!(request = %request.id, "multicast hop count 0 clamped to 1");
            request.mode = DiscoveryMode::Multicast { hops: 1 };
        }
    }
    request
}
