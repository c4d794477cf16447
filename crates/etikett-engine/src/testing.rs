// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Channel-driven test doubles for the engine: a scriptable transport
// provider, a scriptable connection that records every step it takes,
// and a permission broker whose decisions the test injects.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use etikett_core::error::{EtikettError, Result};
use etikett_core::types::{DeviceDescriptor, DiscoveryRequest, DispatchTarget, UsbPrinter};
use etikett_transport::permission::{PermissionBroker, PermissionDecision};
use etikett_transport::traits::{Connection, DiscoveryEvent, TransportProvider};

// -- connection event log ---------------------------------------------------

/// Everything every mock connection did, in global order.
#[derive(Clone)]
pub(crate) struct EventLog {
    events: Arc<Mutex<Vec<MockEvent>>>,
}

impl EventLog {
    pub(crate) fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn record(&self, event: MockEvent) {
        self.events.lock().expect("event log lock").push(event);
    }

    pub(crate) fn events(&self) -> Vec<MockEvent> {
        self.events.lock().expect("event log lock").clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MockEvent {
    Open(&'static str),
    OpenFailed(&'static str),
    Write(&'static str, Vec<u8>),
    WriteFailed(&'static str),
    Close(&'static str),
}

impl MockEvent {
    pub(crate) fn tag(&self) -> &'static str {
        match self {
            Self::Open(tag)
            | Self::OpenFailed(tag)
            | Self::WriteFailed(tag)
            | Self::Close(tag) => tag,
            Self::Write(tag, _) => tag,
        }
    }
}

// -- mock connection --------------------------------------------------------

/// A scriptable connection. By default every step succeeds.
pub(crate) struct MockConnection {
    tag: &'static str,
    log: EventLog,
    fail_open: bool,
    fail_write_at: Option<usize>,
    open_delay: Duration,
    opened: bool,
    writes_seen: usize,
}

impl MockConnection {
    pub(crate) fn tagged(log: EventLog, tag: &'static str) -> Self {
        Self {
            tag,
            log,
            fail_open: false,
            fail_write_at: None,
            open_delay: Duration::ZERO,
            opened: false,
            writes_seen: 0,
        }
    }

    pub(crate) fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Fail the nth write on this connection (0-based).
    pub(crate) fn failing_write_at(mut self, n: usize) -> Self {
        self.fail_write_at = Some(n);
        self
    }

    pub(crate) fn delayed_open(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn open(&mut self) -> Result<()> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        if self.fail_open {
            self.log.record(MockEvent::OpenFailed(self.tag));
            return Err(EtikettError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "scripted open failure",
            )));
        }
        self.opened = true;
        self.log.record(MockEvent::Open(self.tag));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.opened
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.opened {
            return Err(EtikettError::Unexpected("write on a closed connection".into()));
        }
        let index = self.writes_seen;
        self.writes_seen += 1;
        if self.fail_write_at == Some(index) {
            self.log.record(MockEvent::WriteFailed(self.tag));
            return Err(EtikettError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "scripted write failure",
            )));
        }
        self.log.record(MockEvent::Write(self.tag, bytes.to_vec()));
        Ok(())
    }

    async fn close(&mut self) {
        self.opened = false;
        self.log.record(MockEvent::Close(self.tag));
    }
}

// -- mock provider ----------------------------------------------------------

/// What a discovery pass should report.
#[derive(Clone)]
pub(crate) enum DiscoveryPlan {
    /// Each device, then `Finished`.
    Devices(Vec<DeviceDescriptor>),
    /// Each device, then `Error`.
    DevicesThenError(Vec<DeviceDescriptor>, String),
    /// Devices, `Finished`, then a late `Found` and a second `Finished`.
    NoisyTerminal(Vec<DeviceDescriptor>),
    /// No events and no terminal at all.
    Silent,
}

pub(crate) mod plan {
    use super::*;

    pub(crate) fn devices(devices: Vec<DeviceDescriptor>) -> DiscoveryPlan {
        DiscoveryPlan::Devices(devices)
    }

    pub(crate) fn devices_then_error(
        devices: Vec<DeviceDescriptor>,
        message: &str,
    ) -> DiscoveryPlan {
        DiscoveryPlan::DevicesThenError(devices, message.to_string())
    }

    pub(crate) fn devices_with_noisy_terminal(devices: Vec<DeviceDescriptor>) -> DiscoveryPlan {
        DiscoveryPlan::NoisyTerminal(devices)
    }

    pub(crate) fn silent() -> DiscoveryPlan {
        DiscoveryPlan::Silent
    }
}

/// A transport provider whose discovery output and connections are
/// scripted by the test.
pub(crate) struct MockProvider {
    plan: Mutex<DiscoveryPlan>,
    connections: Mutex<VecDeque<MockConnection>>,
    discovery_runs: AtomicUsize,
    connect_attempts: AtomicUsize,
    /// Keeps event senders alive for silent plans so the consumer waits
    /// on its deadline instead of seeing a closed channel.
    held_senders: Mutex<Vec<mpsc::UnboundedSender<DiscoveryEvent>>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::with_plan(DiscoveryPlan::Devices(Vec::new()))
    }
}

impl MockProvider {
    pub(crate) fn with_plan(plan: DiscoveryPlan) -> Self {
        Self {
            plan: Mutex::new(plan),
            connections: Mutex::new(VecDeque::new()),
            discovery_runs: AtomicUsize::new(0),
            connect_attempts: AtomicUsize::new(0),
            held_senders: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_plan(&self, plan: DiscoveryPlan) {
        *self.plan.lock().expect("plan lock") = plan;
    }

    pub(crate) fn push_connection(&self, connection: MockConnection) {
        self.connections
            .lock()
            .expect("connections lock")
            .push_back(connection);
    }

    pub(crate) fn discovery_runs(&self) -> usize {
        self.discovery_runs.load(Ordering::SeqCst)
    }

    pub(crate) fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportProvider for MockProvider {
    fn start_discovery(
        &self,
        _request: &DiscoveryRequest,
        events: mpsc::UnboundedSender<DiscoveryEvent>,
    ) -> Result<()> {
        self.discovery_runs.fetch_add(1, Ordering::SeqCst);
        let plan = self.plan.lock().expect("plan lock").clone();
        match plan {
            DiscoveryPlan::Devices(devices) => {
                for device in devices {
                    let _ = events.send(DiscoveryEvent::Found(device));
                }
                let _ = events.send(DiscoveryEvent::Finished);
            }
            DiscoveryPlan::DevicesThenError(devices, message) => {
                for device in devices {
                    let _ = events.send(DiscoveryEvent::Found(device));
                }
                let _ = events.send(DiscoveryEvent::Error(message));
            }
            DiscoveryPlan::NoisyTerminal(devices) => {
                let late = devices.first().cloned();
                for device in devices {
                    let _ = events.send(DiscoveryEvent::Found(device));
                }
                let _ = events.send(DiscoveryEvent::Finished);
                if let Some(device) = late {
                    let _ = events.send(DiscoveryEvent::Found(device));
                }
                let _ = events.send(DiscoveryEvent::Finished);
            }
            DiscoveryPlan::Silent => {
                self.held_senders
                    .lock()
                    .expect("held senders lock")
                    .push(events);
            }
        }
        Ok(())
    }

    async fn connect(&self, target: &DispatchTarget) -> Result<Box<dyn Connection>> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let connection = self
            .connections
            .lock()
            .expect("connections lock")
            .pop_front()
            .ok_or_else(|| {
                EtikettError::NoDevice(format!("no scripted connection for {target}"))
            })?;
        Ok(Box::new(connection))
    }
}

// -- mock permission broker -------------------------------------------------

/// A permission broker whose decisions the test controls.
pub(crate) struct MockBroker {
    granted: Mutex<std::collections::HashSet<String>>,
    decisions: broadcast::Sender<PermissionDecision>,
    auto_decision: Mutex<Option<PermissionDecision>>,
    requests: Mutex<Vec<String>>,
}

impl MockBroker {
    pub(crate) fn new() -> Self {
        let (decisions, _) = broadcast::channel(16);
        Self {
            granted: Mutex::new(std::collections::HashSet::new()),
            decisions,
            auto_decision: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Mark a device as already permitted.
    pub(crate) fn grant(&self, address: &str) {
        self.granted
            .lock()
            .expect("granted lock")
            .insert(address.to_string());
    }

    /// Publish this decision automatically whenever a prompt fires.
    pub(crate) fn auto_respond(&self, decision: PermissionDecision) {
        *self.auto_decision.lock().expect("auto decision lock") = Some(decision);
    }

    /// Inject a decision event, as the OS would.
    pub(crate) fn publish(&self, decision: PermissionDecision) {
        let _ = self.decisions.send(decision);
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl PermissionBroker for MockBroker {
    fn has_permission(&self, device: &UsbPrinter) -> bool {
        self.granted
            .lock()
            .expect("granted lock")
            .contains(&device.address)
    }

    fn request_permission(&self, device: &UsbPrinter) {
        self.requests
            .lock()
            .expect("requests lock")
            .push(device.address.clone());
        if let Some(decision) = self.auto_decision.lock().expect("auto decision lock").clone() {
            let _ = self.decisions.send(decision);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<PermissionDecision> {
        self.decisions.subscribe()
    }
}
