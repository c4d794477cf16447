// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The serialized command dispatcher.
//
// All dispatches for one engine instance run on a single worker task in
// FIFO order, so a printer never sees interleaved command streams. Each
// job gets exactly one outcome: the normal completion path and the
// watchdog race for a single-assignment slot, and whoever loses is
// dropped. Cancellation is cooperative; a timed-out attempt keeps
// running until its next checkpoint, closes whatever connection it
// opened, and its late outcome is discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use etikett_core::config::EngineConfig;
use etikett_core::error::{EtikettError, Result};
use etikett_core::types::{
    DeviceDescriptor, DiscoveryMode, DiscoveryRequest, DispatchRoute, DispatchTarget, UsbPrinter,
};
use etikett_transport::traits::{Connection, TransportProvider};

use crate::discovery::DiscoveryEngine;
use crate::health::ConnectionHealth;
use crate::permission::{PermissionOutcome, UsbPermissionCoordinator};

/// Single-assignment holder for a dispatch outcome.
///
/// `resolve` takes the sender under the lock, so exactly one caller wins
/// no matter how the completion and watchdog paths race.
#[derive(Clone)]
pub(crate) struct OutcomeSlot {
    sender: Arc<Mutex<Option<oneshot::Sender<Result<DispatchRoute>>>>>,
}

impl OutcomeSlot {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Result<DispatchRoute>>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Arc::new(Mutex::new(Some(sender))),
            },
            receiver,
        )
    }

    /// Deliver the outcome unless one was already delivered. Returns
    /// whether this call won the slot.
    pub(crate) fn resolve(&self, outcome: Result<DispatchRoute>) -> bool {
        let sender = self
            .sender
            .lock()
            .expect("outcome slot lock poisoned")
            .take();
        match sender {
            Some(sender) => {
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }
}

struct DispatchJob {
    target: DispatchTarget,
    command: Vec<u8>,
    slot: OutcomeSlot,
}

/// FIFO dispatch pipeline for one engine instance.
pub struct CommandDispatcher {
    queue: mpsc::UnboundedSender<DispatchJob>,
}

impl CommandDispatcher {
    /// Spawn the worker task. Must run inside a tokio runtime.
    pub fn new(
        config: EngineConfig,
        health: Arc<ConnectionHealth>,
        network: Arc<dyn TransportProvider>,
        usb: Arc<dyn TransportProvider>,
        discovery: Arc<DiscoveryEngine>,
        permissions: Arc<UsbPermissionCoordinator>,
    ) -> Self {
        let (queue, mut jobs) = mpsc::unbounded_channel::<DispatchJob>();
        let ctx = Arc::new(WorkerContext {
            config,
            health,
            network,
            usb,
            discovery,
            permissions,
        });
        tokio::spawn(async move {
            // The serialization point: one job at a time, submission order.
            while let Some(job) = jobs.recv().await {
                run_job(Arc::clone(&ctx), job).await;
            }
            debug!("dispatch worker stopped");
        });
        Self { queue }
    }

    /// Queue one command and await its single outcome.
    pub async fn dispatch(
        &self,
        target: DispatchTarget,
        command: Vec<u8>,
    ) -> Result<DispatchRoute> {
        if command.is_empty() {
            return Err(EtikettError::InvalidArgument(
                "command must not be empty".into(),
            ));
        }
        let (slot, receiver) = OutcomeSlot::new();
        self.queue
            .send(DispatchJob {
                target,
                command,
                slot,
            })
            .map_err(|_| EtikettError::Unexpected("dispatch worker is gone".into()))?;
        receiver
            .await
            .map_err(|_| EtikettError::Unexpected("dispatch outcome dropped".into()))?
    }
}

struct WorkerContext {
    config: EngineConfig,
    health: Arc<ConnectionHealth>,
    network: Arc<dyn TransportProvider>,
    usb: Arc<dyn TransportProvider>,
    discovery: Arc<DiscoveryEngine>,
    permissions: Arc<UsbPermissionCoordinator>,
}

/// Run one job to its outcome or its deadline, whichever comes first.
/// The next job may not start until then.
async fn run_job(ctx: Arc<WorkerContext>, job: DispatchJob) {
    let DispatchJob {
        target,
        command,
        slot,
    } = job;
    let deadline = ctx.config.dispatch_timeout;
    let cancelled = Arc::new(AtomicBool::new(false));
    info!(printer = %target, len = command.len(), "dispatch started");

    let attempt = {
        let ctx = Arc::clone(&ctx);
        let slot = slot.clone();
        let cancelled = Arc::clone(&cancelled);
        tokio::spawn(async move {
            let outcome = ctx.attempt(&target, &command, &cancelled).await;
            if !slot.resolve(outcome) {
                debug!("late dispatch outcome dropped after cancellation");
            }
        })
    };

    match tokio::time::timeout(deadline, attempt).await {
        Ok(joined) => {
            if let Err(e) = joined {
                ctx.health.mark_dirty();
                slot.resolve(Err(EtikettError::Unexpected(format!(
                    "dispatch task failed: {e}"
                ))));
            }
        }
        Err(_) => {
            // Watchdog. The in-flight attempt is not aborted; it observes
            // the flag at its next checkpoint and still closes any
            // connection it opened.
            cancelled.store(true, Ordering::SeqCst);
            ctx.health.mark_dirty();
            if slot.resolve(Err(EtikettError::Timeout(format!(
                "dispatch timed out after {}ms",
                deadline.as_millis()
            )))) {
                warn!(
                    timeout_ms = deadline.as_millis() as u64,
                    "dispatch watchdog fired"
                );
            }
        }
    }
}

impl WorkerContext {
    async fn attempt(
        &self,
        target: &DispatchTarget,
        command: &[u8],
        cancelled: &AtomicBool,
    ) -> Result<DispatchRoute> {
        match target {
            DispatchTarget::Network { .. } => {
                let conn = self
                    .network
                    .connect(target)
                    .await
                    .map_err(|e| EtikettError::FailedToOpenConnection(e.to_string()))?;
                self.drive(conn, command, cancelled, None).await?;
                Ok(DispatchRoute::Direct)
            }
            DispatchTarget::Usb { address } => self.attempt_usb(address, command, cancelled).await,
        }
    }

    /// USB strategy: direct connect by identity first, then a bounded
    /// re-discovery restricted to the target. Either way the caller sees
    /// one outcome through the same slot.
    async fn attempt_usb(
        &self,
        address: &str,
        command: &[u8],
        cancelled: &AtomicBool,
    ) -> Result<DispatchRoute> {
        // The current bus snapshot stands in for the OS device list.
        let live = match self
            .discovery
            .run_with_deadline(
                DiscoveryRequest::new(DiscoveryMode::UsbEnumeration),
                self.config.usb_fallback_timeout,
            )
            .await
        {
            Ok(snapshot) => find_usb_match(snapshot.devices, address),
            Err(e) => {
                debug!(error = %e, "usb device list unavailable; trying discovery fallback");
                None
            }
        };

        if let Some(printer) = &live {
            match self.permissions.ensure_permission(printer).await? {
                PermissionOutcome::Granted(_) => {}
                PermissionOutcome::Denied => {
                    return Err(EtikettError::PermissionDenied(address.to_string()));
                }
            }
            match self.connect_usb(&printer.address).await {
                Ok(conn) => {
                    match self
                        .drive(
                            conn,
                            command,
                            cancelled,
                            Some(self.config.usb_write_settle),
                        )
                        .await
                    {
                        Ok(()) => return Ok(DispatchRoute::Direct),
                        Err(e) => {
                            debug!(error = %e, "direct usb dispatch failed; falling back to discovery");
                        }
                    }
                }
                Err(e) => {
                    debug!(error = %e, "direct usb connect failed; falling back to discovery");
                }
            }
            if cancelled.load(Ordering::SeqCst) {
                return Err(EtikettError::Timeout("dispatch cancelled".into()));
            }
        }

        let snapshot = self
            .discovery
            .run_with_deadline(
                DiscoveryRequest::new(DiscoveryMode::UsbEnumeration),
                self.config.usb_fallback_timeout,
            )
            .await?;
        let Some(printer) = find_usb_match(snapshot.devices, address) else {
            return Err(EtikettError::PrinterNotFound(address.to_string()));
        };
        let conn = self
            .connect_usb(&printer.address)
            .await
            .map_err(|e| EtikettError::FailedToOpenConnection(e.to_string()))?;
        self.drive(
            conn,
            command,
            cancelled,
            Some(self.config.usb_write_settle),
        )
        .await?;
        Ok(DispatchRoute::Discovery)
    }

    async fn connect_usb(&self, address: &str) -> Result<Box<dyn Connection>> {
        self.usb
            .connect(&DispatchTarget::Usb {
                address: address.to_string(),
            })
            .await
    }

    /// The pipeline proper: open, clear when the previous session ended
    /// unclean, write, always close. Close failures never become the
    /// outcome.
    async fn drive(
        &self,
        mut conn: Box<dyn Connection>,
        command: &[u8],
        cancelled: &AtomicBool,
        write_settle: Option<Duration>,
    ) -> Result<()> {
        if let Err(e) = conn.open().await {
            self.health.mark_dirty();
            conn.close().await;
            return Err(EtikettError::FailedToOpenConnection(e.to_string()));
        }
        if cancelled.load(Ordering::SeqCst) {
            conn.close().await;
            return Err(EtikettError::Timeout("dispatch cancelled".into()));
        }

        if self.health.needs_clear() {
            if let Err(e) = conn.write(&self.config.clear_sequence).await {
                self.health.mark_dirty();
                conn.close().await;
                return Err(EtikettError::FailedToClearBuffer(e.to_string()));
            }
            // Give the printer a moment to flush before the job arrives.
            tokio::time::sleep(self.config.clear_settle).await;
            self.health.mark_clean();
            debug!("printer buffer cleared");
        }
        if cancelled.load(Ordering::SeqCst) {
            conn.close().await;
            return Err(EtikettError::Timeout("dispatch cancelled".into()));
        }

        if let Err(e) = conn.write(command).await {
            self.health.mark_dirty();
            conn.close().await;
            return Err(EtikettError::FailedToSendCommand(e.to_string()));
        }
        if let Some(settle) = write_settle {
            tokio::time::sleep(settle).await;
        }

        conn.close().await;
        Ok(())
    }
}

fn find_usb_match(devices: Vec<DeviceDescriptor>, target: &str) -> Option<UsbPrinter> {
    devices.into_iter().find_map(|d| match d {
        DeviceDescriptor::Usb(p) if p.matches(target) => Some(p),
        _ => None,
    })
}
