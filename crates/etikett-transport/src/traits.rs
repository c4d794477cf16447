// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The transport provider contract.
//
// A provider knows two things: how to find devices on its medium and how
// to open a byte-stream connection to one of them. Discovery results may
// be produced on provider-internal threads or tasks; they are always
// funneled through a channel so the consumer drains them from its own
// serialization point and never runs on a transport callback thread.

use async_trait::async_trait;
use tokio::sync::mpsc;

use etikett_core::error::Result;
use etikett_core::types::{DeviceDescriptor, DiscoveryRequest, DispatchTarget};

/// A single event emitted by a running discovery pass.
///
/// A well-behaved provider emits any number of `Found` events followed by
/// exactly one terminal `Finished` or `Error`. Consumers must tolerate a
/// duplicate terminal event anyway; the engine treats the first one as
/// authoritative and drops the rest.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    Found(DeviceDescriptor),
    Finished,
    Error(String),
}

/// A byte-stream connection to one printer.
///
/// All methods may block their task on OS-level I/O; callers run them on
/// worker tasks, never on a latency-sensitive path. `close` swallows
/// transport errors by contract: a close failure is logged by the
/// implementation and never becomes a dispatch outcome.
#[async_trait]
pub trait Connection: Send {
    async fn open(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    async fn close(&mut self);
}

/// One transport family (network or USB).
#[async_trait]
pub trait TransportProvider: Send + Sync {
    /// Start the discovery procedure for `request` and return immediately.
    ///
    /// Events are delivered on `events`, possibly from provider-internal
    /// threads. Returns an error only when the procedure cannot be
    /// started at all; failures after start arrive as
    /// `DiscoveryEvent::Error`.
    fn start_discovery(
        &self,
        request: &DiscoveryRequest,
        events: mpsc::UnboundedSender<DiscoveryEvent>,
    ) -> Result<()>;

    /// Produce an unopened connection to the target.
    ///
    /// Resolution failures (unknown address, no such device) surface here;
    /// I/O failures surface from `Connection::open` onwards.
    async fn connect(&self, target: &DispatchTarget) -> Result<Box<dyn Connection>>;
}
