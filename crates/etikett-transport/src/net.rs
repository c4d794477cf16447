// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Network transport: mDNS LAN query, UDP probe discovery, and raw TCP
// connections (JetDirect, port 9100).
//
// Discovery comes in two flavours. The LAN query browses for
// `_pdl-datastream._tcp.local.` (the raw-port printing service) via the
// `mdns-sd` daemon and snapshots whatever resolves inside the query
// window. The broadcast/multicast modes send a single probe datagram and
// collect replies until the response window closes; each reply carries
// `dnsName<TAB>port` and the printer's address is the datagram source.

use std::net::{IpAddr, Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use etikett_core::config::EngineConfig;
use etikett_core::error::{EtikettError, Result};
use etikett_core::types::{
    DeviceDescriptor, DiscoveryMode, DiscoveryRequest, DispatchTarget, NetworkPrinter,
};

use crate::traits::{Connection, DiscoveryEvent, TransportProvider};

/// mDNS service type advertised by raw-port print servers.
const PDL_SERVICE: &str = "_pdl-datastream._tcp.local.";

/// Multicast group probed by hop-bounded discovery.
const DISCOVERY_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 42, 1);

/// Probe datagram answered by listening print servers.
const DISCOVERY_PROBE: &[u8] = b"DISCOVER.LABEL.PRINTERS;";

/// Upper bound on a probe reply.
const MAX_REPLY_BYTES: usize = 512;

/// The network transport provider.
///
/// Directed probes default to the limited broadcast address; routed
/// segments substitute the subnet's directed address.
pub struct NetworkTransport {
    config: EngineConfig,
}

impl NetworkTransport {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportProvider for NetworkTransport {
    fn start_discovery(
        &self,
        request: &DiscoveryRequest,
        events: mpsc::UnboundedSender<DiscoveryEvent>,
    ) -> Result<()> {
        let port = self.config.discovery_port;
        let window = self.config.broadcast_window;
        match request.mode {
            DiscoveryMode::LanQuery => {
                start_lan_query(request.id, self.config.lan_query_window, events)
            }
            DiscoveryMode::LocalBroadcast | DiscoveryMode::DirectedBroadcast => {
                let dest = SocketAddrV4::new(Ipv4Addr::BROADCAST, port);
                let id = request.id;
                tokio::spawn(run_udp_probe(id, dest, None, window, events));
                Ok(())
            }
            DiscoveryMode::Multicast { hops } => {
                let dest = SocketAddrV4::new(DISCOVERY_MULTICAST_GROUP, port);
                let id = request.id;
                tokio::spawn(run_udp_probe(id, dest, Some(hops), window, events));
                Ok(())
            }
            DiscoveryMode::UsbEnumeration => Err(EtikettError::Unexpected(
                "usb-enumeration routed to the network provider".into(),
            )),
        }
    }

    async fn connect(&self, target: &DispatchTarget) -> Result<Box<dyn Connection>> {
        match target {
            DispatchTarget::Network { ip, port } => Ok(Box::new(TcpConnection::new(
                ip,
                *port,
                self.config.connect_timeout,
            ))),
            DispatchTarget::Usb { address } => Err(EtikettError::Unexpected(format!(
                "usb target {address} routed to the network provider"
            ))),
        }
    }
}

// -- mDNS LAN query ---------------------------------------------------------

/// Browse for raw-port print services until the window elapses, then emit
/// the terminal `Finished`.
///
/// The `mdns-sd` receiver is drained on a dedicated listener thread; the
/// daemon delivers events from its own internals and nothing here may
/// touch engine state directly.
fn start_lan_query(
    request_id: Uuid,
    window: Duration,
    events: mpsc::UnboundedSender<DiscoveryEvent>,
) -> Result<()> {
    let daemon = ServiceDaemon::new()
        .map_err(|e| EtikettError::Discovery(format!("failed to start mDNS daemon: {e}")))?;
    let receiver = daemon
        .browse(PDL_SERVICE)
        .map_err(|e| EtikettError::Discovery(format!("browse {PDL_SERVICE}: {e}")))?;

    std::thread::Builder::new()
        .name("etikett-mdns".into())
        .spawn(move || {
            let deadline = Instant::now() + window;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match receiver.recv_timeout(remaining) {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        match service_to_printer(&info) {
                            Ok(printer) => {
                                info!(
                                    request = %request_id,
                                    address = %printer.address,
                                    name = %printer.dns_name,
                                    "printer resolved via mDNS"
                                );
                                let _ = events
                                    .send(DiscoveryEvent::Found(DeviceDescriptor::Network(printer)));
                            }
                            Err(e) => {
                                warn!(
                                    request = %request_id,
                                    error = %e,
                                    "failed to convert resolved service to printer"
                                );
                            }
                        }
                    }
                    Ok(ServiceEvent::SearchStopped(_)) => break,
                    Ok(_) => {}
                    // Window elapsed or the daemon channel closed.
                    Err(_) => break,
                }
            }
            if let Err(e) = daemon.shutdown() {
                debug!(request = %request_id, error = %e, "mDNS daemon shutdown");
            }
            let _ = events.send(DiscoveryEvent::Finished);
        })
        .map_err(|e| EtikettError::Unexpected(format!("failed to spawn mDNS listener: {e}")))?;

    Ok(())
}

/// Convert a resolved mDNS service into a `NetworkPrinter`.
///
/// Prefers an IPv4 address for wider printer compatibility.
fn service_to_printer(info: &ServiceInfo) -> Result<NetworkPrinter> {
    let ip: IpAddr = info
        .get_addresses()
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| info.get_addresses().iter().next())
        .copied()
        .ok_or_else(|| {
            EtikettError::Discovery(format!("no address for service {}", info.get_fullname()))
        })?;

    let hostname = info.get_hostname().trim_end_matches('.');
    let dns_name = if hostname.is_empty() {
        "Unknown".to_string()
    } else {
        hostname.to_string()
    };

    Ok(NetworkPrinter {
        address: ip.to_string(),
        dns_name,
        port: Some(info.get_port()),
    })
}

// -- UDP probe discovery ----------------------------------------------------

/// Send one probe datagram and collect replies until the window closes.
///
/// Every reply datagram is one printer. Malformed replies are skipped with
/// a warning; they never abort the pass.
async fn run_udp_probe(
    request_id: Uuid,
    dest: SocketAddrV4,
    hops: Option<u32>,
    window: Duration,
    events: mpsc::UnboundedSender<DiscoveryEvent>,
) {
    match collect_udp_replies(request_id, dest, hops, window, &events).await {
        Ok(()) => {
            let _ = events.send(DiscoveryEvent::Finished);
        }
        Err(e) => {
            let _ = events.send(DiscoveryEvent::Error(e.to_string()));
        }
    }
}

async fn collect_udp_replies(
    request_id: Uuid,
    dest: SocketAddrV4,
    hops: Option<u32>,
    window: Duration,
    events: &mpsc::UnboundedSender<DiscoveryEvent>,
) -> Result<()> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    match hops {
        Some(hops) => socket.set_multicast_ttl_v4(hops)?,
        None => socket.set_broadcast(true)?,
    }
    socket.send_to(DISCOVERY_PROBE, dest).await?;
    debug!(request = %request_id, %dest, ?hops, "discovery probe sent");

    let mut buf = [0u8; MAX_REPLY_BYTES];
    let deadline = Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            // Window elapsed.
            Err(_) => break,
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok((len, from))) => match parse_probe_reply(&buf[..len]) {
                Some((dns_name, port)) => {
                    info!(request = %request_id, address = %from.ip(), name = %dns_name, "printer replied to probe");
                    let _ = events.send(DiscoveryEvent::Found(DeviceDescriptor::Network(
                        NetworkPrinter {
                            address: from.ip().to_string(),
                            dns_name,
                            port,
                        },
                    )));
                }
                None => {
                    warn!(request = %request_id, from = %from, "ignoring malformed discovery reply");
                }
            },
        }
    }
    Ok(())
}

/// Parse a probe reply payload: `dnsName<TAB>port`, both parts optional.
///
/// Returns `None` for payloads that cannot name a printer at all
/// (non-UTF-8 or blank). An unparsable port degrades to `None` rather
/// than discarding the reply.
fn parse_probe_reply(payload: &[u8]) -> Option<(String, Option<u16>)> {
    let text = std::str::from_utf8(payload)
        .ok()?
        .trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if text.is_empty() {
        return None;
    }
    let mut parts = text.splitn(2, '\t');
    let name = parts.next().unwrap_or("").trim();
    let port = parts.next().and_then(|p| p.trim().parse::<u16>().ok());
    let dns_name = if name.is_empty() {
        "Unknown".to_string()
    } else {
        name.to_string()
    };
    Some((dns_name, port))
}

// -- Raw TCP connection -----------------------------------------------------

/// A raw TCP connection to a printer (JetDirect style).
///
/// The simplest possible print transport: open a socket and dump bytes.
/// The printer must interpret the payload natively; there is no protocol
/// negotiation and no feedback channel.
pub struct TcpConnection {
    addr: String,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpConnection {
    pub fn new(ip: &str, port: u16, connect_timeout: Duration) -> Self {
        Self {
            addr: format!("{ip}:{port}"),
            connect_timeout,
            stream: None,
        }
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| {
                EtikettError::Timeout(format!(
                    "connect to {} timed out after {}ms",
                    self.addr,
                    self.connect_timeout.as_millis()
                ))
            })??;
        debug!(addr = %self.addr, "raw TCP connection opened");
        self.stream = Some(stream);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| EtikettError::Unexpected("write on a closed connection".into()))?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        debug!(addr = %self.addr, len = bytes.len(), "raw TCP write complete");
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(addr = %self.addr, error = %e, "raw TCP shutdown failed (ignored)");
            }
        }
    }
}
