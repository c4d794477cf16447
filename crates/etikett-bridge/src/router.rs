// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The method table.
//
// Every method resolves to exactly one response, delivered to the caller
// asynchronously. Engine errors are converted to their stable codes here;
// nothing propagates past this boundary unhandled.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use etikett_core::error::EtikettError;
use etikett_core::types::{DiscoveryMode, DispatchRoute};
use etikett_engine::PrintEngine;

use crate::request::{parse_hops, parse_port, require_str, BridgeRequest};

/// Error envelope delivered across the bridge.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeError {
    pub code: String,
    pub message: String,
}

impl From<EtikettError> for BridgeError {
    fn from(err: EtikettError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Routes named requests to the engine.
pub struct Bridge {
    engine: Arc<PrintEngine>,
}

impl Bridge {
    pub fn new(engine: Arc<PrintEngine>) -> Self {
        Self { engine }
    }

    /// Handle one request to its single result.
    pub async fn handle(&self, request: BridgeRequest) -> Result<Value, BridgeError> {
        debug!(method = %request.method, "bridge request");
        match request.method.as_str() {
            "getPlatformVersion" => Ok(json!(format!(
                "{} {}",
                std::env::consts::OS,
                std::env::consts::ARCH
            ))),

            "get_by_lan" => self.discover(DiscoveryMode::LanQuery).await,
            "discover_by_lan" => self.discover(DiscoveryMode::LocalBroadcast).await,
            "discover_by_broadcast" => self.discover(DiscoveryMode::DirectedBroadcast).await,
            "discover_by_hops" => {
                let hops = parse_hops(&request.args);
                self.discover(DiscoveryMode::Multicast { hops }).await
            }
            "discover_by_usb" => self.discover(DiscoveryMode::UsbEnumeration).await,

            "send_command" => {
                let ip = require_str(&request.args, "ipAddress")?;
                let command = require_str(&request.args, "command")?;
                let port = parse_port(&request.args, self.engine.config().raw_port)?;
                self.engine
                    .send_command(&ip, port, command.as_bytes())
                    .await?;
                info!(ip = %ip, port, "network command dispatched");
                Ok(Value::Null)
            }

            "send_command_usb" => {
                let address = require_str(&request.args, "deviceAddress")?;
                let command = require_str(&request.args, "command")?;
                let route = self
                    .engine
                    .send_command_usb(&address, command.as_bytes())
                    .await?;
                info!(device = %address, ?route, "usb command dispatched");
                Ok(json!(match route {
                    DispatchRoute::Direct => "Command sent successfully",
                    DispatchRoute::Discovery => "Command sent via discovery",
                }))
            }

            unknown => Err(BridgeError {
                code: "NOT_IMPLEMENTED".into(),
                message: format!("unknown method {unknown}"),
            }),
        }
    }

    async fn discover(&self, mode: DiscoveryMode) -> Result<Value, BridgeError> {
        let snapshot = self.engine.discover(mode).await?;
        serde_json::to_value(&snapshot.devices)
            .map_err(|e| BridgeError::from(EtikettError::Serialization(e)))
    }
}
