// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Request shape and argument parsing.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use etikett_core::error::{EtikettError, Result};

/// One named request from the remote caller.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeRequest {
    /// Opaque correlation id, echoed back in the response envelope.
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// A required string argument. Missing or wrongly typed fails fast.
pub(crate) fn require_str(args: &Map<String, Value>, key: &str) -> Result<String> {
    match args.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(EtikettError::InvalidArgument(format!(
            "{key} must not be empty"
        ))),
        Some(_) => Err(EtikettError::InvalidArgument(format!(
            "{key} must be a string"
        ))),
        None => Err(EtikettError::InvalidArgument(format!("{key} is required"))),
    }
}

/// The target port: defaults when absent, rejected when malformed.
pub(crate) fn parse_port(args: &Map<String, Value>, default: u16) -> Result<u16> {
    match args.get("port") {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => {
            let value = n
                .as_i64()
                .ok_or_else(|| EtikettError::InvalidArgument("port must be an integer".into()))?;
            u16::try_from(value)
                .map_err(|_| EtikettError::InvalidArgument(format!("port {value} out of range")))
        }
        Some(_) => Err(EtikettError::InvalidArgument("port must be an integer".into())),
    }
}

/// The multicast hop count. Absent or invalid values default to 1; this
/// mirrors the permissive legacy behavior rather than rejecting with
/// `InvalidArgument` (see DESIGN.md).
pub(crate) fn parse_hops(args: &Map<String, Value>) -> u32 {
    match args.get("hops").and_then(Value::as_i64) {
        Some(hops) if (1..=i64::from(u32::MAX)).contains(&hops) => hops as u32,
        other => {
            warn!(value = ?other, "hop count absent or invalid; defaulting to 1");
            1
        }
    }
}
