// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// etikett-bridged — JSON-lines harness around the bridge.
//
// One request per stdin line, one response per stdout line, each tagged
// with the request's id. This is the headless stand-in for a
// method-channel host: remote runtimes pipe requests through it during
// development and integration testing.

use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use etikett_bridge::{Bridge, BridgeRequest};
use etikett_core::config::EngineConfig;
use etikett_engine::PrintEngine;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("etikett bridge starting");

    let engine = Arc::new(PrintEngine::new(EngineConfig::default()));
    let bridge = Bridge::new(engine);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<BridgeRequest>(line) {
            Ok(request) => {
                let id = request.id.clone();
                match bridge.handle(request).await {
                    Ok(value) => json!({"id": id, "ok": value}),
                    Err(error) => json!({"id": id, "error": error}),
                }
            }
            Err(e) => json!({
                "id": null,
                "error": {
                    "code": "INVALID_ARGUMENT",
                    "message": format!("malformed request: {e}"),
                }
            }),
        };

        let mut out = response.to_string();
        out.push('\n');
        if stdout.write_all(out.as_bytes()).await.is_err() {
            break;
        }
        let _ = stdout.flush().await;
    }

    tracing::info!("etikett bridge stopped");
}
