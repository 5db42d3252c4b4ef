//! Glance native messaging host.
//!
//! Speaks length-prefixed JSON over stdio with the browser extension:
//! request envelopes are dispatched to the orchestrator, streaming
//! broadcasts are forwarded as unsolicited envelopes, and bridge responses
//! are routed back to their waiters. Logs go to stderr; stdout is the
//! protocol channel.

mod bridge;
mod framing;

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use glance_core::adapters::twitter::TwitterAdapter;
use glance_core::{Config, ModelGateway, Orchestrator, Request, SettingsStore};

use bridge::{BridgeCaptionSource, BridgeThreadCapture, ExtensionBridge};

const DEFAULT_PROMPT_URL: &str = "http://127.0.0.1:11434/v1";
const DEFAULT_PROMPT_MODEL: &str = "llama3.2";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load_or_default();
    config.ensure_dirs()?;
    let settings = Arc::new(SettingsStore::load(&config.settings_file));

    let prompt_url =
        std::env::var("GLANCE_PROMPT_URL").unwrap_or_else(|_| DEFAULT_PROMPT_URL.to_string());
    let prompt_model =
        std::env::var("GLANCE_PROMPT_MODEL").unwrap_or_else(|_| DEFAULT_PROMPT_MODEL.to_string());
    let gateway = Arc::new(ModelGateway::with_local_defaults(&prompt_url, &prompt_model));
    info!(capabilities = ?gateway.detect_capabilities(), "Model gateway ready");

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Value>(64);
    let extension = ExtensionBridge::new(outbound_tx.clone());
    let captions = Arc::new(BridgeCaptionSource(Arc::clone(&extension)));
    let twitter = TwitterAdapter::new(Arc::new(BridgeThreadCapture(Arc::clone(&extension))), None);

    let orchestrator = Arc::new(Orchestrator::new(settings, gateway, captions, twitter));

    // Single owner of stdout.
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = outbound_rx.recv().await {
            match serde_json::to_vec(&message) {
                Ok(bytes) => {
                    if let Err(e) = framing::write_frame(&mut stdout, &bytes).await {
                        error!(error = %e, "Failed to write frame, stopping writer");
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "Unserializable outbound message"),
            }
        }
    });

    // Forward streaming/status broadcasts to the extension.
    {
        let mut events = orchestrator.subscribe_events();
        let outbound = outbound_tx.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match serde_json::to_value(&event) {
                        Ok(value) => {
                            if outbound.send(value).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Unserializable broadcast event"),
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Broadcast receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    let mut stdin = tokio::io::stdin();
    while let Some(frame) = framing::read_frame(&mut stdin).await? {
        let value: Value = match serde_json::from_slice(&frame) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Dropping unparseable frame");
                let _ = outbound_tx
                    .send(json!({ "type": "ERROR", "error": e.to_string() }))
                    .await;
                continue;
            }
        };

        if value.get("type").and_then(Value::as_str) == Some("BRIDGE_RESPONSE") {
            if let Some(id) = value.get("id").and_then(Value::as_u64) {
                extension.resolve(id, value);
            }
            continue;
        }

        let request_id = value.get("id").cloned();
        match serde_json::from_value::<Request>(value) {
            Ok(request) => {
                let orchestrator = Arc::clone(&orchestrator);
                let outbound = outbound_tx.clone();
                tokio::spawn(async move {
                    let response = orchestrator.handle(request).await;
                    let envelope = json!({
                        "type": "RESPONSE",
                        "id": request_id,
                        "payload": response,
                    });
                    let _ = outbound.send(envelope).await;
                });
            }
            Err(e) => {
                warn!(error = %e, "Unrecognized request envelope");
                let _ = outbound_tx
                    .send(json!({ "type": "ERROR", "id": request_id, "error": e.to_string() }))
                    .await;
            }
        }
    }

    info!("stdin closed, shutting down");
    Ok(())
}
