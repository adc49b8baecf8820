use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use sshdeck::config::{AppConfig, FallbackMode, FileSessionStore};
use sshdeck::ipc::{self, EventEncoder, Reply, Request};
use sshdeck::relay::EventRelay;
use sshdeck::ssh::{RegistryOptions, SessionRegistry, SshConnector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with file output.
    let log_dir = sshdeck::config::paths::ensure_log_dir().ok();
    let _guard = sshdeck::logging::init_logging(log_dir);

    tracing::info!("Starting sshdeck {}", env!("CARGO_PKG_VERSION"));
    if let Some(dir) = sshdeck::config::paths::log_dir() {
        tracing::info!("Logging to {}", dir.display());
    }

    let config = AppConfig::load().context("loading settings")?;
    let relay = Arc::new(EventRelay::new(config.events.fallback));

    let mut registry = SessionRegistry::new(
        SshConnector::new(&config.ssh),
        RegistryOptions::from_config(&config),
        relay.clone(),
    );
    match FileSessionStore::open_default() {
        Ok(store) => registry = registry.with_store(Arc::new(store)),
        Err(e) => tracing::warn!("Session store unavailable, status will not persist: {}", e),
    }
    let registry = Arc::new(registry);

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<Value>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = line_rx.recv().await {
            let mut bytes = line.to_string().into_bytes();
            bytes.push(b'\n');
            if stdout.write_all(&bytes).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    // Session events and orphaned events share one sink
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut fallback_rx = match config.events.fallback {
        FallbackMode::DefaultSubscriber => Some(relay.set_default_subscriber()),
        FallbackMode::Drop => None,
    };
    let event_lines = line_tx.clone();
    tokio::spawn(async move {
        let mut encoder = EventEncoder::new();
        loop {
            let event = match fallback_rx.as_mut() {
                Some(fallback) => tokio::select! {
                    event = event_rx.recv() => event,
                    event = fallback.recv() => event,
                },
                None => event_rx.recv().await,
            };
            let Some(event) = event else { break };
            if event_lines.send(encoder.encode(&event)).is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Malformed request: {}", e);
                let _ = line_tx.send(Reply::malformed(&e.to_string()).to_line());
                continue;
            }
        };

        let registry = registry.clone();
        let events = event_tx.clone();
        let replies = line_tx.clone();
        tokio::spawn(async move {
            let reply = ipc::handle(&registry, &events, request).await;
            let _ = replies.send(reply.to_line());
        });
    }

    tracing::info!("Input closed, shutting down");
    registry.shutdown().await;

    drop(event_tx);
    drop(line_tx);
    // Pending request tasks hold their own senders; don't wait on them
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), writer).await;
    Ok(())
}
