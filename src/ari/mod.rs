pub mod client;
pub mod events;

use crate::config::AriConfig;
use client::AriClient;
use events::AriEvent;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_graceful_shutdown::SubsystemHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Connects the ARI WebSocket event stream and spawns the reconnect-loop
/// subsystem, forwarding parsed events to `events_tx`. Returns the HTTP
/// client immediately; the WebSocket connects in the background.
pub fn start(
    subsys: &SubsystemHandle,
    config: AriConfig,
    events_tx: mpsc::Sender<AriEvent>,
) -> std::io::Result<AriClient> {
    let client = AriClient::new(&config)
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    subsys.start(tokio_graceful_shutdown::SubsystemBuilder::new(
        "ari-events",
        async move |s: &mut SubsystemHandle| {
            let mut backoff = INITIAL_BACKOFF;
            loop {
                let ws_url = match config.websocket_url() {
                    Ok(u) => u,
                    Err(e) => {
                        warn!(error = %e, "invalid ARI URL, giving up on event stream");
                        return Ok::<(), std::convert::Infallible>(());
                    }
                };
                tokio::select! {
                    conn = connect_async(&ws_url) => {
                        match conn {
                            Ok((ws, _)) => {
                                info!("ARI WebSocket connected");
                                backoff = INITIAL_BACKOFF;
                                let (_, mut read) = ws.split();
                                let mut shutting_down = false;
                                loop {
                                    tokio::select! {
                                        msg = read.next() => {
                                            match msg {
                                                Some(Ok(Message::Text(text))) => {
                                                    match serde_json::from_str::<AriEvent>(&text) {
                                                        Ok(event) => { events_tx.send(event).await.ok(); }
                                                        Err(e) => warn!(error = %e, "failed to parse ARI event"),
                                                    }
                                                }
                                                Some(Ok(_)) => {}
                                                Some(Err(e)) => {
                                                    warn!(error = %e, "ARI WebSocket error");
                                                    break;
                                                }
                                                None => break,
                                            }
                                        }
                                        _ = s.on_shutdown_requested() => { shutting_down = true; break; }
                                    }
                                }
                                if shutting_down {
                                    return Ok(());
                                }
                                warn!("ARI WebSocket disconnected, reconnecting");
                            }
                            Err(e) => {
                                warn!(error = %e, delay = ?backoff, "ARI WebSocket connect failed, retrying");
                            }
                        }
                    }
                    _ = s.on_shutdown_requested() => return Ok(()),
                }
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = s.on_shutdown_requested() => return Ok(()),
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        },
    ));

    Ok(client)
}
