use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tether_core::{decode_text, OutboundCommand};
use tether_frames::FrameInput;
use tether_session::SessionInput;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Fans inbound envelopes out to the engine that owns their kind.
#[derive(Clone)]
pub struct InboundRouter {
    session: mpsc::Sender<SessionInput>,
    frames: mpsc::Sender<FrameInput>,
}

impl InboundRouter {
    pub fn new(session: mpsc::Sender<SessionInput>, frames: mpsc::Sender<FrameInput>) -> Self {
        Self { session, frames }
    }

    /// Returns false once the session engine has gone away.
    pub async fn route_text(&self, text: &str) -> bool {
        match decode_text(text) {
            Ok(envelope) if envelope.is_browser_stream() => {
                if self.frames.send(FrameInput::Envelope(envelope)).await.is_err() {
                    debug!(event = "hub_frame_dropped", reason = "frame_loop_closed");
                }
                true
            }
            Ok(envelope) => self
                .session
                .send(SessionInput::Envelope(envelope))
                .await
                .is_ok(),
            Err(err) => {
                debug!(event = "hub_envelope_invalid", error = %err);
                match serde_json::from_str::<Value>(text) {
                    // Re-decoded by the machine so it lands in its decode counters.
                    Ok(value) => self.session.send(SessionInput::Raw(value)).await.is_ok(),
                    Err(_) => true,
                }
            }
        }
    }

    pub async fn stream_error(&self, reason: String) -> bool {
        self.session
            .send(SessionInput::StreamError(reason))
            .await
            .is_ok()
    }
}

/// Keeps a websocket to the hub open, reconnecting with doubling backoff.
///
/// Outbound commands queue in `outbound` while disconnected and are written
/// once a connection is up. While connected, returns when every outbound
/// sender is dropped or the session engine stops accepting input.
pub async fn hub_loop(
    url: Url,
    mut outbound: mpsc::Receiver<OutboundCommand>,
    router: InboundRouter,
) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let (mut ws, _) = match connect_async(url.as_str()).await {
            Ok(conn) => conn,
            Err(err) => {
                warn!(
                    event = "hub_connect_failed",
                    url = %url,
                    error = %err,
                    retry_ms = backoff.as_millis() as u64
                );
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }
        };
        backoff = INITIAL_BACKOFF;
        info!(event = "hub_connected", url = %url);

        loop {
            tokio::select! {
                msg = ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if !router.route_text(&text).await {
                                let _ = ws.close(None).await;
                                return;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!(event = "hub_disconnected", url = %url);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(event = "hub_stream_error", error = %err);
                            if !router.stream_error(err.to_string()).await {
                                return;
                            }
                            break;
                        }
                    }
                }
                command = outbound.recv() => {
                    let Some(command) = command else {
                        let _ = ws.close(None).await;
                        return;
                    };
                    let text = match command.to_text() {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(
                                event = "hub_command_encode_failed",
                                kind = command.kind(),
                                error = %err
                            );
                            continue;
                        }
                    };
                    if let Err(err) = ws.send(Message::Text(text)).await {
                        warn!(event = "hub_send_failed", kind = command.kind(), error = %err);
                        break;
                    }
                    debug!(event = "hub_command_sent", kind = command.kind());
                }
            }
        }
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}
