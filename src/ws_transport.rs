// =============================================================================
// WS Transport — one framed streaming connection per logical channel
// =============================================================================
//
// Generalizes the per-stream `connect_async` + read-loop shape used by a
// typical trade/depth stream runner into a single reusable driver shared by
// market, user-data, and trading connections for every adapter. Does not
// resubscribe on its own — that is the Supervisor's job.
// =============================================================================

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::CoreError;

#[derive(Debug)]
pub enum WsState {
    Open,
    Closed { reason: String },
    Fail { error: String },
}

/// Default idle interval after which we emit our own ping if the server has
/// been silent (seconds).
const IDLE_PING_INTERVAL: Duration = Duration::from_secs(20);

/// Run one WebSocket connection to `url` until it closes or fails.
///
/// Every text frame is forwarded to `on_message`. Server pings are answered
/// automatically; if the peer stays silent longer than [`IDLE_PING_INTERVAL`]
/// a client ping is sent. `outbound` lets callers (trading/order streams)
/// push frames out over the same socket; pass a receiver that never yields
/// if the channel is read-only.
///
/// Connects directly; does not tunnel through an HTTP proxy. An account's
/// `proxy` field only applies to its REST client (see `rest_client.rs`) until
/// this takes a pre-built proxy-aware connector.
pub async fn run_connection<F>(
    url: &str,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut on_message: F,
) -> WsState
where
    F: FnMut(&str),
{
    info!(url = %url, "opening websocket connection");

    let (ws_stream, _response) = match tokio_tungstenite::connect_async(url).await {
        Ok(pair) => pair,
        Err(e) => {
            warn!(url = %url, error = %e, "websocket connect failed");
            return WsState::Fail { error: e.to_string() };
        }
    };

    info!(url = %url, "websocket connected");
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        on_message(&text);
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = write.send(Message::Pong(payload)).await {
                            warn!(error = %e, "failed to reply to ping");
                            return WsState::Fail { error: e.to_string() };
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                        return WsState::Closed { reason };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(url = %url, error = %e, "websocket read error");
                        return WsState::Fail { error: e.to_string() };
                    }
                    None => {
                        return WsState::Closed { reason: "stream ended".to_string() };
                    }
                }
            }
            frame = outbound.recv() => {
                match frame {
                    Some(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            warn!(error = %e, "failed to send outbound frame");
                            return WsState::Fail { error: e.to_string() };
                        }
                    }
                    None => {
                        // sender dropped; keep reading, nothing more to send
                    }
                }
            }
            _ = tokio::time::sleep(IDLE_PING_INTERVAL) => {
                debug!(url = %url, "idle interval elapsed, sending client ping");
                if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                    warn!(error = %e, "failed to send idle ping");
                    return WsState::Fail { error: e.to_string() };
                }
            }
        }
    }
}

/// Build a subscribe/unsubscribe control frame in the shape venues expect:
/// `{"method": "SUBSCRIBE"|"UNSUBSCRIBE", "params": [...], "id": n}`.
pub fn subscribe_frame(method: &str, params: &[String], id: u64) -> Result<String, CoreError> {
    let frame = serde_json::json!({
        "method": method,
        "params": params,
        "id": id,
    });
    serde_json::to_string(&frame).map_err(CoreError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_frame_has_expected_shape() {
        let frame = subscribe_frame("SUBSCRIBE", &["btcusdt@aggTrade".to_string()], 1).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["method"], "SUBSCRIBE");
        assert_eq!(parsed["id"], 1);
        assert_eq!(parsed["params"][0], "btcusdt@aggTrade");
    }
}
