// =============================================================================
// Market Channel — fan-out of MarketFrame publications, drop-oldest backpressure
// =============================================================================
//
// `tokio::sync::broadcast` already implements exactly the semantics the
// design calls for: a slow subscriber that falls behind the channel capacity
// has its oldest unread frames silently dropped (`RecvError::Lagged`) rather
// than blocking the publisher. That maps directly onto "enqueued to a
// bounded ring per subscriber and dropped-oldest on overflow."
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::market_frame::MarketFrame;
use crate::types::Venue;

const DEFAULT_CAPACITY: usize = 4096;

/// `topic` encodes `(venue, stream, symbol)` so a subscriber can filter by a
/// string prefix without deserializing the payload.
pub fn topic_for(venue: Venue, frame: &MarketFrame) -> String {
    format!("{venue}.{}.{}", frame.stream_key(), frame.symbol())
}

pub struct MarketChannel {
    tx: broadcast::Sender<String>,
}

impl MarketChannel {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, venue: Venue, frame: &MarketFrame) -> Result<(), CoreError> {
        let topic = topic_for(venue, frame);
        let payload = serde_json::to_string(frame)?;
        // No subscribers is not an error — the channel has no memory of
        // frames published before a subscriber connects.
        let _ = self.tx.send(format!("{topic}|{payload}"));
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Accept connections on `listener` forever; each connection sends a
    /// single line of comma-separated topic prefixes (or `*` for all) and
    /// then receives matching lines until it disconnects.
    pub async fn serve(self: Arc<Self>, listener: UnixListener, path: PathBuf) {
        info!(path = %path.display(), "market channel listening");
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let channel = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = channel.handle_subscriber(stream).await {
                            debug!(error = %e, "market channel subscriber disconnected");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "market channel accept failed");
                }
            }
        }
    }

    async fn handle_subscriber(&self, stream: UnixStream) -> std::io::Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut prefix_line = String::new();
        reader.read_line(&mut prefix_line).await?;
        let prefixes: Vec<String> = prefix_line.trim().split(',').map(String::from).collect();

        let mut rx = self.subscribe();
        loop {
            match rx.recv().await {
                Ok(line) => {
                    let topic = line.split('|').next().unwrap_or("");
                    let matches = prefixes.iter().any(|p| p == "*" || topic.starts_with(p.as_str()));
                    if matches {
                        write_half.write_all(line.as_bytes()).await?;
                        write_half.write_all(b"\n").await?;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "market channel subscriber lagged, frames dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }
}

impl Default for MarketChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_frame::{Trade, TradeSide};

    fn trade_frame() -> MarketFrame {
        MarketFrame::Trade(Trade {
            symbol: "BTCUSDT".into(),
            trade_id: 1,
            ts: 0,
            price: 100.0,
            qty: 1.0,
            side: TradeSide::Buy,
        })
    }

    #[test]
    fn topic_encodes_venue_stream_symbol() {
        let topic = topic_for(Venue::Binance, &trade_frame());
        assert_eq!(topic, "binance.trade.BTCUSDT");
    }

    #[tokio::test]
    async fn subscriber_receives_published_frame() {
        let channel = MarketChannel::with_capacity(8);
        let mut rx = channel.subscribe();
        channel.publish(Venue::Okx, &trade_frame()).unwrap();
        let line = rx.recv().await.unwrap();
        assert!(line.starts_with("okx.trade.BTCUSDT|"));
    }

    #[tokio::test]
    async fn lagging_subscriber_sees_lagged_error_not_block() {
        let channel = MarketChannel::with_capacity(2);
        let mut rx = channel.subscribe();
        for _ in 0..5 {
            channel.publish(Venue::Binance, &trade_frame()).unwrap();
        }
        let result = rx.recv().await;
        assert!(matches!(result, Err(broadcast::error::RecvError::Lagged(_))));
    }
}
