// =============================================================================
// Report Channel — per-strategy fan-out with blocking backpressure
// =============================================================================
//
// Unlike the market channel, operators must not silently lose order/position/
// balance updates, so this uses bounded `mpsc` per subscriber and a blocking
// `.send().await` rather than broadcast's drop-oldest lag semantics. A slow
// subscriber here applies backpressure to the publisher instead of losing
// reports.
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::types::OrderReport;

const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

pub struct ReportChannel {
    subscribers: RwLock<HashMap<String, Vec<mpsc::Sender<OrderReport>>>>,
}

impl ReportChannel {
    pub fn new() -> Self {
        Self { subscribers: RwLock::new(HashMap::new()) }
    }

    /// Register a new subscriber for `strategy_id`'s reports only.
    pub fn subscribe(&self, strategy_id: &str) -> mpsc::Receiver<OrderReport> {
        let (tx, rx) = mpsc::channel(DEFAULT_SUBSCRIBER_CAPACITY);
        self.subscribers.write().entry(strategy_id.to_string()).or_default().push(tx);
        rx
    }

    /// Publish a report to every subscriber of its `strategy_id`. Blocks
    /// (applying backpressure to the caller) if a subscriber's queue is
    /// full rather than dropping the report.
    pub async fn publish(&self, report: OrderReport) {
        let senders: Vec<mpsc::Sender<OrderReport>> = {
            let guard = self.subscribers.read();
            match guard.get(&report.strategy_id) {
                Some(list) => list.clone(),
                None => return,
            }
        };
        for sender in senders {
            if sender.send(report.clone()).await.is_err() {
                debug!(strategy_id = %report.strategy_id, "report subscriber gone, will be pruned");
            }
        }
    }

    /// Drop senders whose receiver has been dropped. Call periodically;
    /// publish() itself never prunes to avoid holding the write lock on the
    /// hot path.
    pub fn prune_closed(&self) {
        let mut guard = self.subscribers.write();
        for list in guard.values_mut() {
            list.retain(|tx| !tx.is_closed());
        }
        guard.retain(|_, list| !list.is_empty());
    }

    pub fn subscriber_count(&self, strategy_id: &str) -> usize {
        self.subscribers.read().get(strategy_id).map_or(0, Vec::len)
    }

    /// Drain this channel's feed of reports (fed by `router.rs` via an
    /// internal mpsc) onto the per-strategy subscriber fan-out, and serve
    /// Unix-socket connections that each bind to one strategy's reports.
    pub async fn serve(
        self: Arc<Self>,
        mut reports_rx: mpsc::UnboundedReceiver<OrderReport>,
        listener: UnixListener,
        path: PathBuf,
    ) {
        let fan_out = self.clone();
        tokio::spawn(async move {
            while let Some(report) = reports_rx.recv().await {
                fan_out.publish(report).await;
            }
        });

        info!(path = %path.display(), "report channel listening");
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let channel = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = channel.handle_subscriber(stream).await {
                            debug!(error = %e, "report channel subscriber disconnected");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "report channel accept failed"),
            }
        }
    }

    async fn handle_subscriber(&self, stream: UnixStream) -> std::io::Result<()> {
        use tokio::io::{AsyncBufReadExt, BufReader};

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut strategy_id = String::new();
        reader.read_line(&mut strategy_id).await?;
        let strategy_id = strategy_id.trim().to_string();

        let mut rx = self.subscribe(&strategy_id);
        while let Some(report) = rx.recv().await {
            let json = match serde_json::to_string(&report) {
                Ok(j) => j,
                Err(_) => continue,
            };
            write_half.write_all(json.as_bytes()).await?;
            write_half.write_all(b"\n").await?;
        }
        Ok(())
    }
}

impl Default for ReportChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderState, ReportType};

    fn report(strategy_id: &str) -> OrderReport {
        OrderReport {
            report_type: ReportType::OrderUpdate,
            strategy_id: strategy_id.to_string(),
            client_order_id: Some("c1".into()),
            venue_order_id: None,
            status: OrderState::Accepted,
            filled_qty: 0.0,
            avg_fill_price: 0.0,
            fee: None,
            error_code: None,
            error_msg: None,
            ts: 0,
        }
    }

    #[tokio::test]
    async fn only_matching_strategy_receives_report() {
        let channel = ReportChannel::new();
        let mut rx_a = channel.subscribe("strat-a");
        let mut rx_b = channel.subscribe("strat-b");

        channel.publish(report("strat-a")).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_strategy_has_no_subscribers_and_is_dropped_silently() {
        let channel = ReportChannel::new();
        channel.publish(report("ghost")).await;
        assert_eq!(channel.subscriber_count("ghost"), 0);
    }

    #[tokio::test]
    async fn prune_removes_closed_subscribers() {
        let channel = ReportChannel::new();
        {
            let _rx = channel.subscribe("strat-a");
        }
        assert_eq!(channel.subscriber_count("strat-a"), 1);
        channel.prune_closed();
        assert_eq!(channel.subscriber_count("strat-a"), 0);
    }
}
