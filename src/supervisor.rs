// =============================================================================
// Supervisor — reconnect/backoff/subscription-replay/keepalive state machine
// =============================================================================
//
// A minimal entry point would spawn one `loop { stream().await; sleep(5s) }`
// task per market stream with a fixed 5-second retry. This generalizes that
// shape into an explicit capped-exponential-backoff state machine per stream,
// plus listen-key keepalive/recreation and reconciliation borrowed from
// reconcile.rs's "detect drift, never act unilaterally" posture.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::adapter::ExchangeAdapter;
use crate::types::{Account, Order, OrderReport, ReportType, Subscription};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const USER_DATA_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Doubles on each consecutive failure, resets to `INITIAL_BACKOFF` on a
/// clean connection, caps at `MAX_BACKOFF`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self { current: INITIAL_BACKOFF }
    }

    pub fn reset(&mut self) {
        self.current = INITIAL_BACKOFF;
    }

    pub fn next(&mut self) -> Duration {
        let wait = self.current;
        self.current = (self.current * 2).min(MAX_BACKOFF);
        wait
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Replays a subscription set on a fresh connection. Callers supply the
/// venue-specific frame builder; this just sequences the calls.
pub async fn replay_subscriptions<F, Fut>(subs: &[Subscription], mut send: F)
where
    F: FnMut(&Subscription) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    for sub in subs {
        if let Err(e) = send(sub).await {
            warn!(strategy_id = %sub.strategy_id, symbol = %sub.symbol, error = %e, "subscription replay failed");
        }
    }
}

/// Runs `connect` in a loop with capped exponential backoff between
/// attempts. `connect` should run until the stream closes/fails and return
/// `Ok(())` only on a deliberate shutdown signal.
pub async fn run_with_backoff<F, Fut>(label: &str, mut connect: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let mut backoff = Backoff::new();
    loop {
        info!(stream = label, "connecting");
        match connect().await {
            Ok(()) => {
                info!(stream = label, "stream loop exited cleanly, stopping supervisor");
                return;
            }
            Err(e) => {
                let wait = backoff.next();
                error!(stream = label, error = %e, wait_secs = wait.as_secs(), "stream failed, backing off");
                tokio::time::sleep(wait).await;
            }
        }
    }
}

/// User-data stream lifecycle: create a listen key, keepalive on an
/// interval, and recreate (with reconciliation) if a keepalive fails.
pub struct UserDataSupervisor {
    adapter: Arc<dyn ExchangeAdapter>,
    account: Account,
}

impl UserDataSupervisor {
    pub fn new(adapter: Arc<dyn ExchangeAdapter>, account: Account) -> Self {
        Self { adapter, account }
    }

    pub async fn create_listen_key(&self) -> anyhow::Result<String> {
        self.adapter
            .create_listen_key(&self.account)
            .await
            .map_err(|e| anyhow::anyhow!(e))
    }

    /// Runs the keepalive timer forever. Returns an error (triggering
    /// listen-key recreation by the caller) if a keepalive call fails.
    pub async fn keepalive_loop(&self, key: &str) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(USER_DATA_KEEPALIVE_INTERVAL);
        interval.tick().await; // first tick fires immediately; skip it
        loop {
            interval.tick().await;
            if let Err(e) = self.adapter.keepalive_listen_key(&self.account, key).await {
                warn!(error = %e, "listen key keepalive failed, recreation required");
                return Err(anyhow::anyhow!(e));
            }
            info!("listen key keepalive sent");
        }
    }

    /// Re-query open orders from REST and emit synthetic `order_update`
    /// reports for any in-flight order whose state has drifted. Never
    /// cancels or mutates anything on the exchange — reconcile.rs's
    /// detect-and-report-only posture, generalized across venues.
    pub async fn reconcile_open_orders(
        &self,
        in_flight: &[Order],
    ) -> anyhow::Result<Vec<OrderReport>> {
        let venue_open = self
            .adapter
            .open_orders(&self.account, None)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;

        let mut drift_reports = Vec::new();
        for local in in_flight {
            if local.state.is_terminal() {
                continue;
            }
            let venue_match = venue_open.iter().find(|o| o.client_order_id == local.client_order_id);
            let drifted = match venue_match {
                Some(remote) => remote.state != local.state,
                None => true,
            };
            if drifted {
                let resolved_state = venue_match.map(|o| o.state).unwrap_or(crate::types::OrderState::Cancelled);
                warn!(
                    client_order_id = %local.client_order_id,
                    local_state = ?local.state,
                    resolved_state = ?resolved_state,
                    "order state drift detected during reconciliation"
                );
                drift_reports.push(OrderReport {
                    report_type: ReportType::OrderUpdate,
                    strategy_id: local.strategy_id.clone(),
                    client_order_id: Some(local.client_order_id.clone()),
                    venue_order_id: local.venue_order_id.clone(),
                    status: resolved_state,
                    filled_qty: 0.0,
                    avg_fill_price: 0.0,
                    fee: None,
                    error_code: None,
                    error_msg: Some("reconciled from venue open-orders snapshot".into()),
                    ts: crate::signer::Signer::timestamp_ms(),
                });
            }
        }
        Ok(drift_reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = Backoff::new();
        assert_eq!(b.next(), Duration::from_secs(1));
        assert_eq!(b.next(), Duration::from_secs(2));
        assert_eq!(b.next(), Duration::from_secs(4));
        for _ in 0..10 {
            b.next();
        }
        assert_eq!(b.next(), MAX_BACKOFF);
    }

    #[test]
    fn backoff_resets() {
        let mut b = Backoff::new();
        b.next();
        b.next();
        b.reset();
        assert_eq!(b.next(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn run_with_backoff_retries_on_error_then_stops_on_ok() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        run_with_backoff("test-stream", move || {
            let a = a.clone();
            async move {
                let n = a.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(anyhow::anyhow!("transient failure"))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
