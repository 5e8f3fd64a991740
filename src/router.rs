// =============================================================================
// Order Router — resolves strategy_id to an account/adapter, transmits
// orders, and correlates async user-data-stream updates back to the
// in-flight table
// =============================================================================
//
// Grounded on execution.rs's risk-gate-then-transmit flow and
// position_engine.rs's id-keyed `RwLock<Vec<T>>` table pattern, generalized
// from a single-venue demo/live split into the multi-venue, multi-strategy
// in-flight order table the design calls for.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::adapter::{CancelTarget, ExchangeAdapter, PlaceOrderRequest};
use crate::error::CoreError;
use crate::registry::StrategyRegistry;
use crate::types::{MarketVariant, Order, OrderReport, OrderState, ReportType, Side, Venue};

const DEFAULT_RETIREMENT_TTL: Duration = Duration::from_secs(5 * 60);

struct InFlightEntry {
    order: Order,
    retire_at: Option<Instant>,
}

pub struct OrderRouter {
    registry: Arc<StrategyRegistry>,
    adapters: HashMap<(Venue, MarketVariant), Arc<dyn ExchangeAdapter>>,
    in_flight: parking_lot::RwLock<HashMap<String, InFlightEntry>>,
    reports_tx: mpsc::UnboundedSender<OrderReport>,
    seq: AtomicU64,
    retirement_ttl: Duration,
}

impl OrderRouter {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        adapters: HashMap<(Venue, MarketVariant), Arc<dyn ExchangeAdapter>>,
        reports_tx: mpsc::UnboundedSender<OrderReport>,
    ) -> Self {
        Self {
            registry,
            adapters,
            in_flight: parking_lot::RwLock::new(HashMap::new()),
            reports_tx,
            seq: AtomicU64::new(0),
            retirement_ttl: DEFAULT_RETIREMENT_TTL,
        }
    }

    /// Core-generated client_order_id: millisecond time prefix plus a
    /// monotonic counter, unique per process.
    pub fn generate_client_order_id(&self) -> String {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        let ts = crate::signer::Signer::timestamp_ms();
        format!("core-{ts}-{n}")
    }

    fn publish(&self, report: OrderReport) {
        if self.reports_tx.send(report).is_err() {
            warn!("reports channel has no receiver; report dropped");
        }
    }

    #[instrument(skip(self, req), fields(strategy_id, symbol = %req.symbol))]
    pub async fn place_order(&self, strategy_id: &str, mut req: PlaceOrderRequest) -> OrderReport {
        let strategy = match self.registry.get(strategy_id) {
            Some(s) if s.enabled => s,
            Some(_) | None => {
                let report = reject(strategy_id, None, "UNKNOWN_STRATEGY", "unknown or disabled strategy");
                self.publish(report.clone());
                return report;
            }
        };

        if req.client_order_id.is_empty() {
            req.client_order_id = self.generate_client_order_id();
        }

        let order = Order {
            client_order_id: req.client_order_id.clone(),
            venue_order_id: None,
            strategy_id: strategy_id.to_string(),
            symbol: req.symbol.clone(),
            side: req.side,
            order_type: req.order_type,
            tif: req.tif,
            qty: req.qty,
            price: req.price,
            pos_side: req.pos_side,
            state: OrderState::New,
        };
        self.in_flight.write().insert(
            order.client_order_id.clone(),
            InFlightEntry { order, retire_at: None },
        );

        let key = (strategy.account.venue, strategy.account.market_variant);
        let adapter = match self.adapters.get(&key) {
            Some(a) => a.clone(),
            None => {
                let report = self.fail(&req.client_order_id, strategy_id, "no adapter configured for account");
                self.publish(report.clone());
                return report;
            }
        };

        self.set_state(&req.client_order_id, OrderState::Submitted);

        let report = match adapter.place_order(&strategy.account, &req).await {
            Ok(mut report) => {
                if report.venue_order_id.is_none() && report.status == OrderState::Accepted {
                    warn!(client_order_id = %req.client_order_id, "accepted response missing venue_order_id");
                    report.status = OrderState::Failed;
                    report.error_code = Some("PROTOCOL".to_string());
                    report.error_msg = Some("acceptance response missing venue_order_id".into());
                }
                report.strategy_id = strategy_id.to_string();
                report.client_order_id = Some(req.client_order_id.clone());
                report
            }
            Err(err) => self.failure_report(&req.client_order_id, strategy_id, err),
        };

        self.apply_report(&report);
        self.publish(report.clone());
        report
    }

    #[instrument(skip(self), fields(strategy_id, symbol))]
    pub async fn cancel_order(
        &self,
        strategy_id: &str,
        symbol: &str,
        target: CancelTarget,
    ) -> OrderReport {
        let strategy = match self.registry.get(strategy_id) {
            Some(s) if s.enabled => s,
            _ => return reject(strategy_id, None, "UNKNOWN_STRATEGY", "unknown or disabled strategy"),
        };

        let key = (strategy.account.venue, strategy.account.market_variant);
        let Some(adapter) = self.adapters.get(&key).cloned() else {
            return reject(strategy_id, None, "CONFIG", "no adapter configured for account");
        };

        let client_order_id = match &target {
            CancelTarget::ClientOrderId(id) => Some(id.clone()),
            CancelTarget::VenueOrderId(_) => None,
        };

        let report = match adapter.cancel_order(&strategy.account, symbol, target).await {
            Ok(mut r) => {
                r.strategy_id = strategy_id.to_string();
                r
            }
            Err(err) => self.failure_report(
                client_order_id.as_deref().unwrap_or(""),
                strategy_id,
                err,
            ),
        };

        self.apply_report(&report);
        self.publish(report.clone());
        report
    }

    #[instrument(skip(self), fields(strategy_id, symbol))]
    pub async fn cancel_all(&self, strategy_id: &str, symbol: Option<&str>) -> OrderReport {
        let strategy = match self.registry.get(strategy_id) {
            Some(s) if s.enabled => s,
            _ => return reject(strategy_id, None, "UNKNOWN_STRATEGY", "unknown or disabled strategy"),
        };

        let key = (strategy.account.venue, strategy.account.market_variant);
        let Some(adapter) = self.adapters.get(&key).cloned() else {
            return reject(strategy_id, None, "CONFIG", "no adapter configured for account");
        };

        let report = match adapter.cancel_all(&strategy.account, symbol).await {
            Ok(mut r) => {
                r.strategy_id = strategy_id.to_string();
                r
            }
            Err(err) => self.failure_report("", strategy_id, err),
        };

        self.publish(report.clone());
        report
    }

    /// Correlate an asynchronous user-data-stream update (venue-native,
    /// already normalized by the caller into an `OrderReport`) back to the
    /// in-flight table, preferring `client_order_id` and falling back to
    /// `venue_order_id`.
    pub fn correlate_update(&self, mut report: OrderReport) {
        let mut table = self.in_flight.write();

        let matched_id = report.client_order_id.clone().or_else(|| {
            report.venue_order_id.as_ref().and_then(|vid| {
                table
                    .values()
                    .find(|e| e.order.venue_order_id.as_deref() == Some(vid.as_str()))
                    .map(|e| e.order.client_order_id.clone())
            })
        });

        if let Some(id) = matched_id {
            if let Some(entry) = table.get_mut(&id) {
                entry.order.state = report.status;
                if report.venue_order_id.is_some() {
                    entry.order.venue_order_id = report.venue_order_id.clone();
                }
                if report.status.is_terminal() {
                    entry.retire_at = Some(Instant::now() + self.retirement_ttl);
                }
                report.client_order_id = Some(id);
            }
        }
        drop(table);
        self.publish(report);
    }

    /// Drop in-flight entries past their retirement TTL. Call periodically
    /// from the supervisor's timer loop.
    pub fn sweep_retired(&self) {
        let now = Instant::now();
        self.in_flight.write().retain(|_, entry| match entry.retire_at {
            Some(at) => at > now,
            None => true,
        });
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.read().len()
    }

    pub fn get_order(&self, client_order_id: &str) -> Option<Order> {
        self.in_flight.read().get(client_order_id).map(|e| e.order.clone())
    }

    /// Snapshot of every order currently in the table, terminal or not. Fed
    /// to the Supervisor's reconciliation pass on reconnect.
    pub fn in_flight_orders(&self) -> Vec<Order> {
        self.in_flight.read().values().map(|e| e.order.clone()).collect()
    }

    fn set_state(&self, client_order_id: &str, state: OrderState) {
        if let Some(entry) = self.in_flight.write().get_mut(client_order_id) {
            entry.order.state = state;
        }
    }

    fn apply_report(&self, report: &OrderReport) {
        let Some(id) = &report.client_order_id else { return };
        let mut table = self.in_flight.write();
        if let Some(entry) = table.get_mut(id) {
            entry.order.state = report.status;
            if report.venue_order_id.is_some() {
                entry.order.venue_order_id = report.venue_order_id.clone();
            }
            if report.status.is_terminal() {
                entry.retire_at = Some(Instant::now() + self.retirement_ttl);
            }
        }
    }

    fn failure_report(&self, client_order_id: &str, strategy_id: &str, err: CoreError) -> OrderReport {
        OrderReport {
            report_type: ReportType::OrderUpdate,
            strategy_id: strategy_id.to_string(),
            client_order_id: if client_order_id.is_empty() { None } else { Some(client_order_id.to_string()) },
            venue_order_id: None,
            status: OrderState::Failed,
            filled_qty: 0.0,
            avg_fill_price: 0.0,
            fee: None,
            error_code: Some(err.code().to_string()),
            error_msg: Some(err.to_string()),
            ts: crate::signer::Signer::timestamp_ms(),
        }
    }

    fn fail(&self, client_order_id: &str, strategy_id: &str, msg: &str) -> OrderReport {
        OrderReport {
            report_type: ReportType::OrderUpdate,
            strategy_id: strategy_id.to_string(),
            client_order_id: Some(client_order_id.to_string()),
            venue_order_id: None,
            status: OrderState::Failed,
            filled_qty: 0.0,
            avg_fill_price: 0.0,
            fee: None,
            error_code: Some("CONFIG".to_string()),
            error_msg: Some(msg.to_string()),
            ts: crate::signer::Signer::timestamp_ms(),
        }
    }
}

fn reject(strategy_id: &str, client_order_id: Option<String>, code: &'static str, msg: &str) -> OrderReport {
    OrderReport {
        report_type: ReportType::OrderUpdate,
        strategy_id: strategy_id.to_string(),
        client_order_id,
        venue_order_id: None,
        status: OrderState::Rejected,
        filled_qty: 0.0,
        avg_fill_price: 0.0,
        fee: None,
        error_code: Some(code.to_string()),
        error_msg: Some(msg.to_string()),
        ts: crate::signer::Signer::timestamp_ms(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Account, CredentialSet, RiskConfig, Strategy};

    fn strategy(id: &str, enabled: bool) -> Strategy {
        Strategy {
            strategy_id: id.to_string(),
            display_name: String::new(),
            kind: String::new(),
            enabled,
            account: Account {
                venue: Venue::Binance,
                market_variant: MarketVariant::Spot,
                credentials: CredentialSet { api_key: "k".into(), secret: "s".into(), passphrase: None },
                is_testnet: true,
                proxy: None,
            },
            contacts: Vec::new(),
            risk_control: RiskConfig::default(),
        }
    }

    fn registry_with(strategies: Vec<Strategy>) -> Arc<StrategyRegistry> {
        let dir = std::env::temp_dir().join(format!("router-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let registry = StrategyRegistry::load(&dir).unwrap();
        for s in strategies {
            registry.register(s).unwrap();
        }
        Arc::new(registry)
    }

    fn router(strategies: Vec<Strategy>) -> (OrderRouter, mpsc::UnboundedReceiver<OrderReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = registry_with(strategies);
        (OrderRouter::new(registry, HashMap::new(), tx), rx)
    }

    fn place_req() -> PlaceOrderRequest {
        PlaceOrderRequest {
            client_order_id: String::new(),
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            order_type: crate::types::OrderType::Market,
            tif: None,
            qty: 1.0,
            price: None,
            pos_side: Default::default(),
        }
    }

    #[tokio::test]
    async fn unknown_strategy_is_rejected_without_transmit() {
        let (router, mut rx) = router(vec![]);
        let report = router.place_order("ghost", place_req()).await;
        assert_eq!(report.status, OrderState::Rejected);
        assert_eq!(report.error_code.as_deref(), Some("UNKNOWN_STRATEGY"));
        assert_eq!(rx.recv().await.unwrap().error_code.as_deref(), Some("UNKNOWN_STRATEGY"));
    }

    #[tokio::test]
    async fn disabled_strategy_is_rejected() {
        let (router, _rx) = router(vec![strategy("s1", false)]);
        let report = router.place_order("s1", place_req()).await;
        assert_eq!(report.status, OrderState::Rejected);
    }

    #[tokio::test]
    async fn missing_adapter_fails_after_admission() {
        let (router, _rx) = router(vec![strategy("s1", true)]);
        let report = router.place_order("s1", place_req()).await;
        assert_eq!(report.status, OrderState::Failed);
        assert_eq!(report.error_code.as_deref(), Some("CONFIG"));
        assert_eq!(router.in_flight_count(), 1);
    }

    #[tokio::test]
    async fn in_flight_orders_snapshots_the_table() {
        let (router, _rx) = router(vec![strategy("s1", true)]);
        router.place_order("s1", place_req()).await;
        let orders = router.in_flight_orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].strategy_id, "s1");
    }

    #[tokio::test]
    async fn cancel_all_rejects_unknown_strategy() {
        let (router, _rx) = router(vec![]);
        let report = router.cancel_all("ghost", None).await;
        assert_eq!(report.status, OrderState::Rejected);
        assert_eq!(report.error_code.as_deref(), Some("UNKNOWN_STRATEGY"));
    }

    #[test]
    fn generated_client_order_ids_are_unique() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = registry_with(vec![]);
        let router = OrderRouter::new(registry, HashMap::new(), tx);
        let a = router.generate_client_order_id();
        let b = router.generate_client_order_id();
        assert_ne!(a, b);
    }

    #[test]
    fn sweep_retires_only_past_ttl() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = registry_with(vec![]);
        let router = OrderRouter::new(registry, HashMap::new(), tx);
        router.in_flight.write().insert(
            "a".into(),
            InFlightEntry {
                order: Order {
                    client_order_id: "a".into(),
                    venue_order_id: None,
                    strategy_id: "s1".into(),
                    symbol: "BTCUSDT".into(),
                    side: Side::Buy,
                    order_type: crate::types::OrderType::Market,
                    tif: None,
                    qty: 1.0,
                    price: None,
                    pos_side: Default::default(),
                    state: OrderState::Filled,
                },
                retire_at: Some(Instant::now() - Duration::from_secs(1)),
            },
        );
        router.sweep_retired();
        assert_eq!(router.in_flight_count(), 0);
    }
}
