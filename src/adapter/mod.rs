// =============================================================================
// Exchange Adapter — per-venue endpoint tables, message schemas, and the
// capability gate that stands between a strategy request and the network.
// =============================================================================

pub mod binance;
pub mod okx;
pub mod rate_limit;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::market_frame::{BookSnapshot, FundingRate, Kline, Trade};
use crate::types::{Account, MarketVariant, Order, OrderReport, Venue};

/// Bitmask of operations an (adapter, market_variant) pair supports. Checked
/// before any network call is made; an unsupported op never reaches the
/// transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const FUNDING_RATE: Capabilities = Capabilities(1 << 0);
    pub const BATCH_PLACE: Capabilities = Capabilities(1 << 1);
    pub const POSITIONS: Capabilities = Capabilities(1 << 2);
    pub const LEVERAGE: Capabilities = Capabilities(1 << 3);
    pub const TRADING_WS: Capabilities = Capabilities(1 << 4);

    pub const fn union(self, other: Capabilities) -> Capabilities {
        Capabilities(self.0 | other.0)
    }

    pub const fn has(self, flag: Capabilities) -> bool {
        self.0 & flag.0 != 0
    }

    pub const fn empty() -> Capabilities {
        Capabilities(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub client_order_id: String,
    pub symbol: String,
    pub side: crate::types::Side,
    pub order_type: crate::types::OrderType,
    pub tif: Option<crate::types::Tif>,
    pub qty: f64,
    pub price: Option<f64>,
    pub pos_side: crate::types::PosSide,
}

#[derive(Debug, Clone)]
pub enum CancelTarget {
    ClientOrderId(String),
    VenueOrderId(String),
}

/// Common contract every venue/variant pair implements. Methods return
/// [`CoreError::CapabilityUnsupported`] synchronously (no I/O) when the
/// current variant does not support the operation.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn venue(&self) -> Venue;
    fn market_variant(&self) -> MarketVariant;
    fn capabilities(&self) -> Capabilities;

    async fn connectivity_check(&self) -> Result<bool, CoreError>;
    async fn server_time(&self) -> Result<i64, CoreError>;

    async fn depth(&self, symbol: &str, depth_n: u32) -> Result<BookSnapshot, CoreError>;
    async fn recent_trades(&self, symbol: &str, n: u32) -> Result<Vec<Trade>, CoreError>;
    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        start: Option<i64>,
        end: Option<i64>,
        n: u32,
    ) -> Result<Vec<Kline>, CoreError>;
    async fn ticker_24h(&self, symbol: Option<&str>) -> Result<serde_json::Value, CoreError>;

    async fn funding_rate(&self, symbol: &str, n: u32) -> Result<Vec<FundingRate>, CoreError> {
        let _ = (symbol, n);
        Err(CoreError::CapabilityUnsupported)
    }

    async fn place_order(
        &self,
        account: &Account,
        req: &PlaceOrderRequest,
    ) -> Result<OrderReport, CoreError>;

    async fn cancel_order(
        &self,
        account: &Account,
        symbol: &str,
        target: CancelTarget,
    ) -> Result<OrderReport, CoreError>;

    async fn cancel_all(&self, account: &Account, symbol: Option<&str>) -> Result<OrderReport, CoreError>;

    async fn batch_place(
        &self,
        _account: &Account,
        _orders: &[PlaceOrderRequest],
    ) -> Result<Vec<OrderReport>, CoreError> {
        Err(CoreError::CapabilityUnsupported)
    }

    async fn query_order(
        &self,
        account: &Account,
        symbol: &str,
        target: CancelTarget,
    ) -> Result<Order, CoreError>;

    async fn open_orders(&self, account: &Account, symbol: Option<&str>) -> Result<Vec<Order>, CoreError>;

    /// Read-through order history, as distinct from the live `open_orders`
    /// snapshot.
    async fn all_orders(&self, _account: &Account, _symbol: &str, _n: u32) -> Result<Vec<Order>, CoreError> {
        Err(CoreError::CapabilityUnsupported)
    }

    async fn account_info(&self, account: &Account) -> Result<serde_json::Value, CoreError>;
    async fn balances(&self, account: &Account) -> Result<Vec<crate::types::BalanceInfo>, CoreError>;

    async fn positions(&self, _account: &Account) -> Result<serde_json::Value, CoreError> {
        Err(CoreError::CapabilityUnsupported)
    }

    async fn set_leverage(&self, _account: &Account, _symbol: &str, _leverage: u32) -> Result<(), CoreError> {
        Err(CoreError::CapabilityUnsupported)
    }

    async fn set_margin_mode(&self, _account: &Account, _symbol: &str, _cross: bool) -> Result<(), CoreError> {
        Err(CoreError::CapabilityUnsupported)
    }

    async fn set_position_mode(&self, _account: &Account, _hedge: bool) -> Result<(), CoreError> {
        Err(CoreError::CapabilityUnsupported)
    }

    async fn create_listen_key(&self, account: &Account) -> Result<String, CoreError>;
    async fn keepalive_listen_key(&self, account: &Account, key: &str) -> Result<(), CoreError>;

    fn market_stream_url(&self, account: &Account) -> String;
    fn user_data_stream_url(&self, account: &Account, listen_key: &str) -> String;

    /// Build a subscribe/unsubscribe control frame for `channel`/`symbol` on
    /// this venue's market stream. Default shape matches Binance's
    /// `{"method":..., "params":[...], "id":n}`; OKX overrides with its
    /// `{"op":..., "args":[...]}` shape.
    fn subscribe_frame(&self, channel: &str, symbol: &str, interval: Option<&str>, id: u64) -> Result<String, CoreError> {
        let stream = match interval {
            Some(iv) => format!("{}@{channel}_{iv}", symbol.to_lowercase()),
            None => format!("{}@{channel}", symbol.to_lowercase()),
        };
        crate::ws_transport::subscribe_frame("SUBSCRIBE", &[stream], id)
    }

    fn unsubscribe_frame(&self, channel: &str, symbol: &str, interval: Option<&str>, id: u64) -> Result<String, CoreError> {
        let stream = match interval {
            Some(iv) => format!("{}@{channel}_{iv}", symbol.to_lowercase()),
            None => format!("{}@{channel}", symbol.to_lowercase()),
        };
        crate::ws_transport::subscribe_frame("UNSUBSCRIBE", &[stream], id)
    }

    /// Place an order over the trading WS connection rather than REST.
    /// Gated by [`Capabilities::TRADING_WS`]; venues without a trading
    /// websocket never reach this (the Router stays on REST `place_order`).
    async fn place_order_ws(&self, _account: &Account, _req: &PlaceOrderRequest) -> Result<String, CoreError> {
        Err(CoreError::CapabilityUnsupported)
    }

    async fn cancel_order_ws(&self, _account: &Account, _symbol: &str, _target: CancelTarget) -> Result<String, CoreError> {
        Err(CoreError::CapabilityUnsupported)
    }

    async fn query_order_ws(&self, _account: &Account, _symbol: &str, _target: CancelTarget) -> Result<String, CoreError> {
        Err(CoreError::CapabilityUnsupported)
    }

    async fn modify_order_ws(&self, _account: &Account, _req: &PlaceOrderRequest) -> Result<String, CoreError> {
        Err(CoreError::CapabilityUnsupported)
    }

    /// Parse one raw WS text frame from this venue's market stream into the
    /// common envelope. Returns `None` for frames that carry no market data
    /// (subscription acks, pongs, heartbeats) rather than erroring — those
    /// are routine, not protocol violations.
    fn parse_market_message(&self, raw: &str) -> Option<crate::market_frame::MarketFrame>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_union_and_has() {
        let caps = Capabilities::FUNDING_RATE.union(Capabilities::BATCH_PLACE);
        assert!(caps.has(Capabilities::FUNDING_RATE));
        assert!(caps.has(Capabilities::BATCH_PLACE));
        assert!(!caps.has(Capabilities::POSITIONS));
    }

    #[test]
    fn empty_capabilities_has_nothing() {
        assert!(!Capabilities::empty().has(Capabilities::FUNDING_RATE));
    }
}
