// =============================================================================
// Binance Adapter — spot and USDT-margined perpetual
// =============================================================================
//
// Grounded directly on a `BinanceClient`-style REST wrapper: the same
// signed-query construction (`timestamp` + `recvWindow` appended, then
// `signature`), the same `X-MBX-APIKEY` header, the same array-of-arrays
// kline parsing. Generalized here to run per-account (so multiple strategies
// each get their own credentials) and to implement the full adapter
// contract rather than a handful of ad hoc methods.
// =============================================================================

use async_trait::async_trait;
use reqwest::Method;
use tracing::{debug, instrument};

use crate::adapter::rate_limit::RateLimitTracker;
use crate::adapter::{CancelTarget, Capabilities, ExchangeAdapter, PlaceOrderRequest};
use crate::error::CoreError;
use crate::market_frame::{BookSnapshot, FundingRate, Kline, MarketFrame, SettleState, Trade, TradeSide};
use crate::rest_client::RestClient;
use crate::signer::Signer;
use crate::types::{
    Account, BalanceInfo, MarketVariant, Order, OrderReport, OrderState, PosSide, ReportType,
    Side, Venue,
};

const RECV_WINDOW_MS: i64 = 5000;

pub struct BinanceAdapter {
    variant: MarketVariant,
    rest: RestClient,
    rate_limit: RateLimitTracker,
}

impl BinanceAdapter {
    pub fn new(variant: MarketVariant, account: &Account) -> anyhow::Result<Self> {
        let base_url = match (variant, account.is_testnet) {
            (MarketVariant::Spot, false) => "https://api.binance.com",
            (MarketVariant::Spot, true) => "https://testnet.binance.vision",
            (MarketVariant::UsdtPerp, false) => "https://fapi.binance.com",
            (MarketVariant::UsdtPerp, true) => "https://testnet.binancefuture.com",
            (MarketVariant::CoinPerp, false) => "https://dapi.binance.com",
            (MarketVariant::CoinPerp, true) => "https://testnet.binancefuture.com",
        };

        Ok(Self {
            variant,
            rest: RestClient::new(base_url, account.proxy.as_deref())?,
            rate_limit: RateLimitTracker::new(),
        })
    }

    fn order_path(&self) -> &'static str {
        match self.variant {
            MarketVariant::Spot => "/api/v3/order",
            MarketVariant::UsdtPerp => "/fapi/v1/order",
            MarketVariant::CoinPerp => "/dapi/v1/order",
        }
    }

    fn open_orders_path(&self) -> &'static str {
        match self.variant {
            MarketVariant::Spot => "/api/v3/openOrders",
            MarketVariant::UsdtPerp => "/fapi/v1/openOrders",
            MarketVariant::CoinPerp => "/dapi/v1/openOrders",
        }
    }

    fn account_path(&self) -> &'static str {
        match self.variant {
            MarketVariant::Spot => "/api/v3/account",
            MarketVariant::UsdtPerp => "/fapi/v2/account",
            MarketVariant::CoinPerp => "/dapi/v1/account",
        }
    }

    fn listen_key_path(&self) -> &'static str {
        match self.variant {
            MarketVariant::Spot => "/api/v3/userDataStream",
            MarketVariant::UsdtPerp => "/fapi/v1/listenKey",
            MarketVariant::CoinPerp => "/dapi/v1/listenKey",
        }
    }

    async fn signed_request(
        &self,
        account: &Account,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<serde_json::Value, CoreError> {
        params.push(("timestamp", Signer::timestamp_ms().to_string()));
        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));

        let signer = Signer::new(account.credentials.secret.clone());
        let query = signer.sign_http_form(&params)?;

        let resp = self
            .rest
            .execute(
                method,
                path,
                Some(&query),
                None,
                vec![("X-MBX-APIKEY", account.credentials.api_key.clone())],
            )
            .await?;

        self.rate_limit.update_from_headers(&resp.headers);
        Ok(resp.body)
    }

    fn order_type_str(t: crate::types::OrderType) -> &'static str {
        use crate::types::OrderType::*;
        match t {
            Market => "MARKET",
            Limit => "LIMIT",
            Stop => "STOP_LOSS",
            StopLimit => "STOP_LOSS_LIMIT",
            TakeProfit => "TAKE_PROFIT",
            TpLimit => "TAKE_PROFIT_LIMIT",
            PostOnly => "LIMIT_MAKER",
        }
    }

    fn tif_str(t: crate::types::Tif) -> &'static str {
        use crate::types::Tif::*;
        match t {
            Gtc => "GTC",
            Ioc => "IOC",
            Fok => "FOK",
            PostOnly => "GTX",
        }
    }

    fn report_from_order_response(
        body: &serde_json::Value,
        strategy_id: &str,
        client_order_id: &str,
    ) -> OrderReport {
        let status_raw = body.get("status").and_then(|s| s.as_str()).unwrap_or("NEW");
        let status = match status_raw {
            "NEW" => OrderState::Accepted,
            "PARTIALLY_FILLED" => OrderState::Partial,
            "FILLED" => OrderState::Filled,
            "CANCELED" | "CANCELLED" | "EXPIRED" => OrderState::Cancelled,
            "REJECTED" => OrderState::Rejected,
            _ => OrderState::Submitted,
        };

        let venue_order_id = body.get("orderId").map(|v| v.to_string());
        let filled_qty = body
            .get("executedQty")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);
        let avg_fill_price = body
            .get("avgPrice")
            .or_else(|| body.get("price"))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0);

        OrderReport {
            report_type: ReportType::OrderUpdate,
            strategy_id: strategy_id.to_string(),
            client_order_id: Some(client_order_id.to_string()),
            venue_order_id,
            status,
            filled_qty,
            avg_fill_price,
            fee: None,
            error_code: None,
            error_msg: None,
            ts: Signer::timestamp_ms(),
        }
    }

    fn parse_str_f64(val: &serde_json::Value) -> Result<f64, CoreError> {
        if let Some(s) = val.as_str() {
            s.parse::<f64>().map_err(CoreError::from)
        } else if let Some(n) = val.as_f64() {
            Ok(n)
        } else {
            Err(CoreError::Protocol(format!("expected string or number, got: {val}")))
        }
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    fn market_variant(&self) -> MarketVariant {
        self.variant
    }

    fn capabilities(&self) -> Capabilities {
        let base = Capabilities::TRADING_WS;
        if self.variant.is_perp() {
            base.union(Capabilities::FUNDING_RATE)
                .union(Capabilities::BATCH_PLACE)
                .union(Capabilities::POSITIONS)
                .union(Capabilities::LEVERAGE)
        } else {
            base
        }
    }

    #[instrument(skip(self), name = "binance::connectivity_check")]
    async fn connectivity_check(&self) -> Result<bool, CoreError> {
        let path = match self.variant {
            MarketVariant::Spot => "/api/v3/ping",
            MarketVariant::UsdtPerp => "/fapi/v1/ping",
            MarketVariant::CoinPerp => "/dapi/v1/ping",
        };
        self.rest.execute(Method::GET, path, None, None, vec![]).await?;
        Ok(true)
    }

    async fn server_time(&self) -> Result<i64, CoreError> {
        let path = match self.variant {
            MarketVariant::Spot => "/api/v3/time",
            MarketVariant::UsdtPerp => "/fapi/v1/time",
            MarketVariant::CoinPerp => "/dapi/v1/time",
        };
        let resp = self.rest.execute(Method::GET, path, None, None, vec![]).await?;
        resp.body
            .get("serverTime")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| CoreError::Protocol("missing serverTime".into()))
    }

    #[instrument(skip(self), name = "binance::depth")]
    async fn depth(&self, symbol: &str, depth_n: u32) -> Result<BookSnapshot, CoreError> {
        let path = match self.variant {
            MarketVariant::Spot => "/api/v3/depth",
            MarketVariant::UsdtPerp => "/fapi/v1/depth",
            MarketVariant::CoinPerp => "/dapi/v1/depth",
        };
        let query = format!("symbol={symbol}&limit={depth_n}");
        let resp = self.rest.execute(Method::GET, path, Some(&query), None, vec![]).await?;

        let parse_side = |arr: &serde_json::Value| -> Result<Vec<(f64, f64)>, CoreError> {
            arr.as_array()
                .ok_or_else(|| CoreError::Protocol("depth side is not an array".into()))?
                .iter()
                .map(|lvl| {
                    let p = Self::parse_str_f64(&lvl[0])?;
                    let q = Self::parse_str_f64(&lvl[1])?;
                    Ok((p, q))
                })
                .collect()
        };

        let bids = parse_side(&resp.body["bids"])?;
        let asks = parse_side(&resp.body["asks"])?;

        Ok(BookSnapshot::new(symbol, Signer::timestamp_ms(), format!("top{depth_n}"), bids, asks))
    }

    #[instrument(skip(self), name = "binance::recent_trades")]
    async fn recent_trades(&self, symbol: &str, n: u32) -> Result<Vec<Trade>, CoreError> {
        let path = match self.variant {
            MarketVariant::Spot => "/api/v3/trades",
            MarketVariant::UsdtPerp => "/fapi/v1/trades",
            MarketVariant::CoinPerp => "/dapi/v1/trades",
        };
        let query = format!("symbol={symbol}&limit={n}");
        let resp = self.rest.execute(Method::GET, path, Some(&query), None, vec![]).await?;

        let raw = resp.body.as_array().ok_or_else(|| CoreError::Protocol("trades response is not an array".into()))?;
        let mut trades = Vec::with_capacity(raw.len());
        for entry in raw {
            let price = Self::parse_str_f64(&entry["price"])?;
            let qty = Self::parse_str_f64(&entry["qty"])?;
            let maker_buy = entry["isBuyerMaker"].as_bool().unwrap_or(false);
            trades.push(Trade {
                symbol: symbol.to_string(),
                trade_id: entry["id"].as_u64().unwrap_or(0),
                ts: entry["time"].as_i64().unwrap_or(0),
                price,
                qty,
                side: if maker_buy { TradeSide::Sell } else { TradeSide::Buy },
            });
        }
        Ok(trades)
    }

    #[instrument(skip(self), name = "binance::klines")]
    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        start: Option<i64>,
        end: Option<i64>,
        n: u32,
    ) -> Result<Vec<Kline>, CoreError> {
        let path = match self.variant {
            MarketVariant::Spot => "/api/v3/klines",
            MarketVariant::UsdtPerp => "/fapi/v1/klines",
            MarketVariant::CoinPerp => "/dapi/v1/klines",
        };
        let mut query = format!("symbol={symbol}&interval={interval}&limit={n}");
        if let Some(s) = start {
            query.push_str(&format!("&startTime={s}"));
        }
        if let Some(e) = end {
            query.push_str(&format!("&endTime={e}"));
        }

        let resp = self.rest.execute(Method::GET, path, Some(&query), None, vec![]).await?;
        let raw = resp.body.as_array().ok_or_else(|| CoreError::Protocol("klines response is not an array".into()))?;

        let mut out = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = entry.as_array().ok_or_else(|| CoreError::Protocol("kline entry is not an array".into()))?;
            if arr.len() < 7 {
                continue;
            }
            out.push(Kline {
                symbol: symbol.to_string(),
                interval: interval.to_string(),
                open_ts: arr[0].as_i64().unwrap_or(0),
                o: Self::parse_str_f64(&arr[1])?,
                h: Self::parse_str_f64(&arr[2])?,
                l: Self::parse_str_f64(&arr[3])?,
                c: Self::parse_str_f64(&arr[4])?,
                v: Self::parse_str_f64(&arr[5])?,
                is_closed: true,
            });
        }
        debug!(symbol, interval, count = out.len(), "klines fetched");
        Ok(out)
    }

    async fn ticker_24h(&self, symbol: Option<&str>) -> Result<serde_json::Value, CoreError> {
        let path = match self.variant {
            MarketVariant::Spot => "/api/v3/ticker/24hr",
            MarketVariant::UsdtPerp => "/fapi/v1/ticker/24hr",
            MarketVariant::CoinPerp => "/dapi/v1/ticker/24hr",
        };
        let query = symbol.map(|s| format!("symbol={s}"));
        let resp = self.rest.execute(Method::GET, path, query.as_deref(), None, vec![]).await?;
        Ok(resp.body)
    }

    async fn funding_rate(&self, symbol: &str, n: u32) -> Result<Vec<FundingRate>, CoreError> {
        if !self.capabilities().has(Capabilities::FUNDING_RATE) {
            return Err(CoreError::CapabilityUnsupported);
        }
        let path = match self.variant {
            MarketVariant::UsdtPerp => "/fapi/v1/fundingRate",
            MarketVariant::CoinPerp => "/dapi/v1/fundingRate",
            MarketVariant::Spot => return Err(CoreError::CapabilityUnsupported),
        };
        let query = format!("symbol={symbol}&limit={n}");
        let resp = self.rest.execute(Method::GET, path, Some(&query), None, vec![]).await?;
        let raw = resp.body.as_array().ok_or_else(|| CoreError::Protocol("fundingRate response is not an array".into()))?;

        let mut out = Vec::with_capacity(raw.len());
        for entry in raw {
            out.push(FundingRate {
                symbol: symbol.to_string(),
                ts: entry["fundingTime"].as_i64().unwrap_or(0),
                current: Self::parse_str_f64(&entry["fundingRate"])?,
                next_predicted: None,
                funding_time: entry["fundingTime"].as_i64().unwrap_or(0),
                next_funding_time: 0,
                method: "standard".to_string(),
                settle_state: crate::market_frame::SettleState::Settled,
            });
        }
        Ok(out)
    }

    #[instrument(skip(self, account, req), name = "binance::place_order")]
    async fn place_order(&self, account: &Account, req: &PlaceOrderRequest) -> Result<OrderReport, CoreError> {
        if !self.rate_limit.can_place_order() {
            return Err(CoreError::Venue { code: -1015, msg: "too many new orders".into() });
        }

        let mut params = vec![
            ("symbol", req.symbol.clone()),
            ("side", req.side.to_string()),
            ("type", Self::order_type_str(req.order_type).to_string()),
            ("quantity", req.qty.to_string()),
            ("newClientOrderId", req.client_order_id.clone()),
        ];
        if let Some(p) = req.price {
            params.push(("price", p.to_string()));
        }
        if let Some(tif) = req.tif {
            params.push(("timeInForce", Self::tif_str(tif).to_string()));
        }
        if self.variant.is_perp() && req.pos_side != PosSide::Net {
            params.push(("positionSide", format!("{:?}", req.pos_side).to_uppercase()));
        }

        self.rate_limit.record_order_sent();
        let path = self.order_path().to_string();
        let body = self.signed_request(account, Method::POST, &path, params).await?;
        Ok(Self::report_from_order_response(&body, "", &req.client_order_id))
    }

    async fn batch_place(&self, account: &Account, orders: &[PlaceOrderRequest]) -> Result<Vec<OrderReport>, CoreError> {
        if !self.capabilities().has(Capabilities::BATCH_PLACE) {
            return Err(CoreError::CapabilityUnsupported);
        }
        let path = match self.variant {
            MarketVariant::UsdtPerp => "/fapi/v1/batchOrders",
            MarketVariant::CoinPerp => "/dapi/v1/batchOrders",
            MarketVariant::Spot => return Err(CoreError::CapabilityUnsupported),
        };

        let batch: Vec<serde_json::Value> = orders
            .iter()
            .map(|req| {
                let mut o = serde_json::json!({
                    "symbol": req.symbol,
                    "side": req.side.to_string(),
                    "type": Self::order_type_str(req.order_type),
                    "quantity": req.qty.to_string(),
                    "newClientOrderId": req.client_order_id,
                });
                if let Some(p) = req.price {
                    o["price"] = serde_json::Value::String(p.to_string());
                }
                if let Some(tif) = req.tif {
                    o["timeInForce"] = serde_json::Value::String(Self::tif_str(tif).to_string());
                }
                if req.pos_side != PosSide::Net {
                    o["positionSide"] = serde_json::Value::String(format!("{:?}", req.pos_side).to_uppercase());
                }
                o
            })
            .collect();

        let params = vec![("batchOrders", serde_json::Value::Array(batch).to_string())];
        let body = self.signed_request(account, Method::POST, path, params).await?;
        let raw = body.as_array().ok_or_else(|| CoreError::Protocol("batchOrders response is not an array".into()))?;

        Ok(raw
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let client_order_id = orders.get(i).map(|o| o.client_order_id.as_str()).unwrap_or("");
                Self::report_from_order_response(entry, "", client_order_id)
            })
            .collect())
    }

    async fn cancel_order(&self, account: &Account, symbol: &str, target: CancelTarget) -> Result<OrderReport, CoreError> {
        let mut params = vec![("symbol", symbol.to_string())];
        let client_order_id = match &target {
            CancelTarget::ClientOrderId(id) => {
                params.push(("origClientOrderId", id.clone()));
                Some(id.clone())
            }
            CancelTarget::VenueOrderId(id) => {
                params.push(("orderId", id.clone()));
                None
            }
        };

        let path = self.order_path().to_string();
        let body = self.signed_request(account, Method::DELETE, &path, params).await?;
        Ok(Self::report_from_order_response(&body, "", client_order_id.as_deref().unwrap_or("")))
    }

    async fn cancel_all(&self, account: &Account, symbol: Option<&str>) -> Result<OrderReport, CoreError> {
        let symbol = symbol.ok_or_else(|| CoreError::Protocol("cancel_all requires a symbol on binance".into()))?;
        let path = match self.variant {
            MarketVariant::Spot => "/api/v3/openOrders".to_string(),
            MarketVariant::UsdtPerp => "/fapi/v1/allOpenOrders".to_string(),
            MarketVariant::CoinPerp => "/dapi/v1/allOpenOrders".to_string(),
        };
        let params = vec![("symbol", symbol.to_string())];
        let body = self.signed_request(account, Method::DELETE, &path, params).await?;
        Ok(OrderReport {
            report_type: ReportType::CancelResult,
            strategy_id: String::new(),
            client_order_id: None,
            venue_order_id: None,
            status: OrderState::Cancelled,
            filled_qty: 0.0,
            avg_fill_price: 0.0,
            fee: None,
            error_code: None,
            error_msg: Some(body.to_string()),
            ts: Signer::timestamp_ms(),
        })
    }

    async fn query_order(&self, account: &Account, symbol: &str, target: CancelTarget) -> Result<Order, CoreError> {
        let mut params = vec![("symbol", symbol.to_string())];
        match &target {
            CancelTarget::ClientOrderId(id) => params.push(("origClientOrderId", id.clone())),
            CancelTarget::VenueOrderId(id) => params.push(("orderId", id.clone())),
        }
        let path = self.order_path().to_string();
        let body = self.signed_request(account, Method::GET, &path, params).await?;

        let status_raw = body.get("status").and_then(|s| s.as_str()).unwrap_or("NEW");
        let state = match status_raw {
            "NEW" => OrderState::Accepted,
            "PARTIALLY_FILLED" => OrderState::Partial,
            "FILLED" => OrderState::Filled,
            "CANCELED" | "CANCELLED" | "EXPIRED" => OrderState::Cancelled,
            "REJECTED" => OrderState::Rejected,
            _ => OrderState::Submitted,
        };

        Ok(Order {
            client_order_id: body.get("clientOrderId").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            venue_order_id: body.get("orderId").map(|v| v.to_string()),
            strategy_id: String::new(),
            symbol: symbol.to_string(),
            side: if body.get("side").and_then(|v| v.as_str()) == Some("SELL") { Side::Sell } else { Side::Buy },
            order_type: crate::types::OrderType::Market,
            tif: None,
            qty: Self::parse_str_f64(&body["origQty"]).unwrap_or(0.0),
            price: Self::parse_str_f64(&body["price"]).ok(),
            pos_side: PosSide::Net,
            state,
        })
    }

    async fn open_orders(&self, account: &Account, symbol: Option<&str>) -> Result<Vec<Order>, CoreError> {
        let params = match symbol {
            Some(s) => vec![("symbol", s.to_string())],
            None => vec![],
        };
        let path = self.open_orders_path().to_string();
        let body = self.signed_request(account, Method::GET, &path, params).await?;
        let raw = body.as_array().ok_or_else(|| CoreError::Protocol("openOrders response is not an array".into()))?;

        let mut out = Vec::with_capacity(raw.len());
        for entry in raw {
            out.push(Order {
                client_order_id: entry.get("clientOrderId").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                venue_order_id: entry.get("orderId").map(|v| v.to_string()),
                strategy_id: String::new(),
                symbol: entry.get("symbol").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                side: if entry.get("side").and_then(|v| v.as_str()) == Some("SELL") { Side::Sell } else { Side::Buy },
                order_type: crate::types::OrderType::Limit,
                tif: None,
                qty: Self::parse_str_f64(&entry["origQty"]).unwrap_or(0.0),
                price: Self::parse_str_f64(&entry["price"]).ok(),
                pos_side: PosSide::Net,
                state: OrderState::Accepted,
            });
        }
        Ok(out)
    }

    async fn all_orders(&self, account: &Account, symbol: &str, n: u32) -> Result<Vec<Order>, CoreError> {
        let path = match self.variant {
            MarketVariant::Spot => "/api/v3/allOrders",
            MarketVariant::UsdtPerp => "/fapi/v1/allOrders",
            MarketVariant::CoinPerp => "/dapi/v1/allOrders",
        };
        let params = vec![("symbol", symbol.to_string()), ("limit", n.to_string())];
        let body = self.signed_request(account, Method::GET, path, params).await?;
        let raw = body.as_array().ok_or_else(|| CoreError::Protocol("allOrders response is not an array".into()))?;

        let mut out = Vec::with_capacity(raw.len());
        for entry in raw {
            let status_raw = entry.get("status").and_then(|s| s.as_str()).unwrap_or("NEW");
            let state = match status_raw {
                "NEW" => OrderState::Accepted,
                "PARTIALLY_FILLED" => OrderState::Partial,
                "FILLED" => OrderState::Filled,
                "CANCELED" | "CANCELLED" | "EXPIRED" => OrderState::Cancelled,
                "REJECTED" => OrderState::Rejected,
                _ => OrderState::Submitted,
            };
            out.push(Order {
                client_order_id: entry.get("clientOrderId").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                venue_order_id: entry.get("orderId").map(|v| v.to_string()),
                strategy_id: String::new(),
                symbol: symbol.to_string(),
                side: if entry.get("side").and_then(|v| v.as_str()) == Some("SELL") { Side::Sell } else { Side::Buy },
                order_type: crate::types::OrderType::Limit,
                tif: None,
                qty: Self::parse_str_f64(&entry["origQty"]).unwrap_or(0.0),
                price: Self::parse_str_f64(&entry["price"]).ok(),
                pos_side: PosSide::Net,
                state,
            });
        }
        Ok(out)
    }

    async fn set_margin_mode(&self, account: &Account, symbol: &str, cross: bool) -> Result<(), CoreError> {
        let path = match self.variant {
            MarketVariant::UsdtPerp => "/fapi/v1/marginType",
            MarketVariant::CoinPerp => "/dapi/v1/marginType",
            MarketVariant::Spot => return Err(CoreError::CapabilityUnsupported),
        };
        let margin_type = if cross { "CROSSED" } else { "ISOLATED" };
        let params = vec![("symbol", symbol.to_string()), ("marginType", margin_type.to_string())];
        self.signed_request(account, Method::POST, path, params).await?;
        Ok(())
    }

    async fn set_position_mode(&self, account: &Account, hedge: bool) -> Result<(), CoreError> {
        let path = match self.variant {
            MarketVariant::UsdtPerp => "/fapi/v1/positionSide/dual",
            MarketVariant::CoinPerp => "/dapi/v1/positionSide/dual",
            MarketVariant::Spot => return Err(CoreError::CapabilityUnsupported),
        };
        let params = vec![("dualSidePosition", hedge.to_string())];
        self.signed_request(account, Method::POST, path, params).await?;
        Ok(())
    }

    async fn account_info(&self, account: &Account) -> Result<serde_json::Value, CoreError> {
        let path = self.account_path().to_string();
        self.signed_request(account, Method::GET, &path, vec![]).await
    }

    async fn balances(&self, account: &Account) -> Result<Vec<BalanceInfo>, CoreError> {
        let info = self.account_info(account).await?;
        let balances = info
            .get("balances")
            .or_else(|| info.get("assets"))
            .and_then(|v| v.as_array())
            .ok_or_else(|| CoreError::Protocol("account response missing balances".into()))?;

        let mut out = Vec::with_capacity(balances.len());
        for b in balances {
            out.push(BalanceInfo {
                asset: b.get("asset").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                free: Self::parse_str_f64(&b["free"]).or_else(|_| Self::parse_str_f64(&b["availableBalance"])).unwrap_or(0.0),
                locked: Self::parse_str_f64(&b["locked"]).unwrap_or(0.0),
            });
        }
        Ok(out)
    }

    async fn positions(&self, account: &Account) -> Result<serde_json::Value, CoreError> {
        if !self.capabilities().has(Capabilities::POSITIONS) {
            return Err(CoreError::CapabilityUnsupported);
        }
        let path = match self.variant {
            MarketVariant::UsdtPerp => "/fapi/v2/positionRisk",
            MarketVariant::CoinPerp => "/dapi/v1/positionRisk",
            MarketVariant::Spot => return Err(CoreError::CapabilityUnsupported),
        };
        self.signed_request(account, Method::GET, path, vec![]).await
    }

    async fn set_leverage(&self, account: &Account, symbol: &str, leverage: u32) -> Result<(), CoreError> {
        if !self.capabilities().has(Capabilities::LEVERAGE) {
            return Err(CoreError::CapabilityUnsupported);
        }
        let path = match self.variant {
            MarketVariant::UsdtPerp => "/fapi/v1/leverage",
            MarketVariant::CoinPerp => "/dapi/v1/leverage",
            MarketVariant::Spot => return Err(CoreError::CapabilityUnsupported),
        };
        let params = vec![("symbol", symbol.to_string()), ("leverage", leverage.to_string())];
        self.signed_request(account, Method::POST, path, params).await?;
        Ok(())
    }

    async fn create_listen_key(&self, account: &Account) -> Result<String, CoreError> {
        let path = self.listen_key_path();
        let resp = self
            .rest
            .execute(Method::POST, path, None, None, vec![("X-MBX-APIKEY", account.credentials.api_key.clone())])
            .await?;
        resp.body
            .get("listenKey")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| CoreError::Protocol("missing listenKey".into()))
    }

    async fn keepalive_listen_key(&self, account: &Account, key: &str) -> Result<(), CoreError> {
        let path = self.listen_key_path();
        let query = format!("listenKey={key}");
        self.rest
            .execute(Method::PUT, path, Some(&query), None, vec![("X-MBX-APIKEY", account.credentials.api_key.clone())])
            .await?;
        Ok(())
    }

    fn market_stream_url(&self, _account: &Account) -> String {
        match self.variant {
            MarketVariant::Spot => "wss://stream.binance.com:9443/stream".to_string(),
            MarketVariant::UsdtPerp => "wss://fstream.binance.com/stream".to_string(),
            MarketVariant::CoinPerp => "wss://dstream.binance.com/stream".to_string(),
        }
    }

    fn user_data_stream_url(&self, _account: &Account, listen_key: &str) -> String {
        match self.variant {
            MarketVariant::Spot => format!("wss://stream.binance.com:9443/ws/{listen_key}"),
            MarketVariant::UsdtPerp => format!("wss://fstream.binance.com/ws/{listen_key}"),
            MarketVariant::CoinPerp => format!("wss://dstream.binance.com/ws/{listen_key}"),
        }
    }

    fn parse_market_message(&self, raw: &str) -> Option<MarketFrame> {
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        // Combined streams wrap the payload as {"stream": "...", "data": {...}};
        // raw streams send the payload directly.
        let data = value.get("data").unwrap_or(&value);
        let event = data.get("e").and_then(|v| v.as_str())?;

        match event {
            "kline" => {
                let k = data.get("k")?;
                Some(MarketFrame::Kline(Kline {
                    symbol: k.get("s").and_then(|v| v.as_str())?.to_string(),
                    interval: k.get("i").and_then(|v| v.as_str())?.to_string(),
                    open_ts: k.get("t").and_then(|v| v.as_i64())?,
                    o: Self::parse_str_f64(&k["o"]).ok()?,
                    h: Self::parse_str_f64(&k["h"]).ok()?,
                    l: Self::parse_str_f64(&k["l"]).ok()?,
                    c: Self::parse_str_f64(&k["c"]).ok()?,
                    v: Self::parse_str_f64(&k["v"]).ok()?,
                    is_closed: k.get("x").and_then(|v| v.as_bool()).unwrap_or(false),
                }))
            }
            "trade" | "aggTrade" => {
                let maker_buy = data.get("m").and_then(|v| v.as_bool()).unwrap_or(false);
                Some(MarketFrame::Trade(Trade {
                    symbol: data.get("s").and_then(|v| v.as_str())?.to_string(),
                    trade_id: data.get("t").or_else(|| data.get("a")).and_then(|v| v.as_u64()).unwrap_or(0),
                    ts: data.get("T").and_then(|v| v.as_i64()).unwrap_or(0),
                    price: Self::parse_str_f64(&data["p"]).ok()?,
                    qty: Self::parse_str_f64(&data["q"]).ok()?,
                    side: Trade::side_from_maker_buy(maker_buy),
                }))
            }
            "depthUpdate" => {
                let symbol = data.get("s").and_then(|v| v.as_str())?.to_string();
                let parse_levels = |v: &serde_json::Value| -> Vec<(f64, f64)> {
                    v.as_array()
                        .map(|arr| {
                            arr.iter()
                                .filter_map(|lvl| {
                                    Some((Self::parse_str_f64(&lvl[0]).ok()?, Self::parse_str_f64(&lvl[1]).ok()?))
                                })
                                .collect()
                        })
                        .unwrap_or_default()
                };
                let bids = parse_levels(&data["b"]);
                let asks = parse_levels(&data["a"]);
                let ts = data.get("E").and_then(|v| v.as_i64()).unwrap_or(0);
                Some(MarketFrame::Orderbook(BookSnapshot::new(&symbol, ts, "diff".to_string(), bids, asks)))
            }
            "markPriceUpdate" => {
                Some(MarketFrame::FundingRate(FundingRate {
                    symbol: data.get("s").and_then(|v| v.as_str())?.to_string(),
                    ts: data.get("E").and_then(|v| v.as_i64()).unwrap_or(0),
                    current: Self::parse_str_f64(&data["r"]).ok()?,
                    next_predicted: None,
                    funding_time: data.get("T").and_then(|v| v.as_i64()).unwrap_or(0),
                    next_funding_time: 0,
                    method: "standard".to_string(),
                    settle_state: SettleState::Pending,
                }))
            }
            // subscription acks and other control events carry no market data.
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spot_lacks_perp_only_capabilities() {
        let account = Account {
            venue: Venue::Binance,
            market_variant: MarketVariant::Spot,
            credentials: crate::types::CredentialSet { api_key: "k".into(), secret: "s".into(), passphrase: None },
            is_testnet: true,
            proxy: None,
        };
        let adapter = BinanceAdapter::new(MarketVariant::Spot, &account).unwrap();
        assert!(!adapter.capabilities().has(Capabilities::FUNDING_RATE));
        assert!(!adapter.capabilities().has(Capabilities::POSITIONS));
    }

    #[test]
    fn usdt_perp_has_funding_and_positions() {
        let account = Account {
            venue: Venue::Binance,
            market_variant: MarketVariant::UsdtPerp,
            credentials: crate::types::CredentialSet { api_key: "k".into(), secret: "s".into(), passphrase: None },
            is_testnet: true,
            proxy: None,
        };
        let adapter = BinanceAdapter::new(MarketVariant::UsdtPerp, &account).unwrap();
        assert!(adapter.capabilities().has(Capabilities::FUNDING_RATE));
        assert!(adapter.capabilities().has(Capabilities::POSITIONS));
        assert!(adapter.capabilities().has(Capabilities::BATCH_PLACE));
    }

    #[test]
    fn order_type_mapping_matches_binance_enum_strings() {
        assert_eq!(BinanceAdapter::order_type_str(crate::types::OrderType::Market), "MARKET");
        assert_eq!(BinanceAdapter::order_type_str(crate::types::OrderType::PostOnly), "LIMIT_MAKER");
    }

    fn adapter() -> BinanceAdapter {
        let account = Account {
            venue: Venue::Binance,
            market_variant: MarketVariant::Spot,
            credentials: crate::types::CredentialSet { api_key: "k".into(), secret: "s".into(), passphrase: None },
            is_testnet: true,
            proxy: None,
        };
        BinanceAdapter::new(MarketVariant::Spot, &account).unwrap()
    }

    #[test]
    fn parse_market_message_decodes_combined_stream_kline() {
        let raw = r#"{"stream":"btcusdt@kline_1m","data":{"e":"kline","s":"BTCUSDT","k":{"t":1000,"i":"1m","o":"1","h":"2","l":"0.5","c":"1.5","v":"10","x":true}}}"#;
        match adapter().parse_market_message(raw) {
            Some(MarketFrame::Kline(k)) => {
                assert_eq!(k.symbol, "BTCUSDT");
                assert!(k.is_closed);
            }
            other => panic!("expected kline, got {other:?}"),
        }
    }

    #[test]
    fn parse_market_message_returns_none_for_unknown_event() {
        let raw = r#"{"result":null,"id":1}"#;
        assert!(adapter().parse_market_message(raw).is_none());
    }
}
