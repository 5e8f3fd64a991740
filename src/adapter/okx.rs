// =============================================================================
// OKX Adapter — spot and perpetual swap, passphrase-bearing credentials
// =============================================================================
//
// OKX's signature scheme differs from Binance's in three ways this adapter
// isolates behind the common `ExchangeAdapter` contract (see design note on
// hidden coupling across venues): the signed payload is
// `timestamp + method + request_path + body` rather than a query string, the
// digest is base64 rather than hex, and every signed request additionally
// carries the account's passphrase as a header. This follows OKX's publicly
// documented `OK-ACCESS-*` header convention, layered onto the same
// `RestClient`/`Signer` building blocks the Binance adapter uses.
// =============================================================================

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Method;
use tracing::instrument;

use crate::adapter::{CancelTarget, Capabilities, ExchangeAdapter, PlaceOrderRequest};
use crate::error::CoreError;
use crate::market_frame::{BookSnapshot, FundingRate, Kline, MarketFrame, SettleState, Trade, TradeSide};
use crate::rest_client::RestClient;
use crate::signer::Signer;
use crate::types::{
    Account, BalanceInfo, MarketVariant, Order, OrderReport, OrderState, PosSide, ReportType,
    Side, Venue,
};

pub struct OkxAdapter {
    variant: MarketVariant,
    rest: RestClient,
}

impl OkxAdapter {
    pub fn new(variant: MarketVariant, account: &Account) -> anyhow::Result<Self> {
        if account.credentials.passphrase.is_none() {
            anyhow::bail!("okx account is missing a passphrase");
        }
        Ok(Self {
            variant,
            rest: RestClient::new("https://www.okx.com", account.proxy.as_deref())?,
        })
    }

    fn inst_type(&self) -> &'static str {
        match self.variant {
            MarketVariant::Spot => "SPOT",
            MarketVariant::UsdtPerp | MarketVariant::CoinPerp => "SWAP",
        }
    }

    fn td_mode(&self) -> &'static str {
        match self.variant {
            MarketVariant::Spot => "cash",
            MarketVariant::UsdtPerp | MarketVariant::CoinPerp => "cross",
        }
    }

    async fn signed_request(
        &self,
        account: &Account,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, CoreError> {
        let passphrase = account
            .credentials
            .passphrase
            .as_ref()
            .ok_or_else(|| CoreError::CredentialIncomplete { venue: "okx".into(), field: "passphrase" })?;

        let timestamp = chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let body_str = body.as_ref().map(|b| b.to_string()).unwrap_or_default();
        let payload = format!("{timestamp}{}{path}{body_str}", method.as_str());

        let signer = Signer::new(account.credentials.secret.clone());
        let sign = signer.sign_payload_base64(&payload);

        let mut headers = vec![
            ("OK-ACCESS-KEY", account.credentials.api_key.clone()),
            ("OK-ACCESS-SIGN", sign),
            ("OK-ACCESS-TIMESTAMP", timestamp),
            ("OK-ACCESS-PASSPHRASE", passphrase.clone()),
        ];
        if account.is_testnet {
            headers.push(("x-simulated-trading", "1".to_string()));
        }

        let resp = self.rest.execute(method, path, None, Some(body_str).filter(|s| !s.is_empty()), headers).await?;
        Ok(resp.body)
    }

    fn side_str(side: Side) -> &'static str {
        match side {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    fn order_type_str(t: crate::types::OrderType) -> &'static str {
        use crate::types::OrderType::*;
        match t {
            Market => "market",
            PostOnly => "post_only",
            Limit | Stop | StopLimit | TakeProfit | TpLimit => "limit",
        }
    }
}

#[async_trait]
impl ExchangeAdapter for OkxAdapter {
    fn venue(&self) -> Venue {
        Venue::Okx
    }

    fn market_variant(&self) -> MarketVariant {
        self.variant
    }

    fn capabilities(&self) -> Capabilities {
        let base = Capabilities::TRADING_WS;
        if self.variant.is_perp() {
            base.union(Capabilities::FUNDING_RATE)
                .union(Capabilities::POSITIONS)
                .union(Capabilities::LEVERAGE)
        } else {
            base
        }
    }

    #[instrument(skip(self), name = "okx::connectivity_check")]
    async fn connectivity_check(&self) -> Result<bool, CoreError> {
        self.rest.execute(Method::GET, "/api/v5/public/time", None, None, vec![]).await?;
        Ok(true)
    }

    async fn server_time(&self) -> Result<i64, CoreError> {
        let resp = self.rest.execute(Method::GET, "/api/v5/public/time", None, None, vec![]).await?;
        resp.body["data"][0]["ts"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CoreError::Protocol("missing ts".into()))
    }

    async fn depth(&self, symbol: &str, depth_n: u32) -> Result<BookSnapshot, CoreError> {
        let query = format!("instId={symbol}&sz={depth_n}");
        let resp = self.rest.execute(Method::GET, "/api/v5/market/books", Some(&query), None, vec![]).await?;
        let data = &resp.body["data"][0];

        let parse_side = |arr: &serde_json::Value| -> Result<Vec<(f64, f64)>, CoreError> {
            arr.as_array()
                .ok_or_else(|| CoreError::Protocol("book side is not an array".into()))?
                .iter()
                .map(|lvl| {
                    let p: f64 = lvl[0].as_str().unwrap_or("0").parse().map_err(CoreError::from)?;
                    let q: f64 = lvl[1].as_str().unwrap_or("0").parse().map_err(CoreError::from)?;
                    Ok((p, q))
                })
                .collect()
        };

        let bids = parse_side(&data["bids"])?;
        let asks = parse_side(&data["asks"])?;
        Ok(BookSnapshot::new(symbol, Signer::timestamp_ms(), format!("top{depth_n}"), bids, asks))
    }

    async fn recent_trades(&self, symbol: &str, n: u32) -> Result<Vec<Trade>, CoreError> {
        let query = format!("instId={symbol}&limit={n}");
        let resp = self.rest.execute(Method::GET, "/api/v5/market/trades", Some(&query), None, vec![]).await?;
        let raw = resp.body["data"].as_array().cloned().unwrap_or_default();

        let mut out = Vec::with_capacity(raw.len());
        for entry in &raw {
            let price: f64 = entry["px"].as_str().unwrap_or("0").parse().unwrap_or(0.0);
            let qty: f64 = entry["sz"].as_str().unwrap_or("0").parse().unwrap_or(0.0);
            let side = if entry["side"].as_str() == Some("sell") { TradeSide::Sell } else { TradeSide::Buy };
            out.push(Trade {
                symbol: symbol.to_string(),
                trade_id: entry["tradeId"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0),
                ts: entry["ts"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0),
                price,
                qty,
                side,
            });
        }
        Ok(out)
    }

    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        _start: Option<i64>,
        _end: Option<i64>,
        n: u32,
    ) -> Result<Vec<Kline>, CoreError> {
        let query = format!("instId={symbol}&bar={interval}&limit={n}");
        let resp = self.rest.execute(Method::GET, "/api/v5/market/candles", Some(&query), None, vec![]).await?;
        let raw = resp.body["data"].as_array().cloned().unwrap_or_default();

        let mut out = Vec::with_capacity(raw.len());
        for entry in &raw {
            let arr = entry.as_array().ok_or_else(|| CoreError::Protocol("candle entry not an array".into()))?;
            if arr.len() < 6 {
                continue;
            }
            let f = |i: usize| -> Result<f64, CoreError> {
                arr[i].as_str().unwrap_or("0").parse().map_err(CoreError::from)
            };
            out.push(Kline {
                symbol: symbol.to_string(),
                interval: interval.to_string(),
                open_ts: arr[0].as_str().and_then(|s| s.parse().ok()).unwrap_or(0),
                o: f(1)?,
                h: f(2)?,
                l: f(3)?,
                c: f(4)?,
                v: f(5)?,
                is_closed: true,
            });
        }
        Ok(out)
    }

    async fn ticker_24h(&self, symbol: Option<&str>) -> Result<serde_json::Value, CoreError> {
        let query = symbol.map(|s| format!("instId={s}"));
        let resp = self.rest.execute(Method::GET, "/api/v5/market/ticker", query.as_deref(), None, vec![]).await?;
        Ok(resp.body)
    }

    async fn funding_rate(&self, symbol: &str, _n: u32) -> Result<Vec<FundingRate>, CoreError> {
        if !self.capabilities().has(Capabilities::FUNDING_RATE) {
            return Err(CoreError::CapabilityUnsupported);
        }
        let query = format!("instId={symbol}");
        let resp = self.rest.execute(Method::GET, "/api/v5/public/funding-rate", Some(&query), None, vec![]).await?;
        let data = &resp.body["data"][0];

        Ok(vec![FundingRate {
            symbol: symbol.to_string(),
            ts: data["ts"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0),
            current: data["fundingRate"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
            next_predicted: data["nextFundingRate"].as_str().and_then(|s| s.parse().ok()),
            funding_time: data["fundingTime"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0),
            next_funding_time: data["nextFundingTime"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0),
            method: "standard".to_string(),
            settle_state: crate::market_frame::SettleState::Pending,
        }])
    }

    #[instrument(skip(self, account, req), name = "okx::place_order")]
    async fn place_order(&self, account: &Account, req: &PlaceOrderRequest) -> Result<OrderReport, CoreError> {
        let body = serde_json::json!({
            "instId": req.symbol,
            "tdMode": self.td_mode(),
            "side": Self::side_str(req.side),
            "ordType": Self::order_type_str(req.order_type),
            "sz": req.qty.to_string(),
            "px": req.price.map(|p| p.to_string()),
            "clOrdId": req.client_order_id,
            "posSide": if req.pos_side == PosSide::Net { serde_json::Value::Null } else {
                serde_json::Value::String(format!("{:?}", req.pos_side).to_lowercase())
            },
        });

        let resp = self.signed_request(account, Method::POST, "/api/v5/trade/order", Some(body)).await?;
        let data = resp["data"][0].clone();
        let s_code = data["sCode"].as_str().unwrap_or("0");

        let status = if s_code == "0" { OrderState::Accepted } else { OrderState::Rejected };

        Ok(OrderReport {
            report_type: ReportType::OrderUpdate,
            strategy_id: String::new(),
            client_order_id: Some(req.client_order_id.clone()),
            venue_order_id: data["ordId"].as_str().map(|s| s.to_string()),
            status,
            filled_qty: 0.0,
            avg_fill_price: 0.0,
            fee: None,
            error_code: if s_code != "0" { Some("VENUE".to_string()) } else { None },
            error_msg: data["sMsg"].as_str().map(|s| s.to_string()),
            ts: Signer::timestamp_ms(),
        })
    }

    async fn cancel_order(&self, account: &Account, symbol: &str, target: CancelTarget) -> Result<OrderReport, CoreError> {
        let mut body = serde_json::json!({ "instId": symbol });
        let client_order_id = match &target {
            CancelTarget::ClientOrderId(id) => {
                body["clOrdId"] = serde_json::Value::String(id.clone());
                Some(id.clone())
            }
            CancelTarget::VenueOrderId(id) => {
                body["ordId"] = serde_json::Value::String(id.clone());
                None
            }
        };

        let resp = self.signed_request(account, Method::POST, "/api/v5/trade/cancel-order", Some(body)).await?;
        let data = resp["data"][0].clone();

        Ok(OrderReport {
            report_type: ReportType::CancelResult,
            strategy_id: String::new(),
            client_order_id,
            venue_order_id: data["ordId"].as_str().map(|s| s.to_string()),
            status: OrderState::Cancelled,
            filled_qty: 0.0,
            avg_fill_price: 0.0,
            fee: None,
            error_code: None,
            error_msg: None,
            ts: Signer::timestamp_ms(),
        })
    }

    async fn cancel_all(&self, account: &Account, symbol: Option<&str>) -> Result<OrderReport, CoreError> {
        let symbol = symbol.ok_or_else(|| CoreError::Protocol("cancel_all requires a symbol on okx".into()))?;
        let open = self.open_orders(account, Some(symbol)).await?;
        if open.is_empty() {
            return Ok(OrderReport {
                report_type: ReportType::CancelResult,
                strategy_id: String::new(),
                client_order_id: None,
                venue_order_id: None,
                status: OrderState::Cancelled,
                filled_qty: 0.0,
                avg_fill_price: 0.0,
                fee: None,
                error_code: None,
                error_msg: Some("no open orders".into()),
                ts: Signer::timestamp_ms(),
            });
        }

        let body: Vec<serde_json::Value> = open
            .iter()
            .map(|o| serde_json::json!({ "instId": symbol, "ordId": o.venue_order_id }))
            .collect();
        let resp = self
            .signed_request(account, Method::POST, "/api/v5/trade/cancel-batch-orders", Some(serde_json::Value::Array(body)))
            .await?;
        let failures = resp["data"]
            .as_array()
            .map(|arr| arr.iter().filter(|d| d["sCode"].as_str() != Some("0")).count())
            .unwrap_or(0);

        Ok(OrderReport {
            report_type: ReportType::CancelResult,
            strategy_id: String::new(),
            client_order_id: None,
            venue_order_id: None,
            status: if failures == 0 { OrderState::Cancelled } else { OrderState::Failed },
            filled_qty: 0.0,
            avg_fill_price: 0.0,
            fee: None,
            error_code: if failures > 0 { Some("VENUE".to_string()) } else { None },
            error_msg: Some(format!("{} orders cancelled, {} failed", open.len() - failures, failures)),
            ts: Signer::timestamp_ms(),
        })
    }

    async fn query_order(&self, account: &Account, symbol: &str, target: CancelTarget) -> Result<Order, CoreError> {
        let query = match &target {
            CancelTarget::ClientOrderId(id) => format!("instId={symbol}&clOrdId={id}"),
            CancelTarget::VenueOrderId(id) => format!("instId={symbol}&ordId={id}"),
        };
        let path = format!("/api/v5/trade/order?{query}");
        let body = self.signed_request(account, Method::GET, &path, None).await?;
        let data = &body["data"][0];

        let state_raw = data["state"].as_str().unwrap_or("live");
        let state = match state_raw {
            "live" => OrderState::Accepted,
            "partially_filled" => OrderState::Partial,
            "filled" => OrderState::Filled,
            "canceled" => OrderState::Cancelled,
            _ => OrderState::Submitted,
        };

        Ok(Order {
            client_order_id: data["clOrdId"].as_str().unwrap_or("").to_string(),
            venue_order_id: data["ordId"].as_str().map(|s| s.to_string()),
            strategy_id: String::new(),
            symbol: symbol.to_string(),
            side: if data["side"].as_str() == Some("sell") { Side::Sell } else { Side::Buy },
            order_type: crate::types::OrderType::Market,
            tif: None,
            qty: data["sz"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
            price: data["px"].as_str().and_then(|s| s.parse().ok()),
            pos_side: PosSide::Net,
            state,
        })
    }

    async fn open_orders(&self, account: &Account, symbol: Option<&str>) -> Result<Vec<Order>, CoreError> {
        let path = match symbol {
            Some(s) => format!("/api/v5/trade/orders-pending?instId={s}"),
            None => "/api/v5/trade/orders-pending".to_string(),
        };
        let body = self.signed_request(account, Method::GET, &path, None).await?;
        let raw = body["data"].as_array().cloned().unwrap_or_default();

        let mut out = Vec::with_capacity(raw.len());
        for entry in &raw {
            out.push(Order {
                client_order_id: entry["clOrdId"].as_str().unwrap_or("").to_string(),
                venue_order_id: entry["ordId"].as_str().map(|s| s.to_string()),
                strategy_id: String::new(),
                symbol: entry["instId"].as_str().unwrap_or("").to_string(),
                side: if entry["side"].as_str() == Some("sell") { Side::Sell } else { Side::Buy },
                order_type: crate::types::OrderType::Limit,
                tif: None,
                qty: entry["sz"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
                price: entry["px"].as_str().and_then(|s| s.parse().ok()),
                pos_side: PosSide::Net,
                state: OrderState::Accepted,
            });
        }
        Ok(out)
    }

    async fn all_orders(&self, account: &Account, symbol: &str, n: u32) -> Result<Vec<Order>, CoreError> {
        let path = format!("/api/v5/trade/orders-history?instId={symbol}&instType={}&limit={n}", self.inst_type());
        let body = self.signed_request(account, Method::GET, &path, None).await?;
        let raw = body["data"].as_array().cloned().unwrap_or_default();

        let mut out = Vec::with_capacity(raw.len());
        for entry in &raw {
            let state_raw = entry["state"].as_str().unwrap_or("live");
            let state = match state_raw {
                "live" => OrderState::Accepted,
                "partially_filled" => OrderState::Partial,
                "filled" => OrderState::Filled,
                "canceled" => OrderState::Cancelled,
                _ => OrderState::Submitted,
            };
            out.push(Order {
                client_order_id: entry["clOrdId"].as_str().unwrap_or("").to_string(),
                venue_order_id: entry["ordId"].as_str().map(|s| s.to_string()),
                strategy_id: String::new(),
                symbol: entry["instId"].as_str().unwrap_or("").to_string(),
                side: if entry["side"].as_str() == Some("sell") { Side::Sell } else { Side::Buy },
                order_type: crate::types::OrderType::Limit,
                tif: None,
                qty: entry["sz"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
                price: entry["px"].as_str().and_then(|s| s.parse().ok()),
                pos_side: PosSide::Net,
                state,
            });
        }
        Ok(out)
    }

    async fn account_info(&self, account: &Account) -> Result<serde_json::Value, CoreError> {
        self.signed_request(account, Method::GET, "/api/v5/account/config", None).await
    }

    async fn balances(&self, account: &Account) -> Result<Vec<BalanceInfo>, CoreError> {
        let resp = self.signed_request(account, Method::GET, "/api/v5/account/balance", None).await?;
        let details = resp["data"][0]["details"].as_array().cloned().unwrap_or_default();

        let mut out = Vec::with_capacity(details.len());
        for d in &details {
            out.push(BalanceInfo {
                asset: d["ccy"].as_str().unwrap_or("").to_string(),
                free: d["availBal"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
                locked: d["frozenBal"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
            });
        }
        Ok(out)
    }

    async fn positions(&self, account: &Account) -> Result<serde_json::Value, CoreError> {
        if !self.capabilities().has(Capabilities::POSITIONS) {
            return Err(CoreError::CapabilityUnsupported);
        }
        self.signed_request(account, Method::GET, "/api/v5/account/positions", None).await
    }

    async fn set_leverage(&self, account: &Account, symbol: &str, leverage: u32) -> Result<(), CoreError> {
        if !self.capabilities().has(Capabilities::LEVERAGE) {
            return Err(CoreError::CapabilityUnsupported);
        }
        let body = serde_json::json!({
            "instId": symbol,
            "lever": leverage.to_string(),
            "mgnMode": self.td_mode(),
        });
        self.signed_request(account, Method::POST, "/api/v5/account/set-leverage", Some(body)).await?;
        Ok(())
    }

    async fn set_margin_mode(&self, account: &Account, symbol: &str, cross: bool) -> Result<(), CoreError> {
        if !self.variant.is_perp() {
            return Err(CoreError::CapabilityUnsupported);
        }
        let body = serde_json::json!({
            "instId": symbol,
            "lever": "1",
            "mgnMode": if cross { "cross" } else { "isolated" },
        });
        self.signed_request(account, Method::POST, "/api/v5/account/set-leverage", Some(body)).await?;
        Ok(())
    }

    async fn set_position_mode(&self, account: &Account, hedge: bool) -> Result<(), CoreError> {
        if !self.variant.is_perp() {
            return Err(CoreError::CapabilityUnsupported);
        }
        let body = serde_json::json!({
            "posMode": if hedge { "long_short_mode" } else { "net_mode" },
        });
        self.signed_request(account, Method::POST, "/api/v5/account/set-position-mode", Some(body)).await?;
        Ok(())
    }

    async fn create_listen_key(&self, _account: &Account) -> Result<String, CoreError> {
        // OKX's private WS channel authenticates per-connection (login op)
        // rather than issuing a listen key; callers treat the empty key as
        // "authenticate on connect" and never pass it back to this method.
        Ok(String::new())
    }

    async fn keepalive_listen_key(&self, _account: &Account, _key: &str) -> Result<(), CoreError> {
        Ok(())
    }

    fn market_stream_url(&self, account: &Account) -> String {
        if account.is_testnet {
            "wss://wspap.okx.com:8443/ws/v5/public".to_string()
        } else {
            "wss://ws.okx.com:8443/ws/v5/public".to_string()
        }
    }

    fn user_data_stream_url(&self, account: &Account, _listen_key: &str) -> String {
        if account.is_testnet {
            "wss://wspap.okx.com:8443/ws/v5/private".to_string()
        } else {
            "wss://ws.okx.com:8443/ws/v5/private".to_string()
        }
    }

    fn subscribe_frame(&self, channel: &str, symbol: &str, interval: Option<&str>, _id: u64) -> Result<String, CoreError> {
        let channel = match interval {
            Some(iv) => format!("{channel}{iv}"),
            None => channel.to_string(),
        };
        let frame = serde_json::json!({
            "op": "subscribe",
            "args": [{ "channel": channel, "instId": symbol }],
        });
        serde_json::to_string(&frame).map_err(CoreError::from)
    }

    fn unsubscribe_frame(&self, channel: &str, symbol: &str, interval: Option<&str>, _id: u64) -> Result<String, CoreError> {
        let channel = match interval {
            Some(iv) => format!("{channel}{iv}"),
            None => channel.to_string(),
        };
        let frame = serde_json::json!({
            "op": "unsubscribe",
            "args": [{ "channel": channel, "instId": symbol }],
        });
        serde_json::to_string(&frame).map_err(CoreError::from)
    }

    fn parse_market_message(&self, raw: &str) -> Option<MarketFrame> {
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        // Login/subscribe acks and errors carry an "event" field and no "arg"/"data".
        if value.get("event").is_some() {
            return None;
        }

        let channel = value.get("arg")?.get("channel").and_then(|v| v.as_str())?;
        let inst_id = value.get("arg")?.get("instId").and_then(|v| v.as_str()).unwrap_or("");
        let entry = value.get("data")?.as_array()?.first()?;

        if let Some(bar) = channel.strip_prefix("candle") {
            let arr = entry.as_array()?;
            if arr.len() < 6 {
                return None;
            }
            let f = |i: usize| -> Option<f64> { arr[i].as_str()?.parse().ok() };
            return Some(MarketFrame::Kline(Kline {
                symbol: inst_id.to_string(),
                interval: bar.to_string(),
                open_ts: arr[0].as_str()?.parse().ok()?,
                o: f(1)?,
                h: f(2)?,
                l: f(3)?,
                c: f(4)?,
                v: f(5)?,
                is_closed: arr.get(8).and_then(|v| v.as_str()) == Some("1"),
            }));
        }

        match channel {
            "trades" => {
                let price: f64 = entry["px"].as_str()?.parse().ok()?;
                let qty: f64 = entry["sz"].as_str()?.parse().ok()?;
                let side = if entry["side"].as_str() == Some("sell") { TradeSide::Sell } else { TradeSide::Buy };
                Some(MarketFrame::Trade(Trade {
                    symbol: inst_id.to_string(),
                    trade_id: entry["tradeId"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0),
                    ts: entry["ts"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0),
                    price,
                    qty,
                    side,
                }))
            }
            c if c.starts_with("books") => {
                let parse_side = |v: &serde_json::Value| -> Vec<(f64, f64)> {
                    v.as_array()
                        .map(|arr| {
                            arr.iter()
                                .filter_map(|lvl| {
                                    Some((lvl[0].as_str()?.parse().ok()?, lvl[1].as_str()?.parse().ok()?))
                                })
                                .collect()
                        })
                        .unwrap_or_default()
                };
                let bids = parse_side(&entry["bids"]);
                let asks = parse_side(&entry["asks"]);
                let ts = entry["ts"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0);
                Some(MarketFrame::Orderbook(BookSnapshot::new(inst_id, ts, channel.to_string(), bids, asks)))
            }
            "funding-rate" => Some(MarketFrame::FundingRate(FundingRate {
                symbol: inst_id.to_string(),
                ts: entry["ts"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0),
                current: entry["fundingRate"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0),
                next_predicted: entry["nextFundingRate"].as_str().and_then(|s| s.parse().ok()),
                funding_time: entry["fundingTime"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0),
                next_funding_time: entry["nextFundingTime"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0),
                method: "standard".to_string(),
                settle_state: SettleState::Pending,
            })),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn okx_account() -> Account {
        Account {
            venue: Venue::Okx,
            market_variant: MarketVariant::Spot,
            credentials: crate::types::CredentialSet {
                api_key: "k".into(),
                secret: "s".into(),
                passphrase: Some("pw".into()),
            },
            is_testnet: true,
            proxy: None,
        }
    }

    #[test]
    fn okx_adapter_requires_passphrase() {
        let mut account = okx_account();
        account.credentials.passphrase = None;
        let result = OkxAdapter::new(MarketVariant::Spot, &account);
        assert!(result.is_err());
    }

    #[test]
    fn okx_adapter_constructs_with_passphrase() {
        let account = okx_account();
        assert!(OkxAdapter::new(MarketVariant::Spot, &account).is_ok());
    }

    #[test]
    fn swap_variant_gains_perp_capabilities() {
        let mut account = okx_account();
        account.market_variant = MarketVariant::UsdtPerp;
        let adapter = OkxAdapter::new(MarketVariant::UsdtPerp, &account).unwrap();
        assert!(adapter.capabilities().has(Capabilities::FUNDING_RATE));
        assert!(adapter.capabilities().has(Capabilities::POSITIONS));
        assert!(!adapter.capabilities().has(Capabilities::BATCH_PLACE));
    }

    #[test]
    fn parse_market_message_decodes_trades_channel() {
        let adapter = OkxAdapter::new(MarketVariant::Spot, &okx_account()).unwrap();
        let raw = r#"{"arg":{"channel":"trades","instId":"BTC-USDT"},"data":[{"instId":"BTC-USDT","tradeId":"1","px":"100.5","sz":"2","side":"sell","ts":"1000"}]}"#;
        match adapter.parse_market_message(raw) {
            Some(MarketFrame::Trade(t)) => {
                assert_eq!(t.symbol, "BTC-USDT");
                assert_eq!(t.side, TradeSide::Sell);
            }
            other => panic!("expected trade, got {other:?}"),
        }
    }

    #[test]
    fn parse_market_message_ignores_subscribe_ack() {
        let adapter = OkxAdapter::new(MarketVariant::Spot, &okx_account()).unwrap();
        let raw = r#"{"event":"subscribe","arg":{"channel":"trades","instId":"BTC-USDT"}}"#;
        assert!(adapter.parse_market_message(raw).is_none());
    }
}
