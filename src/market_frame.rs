// =============================================================================
// MarketFrame — the venue-agnostic envelope every adapter normalizes into
// before a frame reaches the market cache or the IPC market channel.
// =============================================================================
//
// Side derivation for trades and level computation for books follow the same
// shapes a typical trade/orderbook processor uses, just exposed as plain
// data instead of folded into running aggregates.
// =============================================================================

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub symbol: String,
    pub interval: String,
    pub open_ts: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
    pub is_closed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub trade_id: u64,
    pub ts: i64,
    pub price: f64,
    pub qty: f64,
    pub side: TradeSide,
}

impl Trade {
    /// `maker_buy` is the venue's raw "buyer is maker" flag. When the buyer
    /// is the maker, the taker crossed the spread selling, so the trade's
    /// aggressor side is SELL.
    pub fn side_from_maker_buy(maker_buy: bool) -> TradeSide {
        if maker_buy {
            TradeSide::Sell
        } else {
            TradeSide::Buy
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub symbol: String,
    pub ts: i64,
    pub channel_tag: String,
    /// Decreasing in price.
    pub bids: Vec<(f64, f64)>,
    /// Increasing in price.
    pub asks: Vec<(f64, f64)>,
    pub best_bid: f64,
    pub best_ask: f64,
    pub mid: f64,
    pub spread: f64,
}

impl BookSnapshot {
    pub fn new(
        symbol: impl Into<String>,
        ts: i64,
        channel_tag: impl Into<String>,
        bids: Vec<(f64, f64)>,
        asks: Vec<(f64, f64)>,
    ) -> Self {
        let best_bid = bids.first().map(|(p, _)| *p).unwrap_or(0.0);
        let best_ask = asks.first().map(|(p, _)| *p).unwrap_or(0.0);
        let mid = if best_bid > 0.0 && best_ask > 0.0 {
            (best_bid + best_ask) / 2.0
        } else {
            0.0
        };
        let spread = if best_bid > 0.0 && best_ask > 0.0 {
            best_ask - best_bid
        } else {
            0.0
        };

        Self {
            symbol: symbol.into(),
            ts,
            channel_tag: channel_tag.into(),
            bids,
            asks,
            best_bid,
            best_ask,
            mid,
            spread,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleState {
    Settled,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRate {
    pub symbol: String,
    pub ts: i64,
    pub current: f64,
    pub next_predicted: Option<f64>,
    pub funding_time: i64,
    pub next_funding_time: i64,
    pub method: String,
    pub settle_state: SettleState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketFrame {
    Kline(Kline),
    Trade(Trade),
    Orderbook(BookSnapshot),
    FundingRate(FundingRate),
}

impl MarketFrame {
    pub fn symbol(&self) -> &str {
        match self {
            MarketFrame::Kline(k) => &k.symbol,
            MarketFrame::Trade(t) => &t.symbol,
            MarketFrame::Orderbook(b) => &b.symbol,
            MarketFrame::FundingRate(f) => &f.symbol,
        }
    }

    pub fn stream_key(&self) -> &'static str {
        match self {
            MarketFrame::Kline(_) => "kline",
            MarketFrame::Trade(_) => "trade",
            MarketFrame::Orderbook(_) => "orderbook",
            MarketFrame::FundingRate(_) => "funding_rate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maker_buy_true_means_taker_sold() {
        // scenario S5: maker_buy=true, price=50000, qty=0.1 => normalized side=SELL
        assert_eq!(Trade::side_from_maker_buy(true), TradeSide::Sell);
        assert_eq!(Trade::side_from_maker_buy(false), TradeSide::Buy);
    }

    #[test]
    fn book_snapshot_computes_best_mid_spread() {
        // scenario S4
        let book = BookSnapshot::new(
            "BTCUSDT",
            0,
            "top5_100ms",
            vec![(100.0, 1.0), (99.0, 2.0)],
            vec![(101.0, 1.0), (102.0, 3.0)],
        );
        assert_eq!(book.best_bid, 100.0);
        assert_eq!(book.best_ask, 101.0);
        assert_eq!(book.mid, 100.5);
        assert_eq!(book.spread, 1.0);
    }

    #[test]
    fn book_snapshot_empty_side_yields_zero_derived_fields() {
        let book = BookSnapshot::new("BTCUSDT", 0, "top5_100ms", vec![], vec![(101.0, 1.0)]);
        assert_eq!(book.best_bid, 0.0);
        assert_eq!(book.mid, 0.0);
        assert_eq!(book.spread, 0.0);
    }

    #[test]
    fn frame_round_trips_through_json() {
        let frame = MarketFrame::Trade(Trade {
            symbol: "BTCUSDT".into(),
            trade_id: 1,
            ts: 1000,
            price: 50000.0,
            qty: 0.1,
            side: TradeSide::Sell,
        });
        let json = serde_json::to_string(&frame).unwrap();
        let parsed: MarketFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(frame, parsed);
    }
}
