// =============================================================================
// Market Cache — ring buffers per (venue, symbol, stream)
// =============================================================================
//
// Generalizes a per-symbol `CandleBuffer` (VecDeque with coalesce-by-open_time)
// into a single cache covering all four MarketFrame variants, keyed by venue
// as well as symbol so two adapters streaming the same symbol never collide.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use tracing::debug;

use crate::error::CoreError;
use crate::market_frame::{BookSnapshot, FundingRate, Kline, MarketFrame, Trade};
use crate::types::Venue;

const DEFAULT_KLINE_CAPACITY: usize = 7200;
const DEFAULT_TRADE_CAPACITY: usize = 10_000;
const DEFAULT_BOOK_CAPACITY: usize = 1_000;
const DEFAULT_FUNDING_CAPACITY: usize = 100;

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct KlineKey {
    venue: Venue,
    symbol: String,
    interval: String,
}

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct SymbolKey {
    venue: Venue,
    symbol: String,
}

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct BookKey {
    venue: Venue,
    symbol: String,
    channel_tag: String,
}

pub struct MarketCache {
    klines: RwLock<HashMap<KlineKey, VecDeque<Kline>>>,
    trades: RwLock<HashMap<SymbolKey, VecDeque<Trade>>>,
    books: RwLock<HashMap<BookKey, VecDeque<BookSnapshot>>>,
    funding: RwLock<HashMap<SymbolKey, VecDeque<FundingRate>>>,
    kline_capacity: usize,
    trade_capacity: usize,
    book_capacity: usize,
    funding_capacity: usize,
}

impl MarketCache {
    pub fn new() -> Self {
        Self::with_capacities(
            DEFAULT_KLINE_CAPACITY,
            DEFAULT_TRADE_CAPACITY,
            DEFAULT_BOOK_CAPACITY,
            DEFAULT_FUNDING_CAPACITY,
        )
    }

    pub fn with_capacities(kline: usize, trade: usize, book: usize, funding: usize) -> Self {
        Self {
            klines: RwLock::new(HashMap::new()),
            trades: RwLock::new(HashMap::new()),
            books: RwLock::new(HashMap::new()),
            funding: RwLock::new(HashMap::new()),
            kline_capacity: kline,
            trade_capacity: trade,
            book_capacity: book,
            funding_capacity: funding,
        }
    }

    /// Ingest one frame. Klines coalesce in-progress updates by `open_ts`;
    /// everything else appends and trims to capacity.
    pub fn ingest(&self, venue: Venue, frame: MarketFrame) -> Result<(), CoreError> {
        match frame {
            MarketFrame::Kline(k) => self.ingest_kline(venue, k),
            MarketFrame::Trade(t) => self.ingest_trade(venue, t),
            MarketFrame::Orderbook(b) => self.ingest_book(venue, b),
            MarketFrame::FundingRate(f) => self.ingest_funding(venue, f),
        }
        Ok(())
    }

    fn ingest_kline(&self, venue: Venue, candle: Kline) {
        let key = KlineKey { venue, symbol: candle.symbol.clone(), interval: candle.interval.clone() };
        let mut map = self.klines.write();
        let ring = map.entry(key).or_insert_with(|| VecDeque::with_capacity(self.kline_capacity + 1));

        if let Some(last) = ring.back() {
            debug_assert!(
                candle.open_ts >= last.open_ts,
                "kline open_ts must be monotonic within a stream (got {} after {})",
                candle.open_ts,
                last.open_ts,
            );
            if !last.is_closed && last.open_ts == candle.open_ts {
                ring.pop_back();
            }
        }
        ring.push_back(candle);

        while ring.len() > self.kline_capacity {
            ring.pop_front();
        }
    }

    fn ingest_trade(&self, venue: Venue, trade: Trade) {
        let key = SymbolKey { venue, symbol: trade.symbol.clone() };
        let mut map = self.trades.write();
        let ring = map.entry(key).or_insert_with(|| VecDeque::with_capacity(self.trade_capacity + 1));
        ring.push_back(trade);
        while ring.len() > self.trade_capacity {
            ring.pop_front();
        }
    }

    fn ingest_book(&self, venue: Venue, book: BookSnapshot) {
        let key = BookKey { venue, symbol: book.symbol.clone(), channel_tag: book.channel_tag.clone() };
        let mut map = self.books.write();
        let ring = map.entry(key).or_insert_with(|| VecDeque::with_capacity(self.book_capacity + 1));
        ring.push_back(book);
        while ring.len() > self.book_capacity {
            ring.pop_front();
        }
    }

    fn ingest_funding(&self, venue: Venue, rate: FundingRate) {
        let key = SymbolKey { venue, symbol: rate.symbol.clone() };
        let mut map = self.funding.write();
        let ring = map.entry(key).or_insert_with(|| VecDeque::with_capacity(self.funding_capacity + 1));
        ring.push_back(rate);
        while ring.len() > self.funding_capacity {
            ring.pop_front();
        }
        debug!("funding rate cached");
    }

    /// Last N closed klines, oldest-first.
    pub fn closed_klines(&self, venue: Venue, symbol: &str, interval: &str, n: usize) -> Vec<Kline> {
        let key = KlineKey { venue, symbol: symbol.to_string(), interval: interval.to_string() };
        let map = self.klines.read();
        match map.get(&key) {
            Some(ring) => {
                let closed: Vec<&Kline> = ring.iter().filter(|k| k.is_closed).collect();
                let start = closed.len().saturating_sub(n);
                closed[start..].iter().map(|k| (*k).clone()).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn last_trades(&self, venue: Venue, symbol: &str, n: usize) -> Vec<Trade> {
        let key = SymbolKey { venue, symbol: symbol.to_string() };
        let map = self.trades.read();
        match map.get(&key) {
            Some(ring) => {
                let start = ring.len().saturating_sub(n);
                ring.iter().skip(start).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn latest_book(&self, venue: Venue, symbol: &str, channel_tag: &str) -> Option<BookSnapshot> {
        let key = BookKey { venue, symbol: symbol.to_string(), channel_tag: channel_tag.to_string() };
        self.books.read().get(&key).and_then(|ring| ring.back().cloned())
    }

    pub fn last_funding(&self, venue: Venue, symbol: &str) -> Option<FundingRate> {
        let key = SymbolKey { venue, symbol: symbol.to_string() };
        self.funding.read().get(&key).and_then(|ring| ring.back().cloned())
    }

    pub fn kline_count(&self, venue: Venue, symbol: &str, interval: &str) -> usize {
        let key = KlineKey { venue, symbol: symbol.to_string(), interval: interval.to_string() };
        self.klines.read().get(&key).map_or(0, VecDeque::len)
    }

    /// Closing prices of the last N closed klines, oldest-first. Computed on
    /// demand from the ring rather than kept as a parallel array, so there is
    /// only ever one stored copy of each candle.
    pub fn closes(&self, venue: Venue, symbol: &str, interval: &str, n: usize) -> Vec<f64> {
        self.closed_klines(venue, symbol, interval, n).iter().map(|k| k.c).collect()
    }

    pub fn highs(&self, venue: Venue, symbol: &str, interval: &str, n: usize) -> Vec<f64> {
        self.closed_klines(venue, symbol, interval, n).iter().map(|k| k.h).collect()
    }

    pub fn lows(&self, venue: Venue, symbol: &str, interval: &str, n: usize) -> Vec<f64> {
        self.closed_klines(venue, symbol, interval, n).iter().map(|k| k.l).collect()
    }

    pub fn volumes(&self, venue: Venue, symbol: &str, interval: &str, n: usize) -> Vec<f64> {
        self.closed_klines(venue, symbol, interval, n).iter().map(|k| k.v).collect()
    }

    pub fn timestamps(&self, venue: Venue, symbol: &str, interval: &str, n: usize) -> Vec<i64> {
        self.closed_klines(venue, symbol, interval, n).iter().map(|k| k.open_ts).collect()
    }
}

impl Default for MarketCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kline(open_ts: i64, close: f64, is_closed: bool) -> Kline {
        Kline {
            symbol: "BTCUSDT".into(),
            interval: "1m".into(),
            open_ts,
            o: close,
            h: close + 1.0,
            l: close - 1.0,
            c: close,
            v: 10.0,
            is_closed,
        }
    }

    #[test]
    fn ring_trims_to_capacity() {
        let cache = MarketCache::with_capacities(3, 10, 10, 10);
        for i in 0..5 {
            cache.ingest_kline(Venue::Binance, kline(i * 60_000, 100.0 + i as f64, true));
        }
        assert_eq!(cache.kline_count(Venue::Binance, "BTCUSDT", "1m"), 3);
        let closed = cache.closed_klines(Venue::Binance, "BTCUSDT", "1m", 10);
        assert_eq!(closed.iter().map(|k| k.c).collect::<Vec<_>>(), vec![102.0, 103.0, 104.0]);
    }

    #[test]
    fn in_progress_update_replaces_tail_not_appends() {
        let cache = MarketCache::with_capacities(10, 10, 10, 10);
        cache.ingest_kline(Venue::Binance, kline(0, 50.0, false));
        assert_eq!(cache.kline_count(Venue::Binance, "BTCUSDT", "1m"), 1);

        cache.ingest_kline(Venue::Binance, kline(0, 51.0, false));
        assert_eq!(cache.kline_count(Venue::Binance, "BTCUSDT", "1m"), 1);

        cache.ingest_kline(Venue::Binance, kline(0, 52.0, true));
        assert_eq!(cache.kline_count(Venue::Binance, "BTCUSDT", "1m"), 1);
        assert_eq!(cache.closed_klines(Venue::Binance, "BTCUSDT", "1m", 1)[0].c, 52.0);
    }

    #[test]
    fn next_open_ts_appends_a_new_slot() {
        let cache = MarketCache::with_capacities(10, 10, 10, 10);
        cache.ingest_kline(Venue::Binance, kline(0, 50.0, true));
        cache.ingest_kline(Venue::Binance, kline(60_000, 51.0, false));
        assert_eq!(cache.kline_count(Venue::Binance, "BTCUSDT", "1m"), 2);
    }

    #[test]
    fn same_symbol_different_venues_do_not_collide() {
        let cache = MarketCache::with_capacities(10, 10, 10, 10);
        cache.ingest_kline(Venue::Binance, kline(0, 50.0, true));
        cache.ingest_kline(Venue::Okx, kline(0, 999.0, true));
        assert_eq!(cache.kline_count(Venue::Binance, "BTCUSDT", "1m"), 1);
        assert_eq!(cache.kline_count(Venue::Okx, "BTCUSDT", "1m"), 1);
    }

    #[test]
    fn trade_ring_trims_oldest_first() {
        let cache = MarketCache::with_capacities(10, 2, 10, 10);
        for id in 0..4 {
            cache.ingest_trade(
                Venue::Binance,
                Trade {
                    symbol: "BTCUSDT".into(),
                    trade_id: id,
                    ts: id as i64,
                    price: 100.0,
                    qty: 1.0,
                    side: crate::market_frame::TradeSide::Buy,
                },
            );
        }
        let last = cache.last_trades(Venue::Binance, "BTCUSDT", 10);
        assert_eq!(last.iter().map(|t| t.trade_id).collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn derived_views_match_closed_klines_fields() {
        let cache = MarketCache::with_capacities(10, 10, 10, 10);
        cache.ingest_kline(Venue::Binance, kline(0, 100.0, true));
        cache.ingest_kline(Venue::Binance, kline(60_000, 101.0, true));
        assert_eq!(cache.closes(Venue::Binance, "BTCUSDT", "1m", 10), vec![100.0, 101.0]);
        assert_eq!(cache.timestamps(Venue::Binance, "BTCUSDT", "1m", 10), vec![0, 60_000]);
        assert_eq!(cache.volumes(Venue::Binance, "BTCUSDT", "1m", 10), vec![10.0, 10.0]);
    }
}
