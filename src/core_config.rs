// =============================================================================
// Core Configuration — ring buffer capacities, IPC socket paths, backoff
// bounds, and other process-wide tunables
// =============================================================================
//
// Same atomic tmp-write + rename discipline as runtime_config.rs, scaled down
// to the handful of settings the Core itself (not a strategy) owns.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_kline_capacity() -> usize {
    7200
}
fn default_trade_capacity() -> usize {
    10_000
}
fn default_book_capacity() -> usize {
    1_000
}
fn default_funding_capacity() -> usize {
    100
}
fn default_market_socket_path() -> String {
    "/tmp/trading-core/market.sock".into()
}
fn default_orders_socket_path() -> String {
    "/tmp/trading-core/orders.sock".into()
}
fn default_reports_socket_path() -> String {
    "/tmp/trading-core/reports.sock".into()
}
fn default_query_socket_path() -> String {
    "/tmp/trading-core/query.sock".into()
}
fn default_strategy_config_dir() -> String {
    "/tmp/trading-core/strategies".into()
}
fn default_report_channel_capacity() -> usize {
    256
}
fn default_order_retirement_ttl_secs() -> u64 {
    300
}
fn default_symbols() -> Vec<String> {
    vec!["BTCUSDT".into(), "ETHUSDT".into()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default = "default_kline_capacity")]
    pub kline_capacity: usize,
    #[serde(default = "default_trade_capacity")]
    pub trade_capacity: usize,
    #[serde(default = "default_book_capacity")]
    pub book_capacity: usize,
    #[serde(default = "default_funding_capacity")]
    pub funding_capacity: usize,

    #[serde(default = "default_market_socket_path")]
    pub market_socket_path: String,
    #[serde(default = "default_orders_socket_path")]
    pub orders_socket_path: String,
    #[serde(default = "default_reports_socket_path")]
    pub reports_socket_path: String,
    #[serde(default = "default_query_socket_path")]
    pub query_socket_path: String,

    #[serde(default = "default_strategy_config_dir")]
    pub strategy_config_dir: String,

    #[serde(default = "default_report_channel_capacity")]
    pub report_channel_capacity: usize,
    #[serde(default = "default_order_retirement_ttl_secs")]
    pub order_retirement_ttl_secs: u64,

    #[serde(default)]
    pub query_facade_token: Option<String>,

    /// Default symbol set for market-stream subscriptions when a strategy
    /// config does not narrow it further.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            kline_capacity: default_kline_capacity(),
            trade_capacity: default_trade_capacity(),
            book_capacity: default_book_capacity(),
            funding_capacity: default_funding_capacity(),
            market_socket_path: default_market_socket_path(),
            orders_socket_path: default_orders_socket_path(),
            reports_socket_path: default_reports_socket_path(),
            query_socket_path: default_query_socket_path(),
            strategy_config_dir: default_strategy_config_dir(),
            report_channel_capacity: default_report_channel_capacity(),
            order_retirement_ttl_secs: default_order_retirement_ttl_secs(),
            query_facade_token: None,
            symbols: default_symbols(),
        }
    }
}

impl CoreConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read core config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse core config from {}", path.display()))?;
        info!(path = %path.display(), "core config loaded");
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).context("failed to serialize core config")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp core config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp core config to {}", path.display()))?;

        info!(path = %path.display(), "core config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_capacities() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.kline_capacity, 7200);
        assert_eq!(cfg.trade_capacity, 10_000);
        assert_eq!(cfg.book_capacity, 1_000);
        assert_eq!(cfg.funding_capacity, 100);
        assert_eq!(cfg.order_retirement_ttl_secs, 300);
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: CoreConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.kline_capacity, 7200);
        assert!(cfg.query_facade_token.is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{ "kline_capacity": 100 }"#;
        let cfg: CoreConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.kline_capacity, 100);
        assert_eq!(cfg.trade_capacity, 10_000);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("core-config-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("core_config.json");

        let mut cfg = CoreConfig::default();
        cfg.kline_capacity = 42;
        cfg.save(&path).unwrap();

        let reloaded = CoreConfig::load(&path).unwrap();
        assert_eq!(reloaded.kline_capacity, 42);

        std::fs::remove_dir_all(&dir).ok();
    }
}
