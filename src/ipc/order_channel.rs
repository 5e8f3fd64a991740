// =============================================================================
// Order Channel — fan-in of order/cancel/registration command envelopes
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::adapter::{CancelTarget, PlaceOrderRequest};
use crate::registry::StrategyRegistry;
use crate::router::OrderRouter;
use crate::types::{Account, CredentialSet, MarketVariant, PosSide, Side, Strategy, Venue};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderCommand {
    OrderRequest {
        strategy_id: String,
        #[serde(default)]
        client_order_id: String,
        symbol: String,
        side: Side,
        order_type: crate::types::OrderType,
        quantity: f64,
        #[serde(default)]
        price: Option<f64>,
        #[serde(default)]
        pos_side: PosSide,
        #[serde(default)]
        timestamp: i64,
    },
    CancelRequest {
        strategy_id: String,
        symbol: String,
        #[serde(default)]
        client_order_id: Option<String>,
        #[serde(default)]
        venue_order_id: Option<String>,
        #[serde(default)]
        timestamp: i64,
    },
    CancelAllRequest {
        strategy_id: String,
        #[serde(default)]
        symbol: Option<String>,
        #[serde(default)]
        timestamp: i64,
    },
    RegisterAccount {
        strategy_id: String,
        exchange: Venue,
        api_key: String,
        secret_key: String,
        #[serde(default)]
        passphrase: Option<String>,
        #[serde(default)]
        is_testnet: bool,
        /// Market variant string (`spot` | `usdt_perp` | `coin_perp`); §6
        /// lists this only on the strategy config file, but a strategy
        /// process registering at runtime needs the same knob to bind a
        /// perp account, so it is accepted here too when present.
        #[serde(default)]
        market: Option<String>,
        #[serde(default)]
        timestamp: i64,
    },
    UnregisterAccount {
        strategy_id: String,
        #[serde(default)]
        exchange: Option<Venue>,
        #[serde(default)]
        timestamp: i64,
    },
}

pub struct OrderChannel {
    router: Arc<OrderRouter>,
    registry: Arc<StrategyRegistry>,
}

impl OrderChannel {
    pub fn new(router: Arc<OrderRouter>, registry: Arc<StrategyRegistry>) -> Self {
        Self { router, registry }
    }

    pub async fn serve(self: Arc<Self>, listener: UnixListener, path: PathBuf) {
        info!(path = %path.display(), "order channel listening");
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let channel = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = channel.handle_connection(stream).await {
                            debug!(error = %e, "order channel connection closed");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "order channel accept failed"),
            }
        }
    }

    async fn handle_connection(&self, stream: UnixStream) -> std::io::Result<()> {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                return Ok(());
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<OrderCommand>(trimmed) {
                Ok(cmd) => self.dispatch(cmd).await,
                Err(e) => warn!(error = %e, line = %trimmed, "malformed order channel envelope, dropped"),
            }
        }
    }

    async fn dispatch(&self, cmd: OrderCommand) {
        match cmd {
            OrderCommand::OrderRequest {
                strategy_id,
                client_order_id,
                symbol,
                side,
                order_type,
                quantity,
                price,
                pos_side,
                ..
            } => {
                let req = PlaceOrderRequest {
                    client_order_id,
                    symbol,
                    side,
                    order_type,
                    tif: None,
                    qty: quantity,
                    price,
                    pos_side,
                };
                self.router.place_order(&strategy_id, req).await;
            }
            OrderCommand::CancelRequest { strategy_id, symbol, client_order_id, venue_order_id, .. } => {
                let target = match (client_order_id, venue_order_id) {
                    (Some(id), _) => CancelTarget::ClientOrderId(id),
                    (None, Some(id)) => CancelTarget::VenueOrderId(id),
                    (None, None) => {
                        warn!(strategy_id, "cancel_request missing both client_order_id and venue_order_id");
                        return;
                    }
                };
                self.router.cancel_order(&strategy_id, &symbol, target).await;
            }
            OrderCommand::CancelAllRequest { strategy_id, symbol, .. } => {
                self.router.cancel_all(&strategy_id, symbol.as_deref()).await;
            }
            OrderCommand::RegisterAccount {
                strategy_id,
                exchange,
                api_key,
                secret_key,
                passphrase,
                is_testnet,
                market,
                ..
            } => {
                let market_variant = match market.as_deref() {
                    Some(m) => match m.parse::<MarketVariant>() {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(strategy_id, error = %e, "register_account failed");
                            return;
                        }
                    },
                    None => MarketVariant::Spot,
                };
                let strategy = Strategy {
                    strategy_id: strategy_id.clone(),
                    display_name: String::new(),
                    kind: String::new(),
                    enabled: true,
                    account: Account {
                        venue: exchange,
                        market_variant,
                        credentials: CredentialSet { api_key, secret: secret_key, passphrase },
                        is_testnet,
                        proxy: None,
                    },
                    contacts: Vec::new(),
                    risk_control: Default::default(),
                };
                if let Err(e) = self.registry.register(strategy) {
                    warn!(strategy_id, error = %e, "register_account failed");
                }
            }
            OrderCommand::UnregisterAccount { strategy_id, .. } => {
                if let Err(e) = self.registry.unregister(&strategy_id) {
                    warn!(strategy_id, error = %e, "unregister_account failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_request_parses_with_defaults() {
        let json = r#"{"type":"order_request","strategy_id":"s1","symbol":"BTCUSDT","side":"BUY","order_type":"MARKET","quantity":1.0}"#;
        let cmd: OrderCommand = serde_json::from_str(json).unwrap();
        matches!(cmd, OrderCommand::OrderRequest { .. });
    }

    #[test]
    fn cancel_request_accepts_either_id_field() {
        let json = r#"{"type":"cancel_request","strategy_id":"s1","symbol":"BTCUSDT","venue_order_id":"v1"}"#;
        let cmd: OrderCommand = serde_json::from_str(json).unwrap();
        match cmd {
            OrderCommand::CancelRequest { venue_order_id, client_order_id, .. } => {
                assert_eq!(venue_order_id, Some("v1".to_string()));
                assert_eq!(client_order_id, None);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let json = r#"{"type":"bogus","strategy_id":"s1"}"#;
        assert!(serde_json::from_str::<OrderCommand>(json).is_err());
    }

    #[test]
    fn register_account_parses_without_market() {
        let json = r#"{"type":"register_account","strategy_id":"s1","exchange":"binance","api_key":"k","secret_key":"s"}"#;
        let cmd: OrderCommand = serde_json::from_str(json).unwrap();
        match cmd {
            OrderCommand::RegisterAccount { market, .. } => assert_eq!(market, None),
            _ => panic!("wrong variant"),
        }
    }

    fn channel() -> Arc<OrderChannel> {
        let dir = std::env::temp_dir().join(format!("order-channel-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let registry = Arc::new(StrategyRegistry::load(&dir).unwrap());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let router = Arc::new(OrderRouter::new(registry.clone(), std::collections::HashMap::new(), tx));
        Arc::new(OrderChannel::new(router, registry))
    }

    #[tokio::test]
    async fn register_account_threads_market_variant_into_account() {
        let channel = channel();
        channel
            .dispatch(OrderCommand::RegisterAccount {
                strategy_id: "grid_btc".into(),
                exchange: Venue::Okx,
                api_key: "k".into(),
                secret_key: "s".into(),
                passphrase: Some("pw".into()),
                is_testnet: true,
                market: Some("usdt_perp".into()),
                timestamp: 0,
            })
            .await;
        let strategy = channel.registry.get("grid_btc").unwrap();
        assert_eq!(strategy.account.market_variant, MarketVariant::UsdtPerp);
    }

    #[tokio::test]
    async fn register_account_defaults_to_spot_without_market() {
        let channel = channel();
        channel
            .dispatch(OrderCommand::RegisterAccount {
                strategy_id: "s1".into(),
                exchange: Venue::Binance,
                api_key: "k".into(),
                secret_key: "s".into(),
                passphrase: None,
                is_testnet: true,
                market: None,
                timestamp: 0,
            })
            .await;
        let strategy = channel.registry.get("s1").unwrap();
        assert_eq!(strategy.account.market_variant, MarketVariant::Spot);
    }
}
