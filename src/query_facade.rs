// =============================================================================
// Query Facade — request/reply socket for registry and runtime introspection
// =============================================================================
//
// Grounded on api/rest.rs's endpoint catalogue (one handler per read/write
// operation, routed by a string key) and api/auth.rs's constant-time token
// comparison, adapted from HTTP routing + Bearer header to a single
// request/reply Unix socket carrying `{query_type, params}` envelopes. Local
// IPC still needs an auth gate since any process on the host that can reach
// the socket can open it; the same admin-token shared-secret scheme is
// reused via `params.token` rather than an HTTP header.
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::adapter::ExchangeAdapter;
use crate::registry::StrategyRegistry;
use crate::router::OrderRouter;
use crate::types::{Account, CredentialSet, MarketVariant, Strategy, Venue};

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query_type: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    code: i32,
    msg: String,
    data: Value,
}

impl QueryResponse {
    fn ok(data: Value) -> Self {
        Self { code: 0, msg: "ok".into(), data }
    }

    fn err(msg: impl Into<String>) -> Self {
        Self { code: 1, msg: msg.into(), data: Value::Null }
    }
}

/// Constant-time comparison, same discipline as api/auth.rs's token check.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

pub struct QueryFacade {
    registry: Arc<StrategyRegistry>,
    router: Arc<OrderRouter>,
    adapters: HashMap<(Venue, MarketVariant), Arc<dyn ExchangeAdapter>>,
    token: Option<String>,
}

impl QueryFacade {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        router: Arc<OrderRouter>,
        adapters: HashMap<(Venue, MarketVariant), Arc<dyn ExchangeAdapter>>,
        token: Option<String>,
    ) -> Self {
        Self { registry, router, adapters, token }
    }

    fn adapter_for(&self, strategy_id: &str) -> Result<(Account, Arc<dyn ExchangeAdapter>), QueryResponse> {
        let strategy = self
            .registry
            .get(strategy_id)
            .ok_or_else(|| QueryResponse::err(format!("unknown strategy_id '{strategy_id}'")))?;
        let key = (strategy.account.venue, strategy.account.market_variant);
        let adapter = self
            .adapters
            .get(&key)
            .cloned()
            .ok_or_else(|| QueryResponse::err("no adapter configured for account"))?;
        Ok((strategy.account, adapter))
    }

    pub async fn serve(self: Arc<Self>, listener: UnixListener, path: PathBuf) {
        info!(path = %path.display(), "query facade listening");
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let facade = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = facade.handle_connection(stream).await {
                            debug!(error = %e, "query facade connection closed");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "query facade accept failed"),
            }
        }
    }

    async fn handle_connection(&self, stream: UnixStream) -> std::io::Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                return Ok(());
            }
            let response = self.handle_request(line.trim()).await;
            let mut json = serde_json::to_string(&response).unwrap_or_else(|_| {
                serde_json::to_string(&QueryResponse::err("response serialization failed")).unwrap()
            });
            json.push('\n');
            write_half.write_all(json.as_bytes()).await?;
        }
    }

    fn authorized(&self, params: &Value) -> bool {
        match &self.token {
            None => true,
            Some(expected) => {
                let presented = params.get("token").and_then(Value::as_str).unwrap_or("");
                constant_time_eq(presented.as_bytes(), expected.as_bytes())
            }
        }
    }

    async fn handle_request(&self, line: &str) -> QueryResponse {
        let request: QueryRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => return QueryResponse::err(format!("malformed request: {e}")),
        };

        if !self.authorized(&request.params) {
            warn!(query_type = %request.query_type, "query facade request rejected: bad token");
            return QueryResponse::err("unauthorized");
        }

        match request.query_type.as_str() {
            "get_strategy_config" => self.get_strategy_config(&request.params),
            "get_all_strategy_configs" => self.get_all_strategy_configs(),
            "get_strategy_contacts" => self.get_strategy_contacts(&request.params),
            "get_strategy_risk_control" => self.get_strategy_risk_control(&request.params),
            "get_open_orders" => self.get_open_orders(),
            "get_positions" => self.get_positions(&request.params).await,
            "get_balances" => self.get_balances(&request.params).await,
            "register_account" => self.register_account(&request.params),
            "unregister_account" => self.unregister_account(&request.params),
            other => QueryResponse::err(format!("unknown query_type '{other}'")),
        }
    }

    async fn get_positions(&self, params: &Value) -> QueryResponse {
        let Some(id) = Self::strategy_id_param(params) else {
            return QueryResponse::err("missing strategy_id");
        };
        let (account, adapter) = match self.adapter_for(id) {
            Ok(pair) => pair,
            Err(resp) => return resp,
        };
        match adapter.positions(&account).await {
            Ok(v) => QueryResponse::ok(v),
            Err(e) => QueryResponse::err(e.to_string()),
        }
    }

    async fn get_balances(&self, params: &Value) -> QueryResponse {
        let Some(id) = Self::strategy_id_param(params) else {
            return QueryResponse::err("missing strategy_id");
        };
        let (account, adapter) = match self.adapter_for(id) {
            Ok(pair) => pair,
            Err(resp) => return resp,
        };
        match adapter.balances(&account).await {
            Ok(v) => QueryResponse::ok(serde_json::to_value(v).unwrap_or(Value::Null)),
            Err(e) => QueryResponse::err(e.to_string()),
        }
    }

    fn strategy_id_param(params: &Value) -> Option<&str> {
        params.get("strategy_id").and_then(Value::as_str)
    }

    fn get_strategy_config(&self, params: &Value) -> QueryResponse {
        let Some(id) = Self::strategy_id_param(params) else {
            return QueryResponse::err("missing strategy_id");
        };
        match self.registry.get(id) {
            Some(s) => QueryResponse::ok(serde_json::to_value(s).unwrap_or(Value::Null)),
            None => QueryResponse::err(format!("unknown strategy_id '{id}'")),
        }
    }

    fn get_all_strategy_configs(&self) -> QueryResponse {
        let all = self.registry.all();
        QueryResponse::ok(serde_json::to_value(all).unwrap_or(Value::Null))
    }

    fn get_strategy_contacts(&self, params: &Value) -> QueryResponse {
        let Some(id) = Self::strategy_id_param(params) else {
            return QueryResponse::err("missing strategy_id");
        };
        match self.registry.get(id) {
            Some(s) => QueryResponse::ok(serde_json::to_value(s.contacts).unwrap_or(Value::Null)),
            None => QueryResponse::err(format!("unknown strategy_id '{id}'")),
        }
    }

    fn get_strategy_risk_control(&self, params: &Value) -> QueryResponse {
        let Some(id) = Self::strategy_id_param(params) else {
            return QueryResponse::err("missing strategy_id");
        };
        match self.registry.get(id) {
            Some(s) => QueryResponse::ok(serde_json::to_value(s.risk_control).unwrap_or(Value::Null)),
            None => QueryResponse::err(format!("unknown strategy_id '{id}'")),
        }
    }

    fn get_open_orders(&self) -> QueryResponse {
        QueryResponse::ok(serde_json::json!({ "in_flight_count": self.router.in_flight_count() }))
    }

    fn register_account(&self, params: &Value) -> QueryResponse {
        let strategy_id = match Self::strategy_id_param(params) {
            Some(id) => id.to_string(),
            None => return QueryResponse::err("missing strategy_id"),
        };
        let exchange: Venue = match params.get("exchange").and_then(Value::as_str) {
            Some("binance") => Venue::Binance,
            Some("okx") => Venue::Okx,
            _ => return QueryResponse::err("missing or invalid exchange"),
        };
        let api_key = params.get("api_key").and_then(Value::as_str).unwrap_or_default().to_string();
        let secret_key = params.get("secret_key").and_then(Value::as_str).unwrap_or_default().to_string();
        let passphrase = params.get("passphrase").and_then(Value::as_str).map(String::from);
        let is_testnet = params.get("is_testnet").and_then(Value::as_bool).unwrap_or(false);
        let market_variant = match params.get("market").and_then(Value::as_str) {
            Some(m) => match m.parse::<MarketVariant>() {
                Ok(v) => v,
                Err(e) => return QueryResponse::err(e),
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

        match self.registry.register(strategy) {
            Ok(()) => QueryResponse::ok(serde_json::json!({ "strategy_id": strategy_id })),
            Err(e) => QueryResponse::err(e.to_string()),
        }
    }

    fn unregister_account(&self, params: &Value) -> QueryResponse {
        let Some(id) = Self::strategy_id_param(params) else {
            return QueryResponse::err("missing strategy_id");
        };
        match self.registry.unregister(id) {
            Ok(()) => QueryResponse::ok(Value::Null),
            Err(e) => QueryResponse::err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facade(token: Option<&str>) -> QueryFacade {
        let dir = std::env::temp_dir().join(format!("facade-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let registry = Arc::new(StrategyRegistry::load(&dir).unwrap());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let router = Arc::new(OrderRouter::new(registry.clone(), HashMap::new(), tx));
        QueryFacade::new(registry, router, HashMap::new(), token.map(String::from))
    }

    #[tokio::test]
    async fn unknown_query_type_is_rejected() {
        let f = facade(None);
        let resp = f.handle_request(r#"{"query_type":"bogus","params":{}}"#).await;
        assert_eq!(resp.code, 1);
    }

    #[tokio::test]
    async fn missing_token_rejected_when_configured() {
        let f = facade(Some("secret-token"));
        let resp = f.handle_request(r#"{"query_type":"get_all_strategy_configs","params":{}}"#).await;
        assert_eq!(resp.code, 1);
        assert_eq!(resp.msg, "unauthorized");
    }

    #[tokio::test]
    async fn correct_token_is_accepted() {
        let f = facade(Some("secret-token"));
        let resp = f
            .handle_request(r#"{"query_type":"get_all_strategy_configs","params":{"token":"secret-token"}}"#)
            .await;
        assert_eq!(resp.code, 0);
    }

    #[tokio::test]
    async fn register_then_get_strategy_config_round_trips() {
        let f = facade(None);
        let register = f
            .handle_request(
                r#"{"query_type":"register_account","params":{"strategy_id":"s1","exchange":"binance","api_key":"k","secret_key":"s"}}"#,
            )
            .await;
        assert_eq!(register.code, 0);

        let get = f.handle_request(r#"{"query_type":"get_strategy_config","params":{"strategy_id":"s1"}}"#).await;
        assert_eq!(get.code, 0);
    }

    #[tokio::test]
    async fn malformed_json_is_reported_not_panicked() {
        let f = facade(None);
        let resp = f.handle_request("not json").await;
        assert_eq!(resp.code, 1);
    }

    #[tokio::test]
    async fn register_account_threads_market_variant_into_account() {
        let f = facade(None);
        let resp = f
            .handle_request(
                r#"{"query_type":"register_account","params":{"strategy_id":"grid_btc","exchange":"okx","api_key":"k","secret_key":"s","passphrase":"pw","market":"usdt_perp"}}"#,
            )
            .await;
        assert_eq!(resp.code, 0);
        let strategy = f.registry.get("grid_btc").unwrap();
        assert_eq!(strategy.account.market_variant, MarketVariant::UsdtPerp);
    }

    #[tokio::test]
    async fn register_account_rejects_invalid_market() {
        let f = facade(None);
        let resp = f
            .handle_request(
                r#"{"query_type":"register_account","params":{"strategy_id":"s1","exchange":"binance","api_key":"k","secret_key":"s","market":"bogus"}}"#,
            )
            .await;
        assert_eq!(resp.code, 1);
    }

    #[tokio::test]
    async fn get_positions_without_adapter_reports_error() {
        let f = facade(None);
        f.handle_request(
            r#"{"query_type":"register_account","params":{"strategy_id":"s1","exchange":"binance","api_key":"k","secret_key":"s"}}"#,
        )
        .await;
        let resp = f.handle_request(r#"{"query_type":"get_positions","params":{"strategy_id":"s1"}}"#).await;
        assert_eq!(resp.code, 1);
    }
}
