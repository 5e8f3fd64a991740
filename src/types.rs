// =============================================================================
// Shared types — the Core's data model (strategies, accounts, orders)
// =============================================================================

use serde::{Deserialize, Serialize};

/// Balance snapshot for a single asset from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub locked: f64,
}

/// Exchange the Core speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Binance,
    Okx,
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binance => write!(f, "binance"),
            Self::Okx => write!(f, "okx"),
        }
    }
}

/// Market variant: changes endpoints, symbols, and capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketVariant {
    Spot,
    UsdtPerp,
    CoinPerp,
}

impl std::fmt::Display for MarketVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spot => write!(f, "spot"),
            Self::UsdtPerp => write!(f, "usdt_perp"),
            Self::CoinPerp => write!(f, "coin_perp"),
        }
    }
}

impl MarketVariant {
    pub fn is_perp(self) -> bool {
        matches!(self, Self::UsdtPerp | Self::CoinPerp)
    }
}

impl std::str::FromStr for MarketVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spot" => Ok(Self::Spot),
            "usdt_perp" | "usdtperp" | "usdt-perp" => Ok(Self::UsdtPerp),
            "coin_perp" | "coinperp" | "coin-perp" => Ok(Self::CoinPerp),
            other => Err(format!("unknown market variant '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
    TakeProfit,
    TpLimit,
    PostOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tif {
    Gtc,
    Ioc,
    Fok,
    #[serde(rename = "POST_ONLY")]
    PostOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PosSide {
    Net,
    Long,
    Short,
}

impl Default for PosSide {
    fn default() -> Self {
        Self::Net
    }
}

/// Order lifecycle. See data-model invariants: terminal states are retained
/// for report correlation until a configurable TTL, not removed on reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    New,
    Submitted,
    Accepted,
    Partial,
    Filled,
    Cancelled,
    Rejected,
    Failed,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected | Self::Failed)
    }
}

/// Exchange credentials. `passphrase` is required for venues that use it
/// (OKX) and forbidden for venues that don't (Binance); that asymmetry is
/// validated at registry load time, not baked into this type.
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialSet {
    pub api_key: String,
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSet")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub venue: Venue,
    pub market_variant: MarketVariant,
    pub credentials: CredentialSet,
    #[serde(default)]
    pub is_testnet: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub channel: String,
    pub value: String,
}

fn default_max_order_rate_per_min() -> u32 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default)]
    pub max_position_value: f64,
    #[serde(default)]
    pub max_daily_loss: f64,
    #[serde(default)]
    pub max_order_value: f64,
    #[serde(default = "default_max_order_rate_per_min")]
    pub max_order_rate_per_min: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_value: 0.0,
            max_daily_loss: 0.0,
            max_order_value: 0.0,
            max_order_rate_per_min: default_max_order_rate_per_min(),
        }
    }
}

/// A strategy's identity plus the account it trades through. Loaded by the
/// registry; immutable for the strategy's lifecycle apart from `enabled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub strategy_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub account: Account,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub risk_control: RiskConfig,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentRef {
    pub venue: Venue,
    pub market_variant: MarketVariant,
    pub canonical_symbol: String,
}

/// An order as tracked by the router's in-flight table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub client_order_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue_order_id: Option<String>,
    pub strategy_id: String,
    pub symbol: String,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(default)]
    pub tif: Option<Tif>,
    pub qty: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default)]
    pub pos_side: PosSide,
    pub state: OrderState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    OrderUpdate,
    CancelResult,
    BatchResult,
    RegisterResult,
    AccountUpdate,
    PositionUpdate,
    BalanceUpdate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReport {
    #[serde(rename = "type")]
    pub report_type: ReportType,
    pub strategy_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue_order_id: Option<String>,
    pub status: OrderState,
    #[serde(default)]
    pub filled_qty: f64,
    #[serde(default)]
    pub avg_fill_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub strategy_id: String,
    pub venue: Venue,
    pub channel: String,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_state_terminality() {
        assert!(OrderState::Filled.is_terminal());
        assert!(OrderState::Failed.is_terminal());
        assert!(!OrderState::Submitted.is_terminal());
        assert!(!OrderState::Accepted.is_terminal());
    }

    #[test]
    fn credential_set_debug_redacts_secret() {
        let creds = CredentialSet {
            api_key: "pub-key".into(),
            secret: "super-secret".into(),
            passphrase: Some("pw".into()),
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("\"pw\""));
    }

    #[test]
    fn market_variant_perp_gate() {
        assert!(MarketVariant::UsdtPerp.is_perp());
        assert!(MarketVariant::CoinPerp.is_perp());
        assert!(!MarketVariant::Spot.is_perp());
    }

    #[test]
    fn market_variant_from_str_accepts_aliases() {
        use std::str::FromStr;
        assert_eq!(MarketVariant::from_str("usdt_perp").unwrap(), MarketVariant::UsdtPerp);
        assert_eq!(MarketVariant::from_str("COIN-PERP").unwrap(), MarketVariant::CoinPerp);
        assert!(MarketVariant::from_str("bogus").is_err());
    }
}
