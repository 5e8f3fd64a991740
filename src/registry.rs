// =============================================================================
// Strategy Registry — loads strategy configs from a directory, validates
// credentials, and serves the supervisor/router the live strategy set
// =============================================================================
//
// Generalizes `runtime_config::RuntimeConfig`'s atomic load/save (tmp-write +
// rename) from a single settings file into one file per strategy under a
// config directory. `strategy_id` uniqueness and venue-specific credential
// shape (OKX requires a passphrase, Binance forbids one) are enforced at
// load time so a malformed config fails fast instead of surfacing as a
// signing error deep in an adapter.
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{Account, Contact, CredentialSet, MarketVariant, RiskConfig, Strategy, Venue};

fn default_true() -> bool {
    true
}

/// §6 "Strategy configuration file": the flat, operator-facing on-disk
/// shape (`strategy_name`, `strategy_type`, `exchange`, `api_key`,
/// `secret_key`, `market?`, …), distinct from the nested internal
/// `Strategy`/`Account` the rest of the Core works with. The two
/// `register_account` paths (`ipc::order_channel`, `query_facade`) build a
/// `Strategy` straight from their own flat envelopes the same way this
/// builds one from a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StrategyConfigFile {
    strategy_id: String,
    #[serde(default)]
    strategy_name: String,
    #[serde(default)]
    strategy_type: String,
    #[serde(default = "default_true")]
    enabled: bool,
    exchange: Venue,
    api_key: String,
    secret_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    passphrase: Option<String>,
    #[serde(default)]
    is_testnet: bool,
    /// Market variant string (`spot` | `usdt_perp` | `coin_perp`); absent
    /// defaults to spot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    market: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    proxy: Option<String>,
    #[serde(default)]
    contacts: Vec<Contact>,
    #[serde(default)]
    risk_control: RiskConfig,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    params: serde_json::Value,
}

impl StrategyConfigFile {
    fn into_strategy(self) -> Result<Strategy> {
        let market_variant = match &self.market {
            Some(m) => MarketVariant::from_str(m).map_err(|e| anyhow::anyhow!(e))?,
            None => MarketVariant::Spot,
        };
        Ok(Strategy {
            strategy_id: self.strategy_id,
            display_name: self.strategy_name,
            kind: self.strategy_type,
            enabled: self.enabled,
            account: Account {
                venue: self.exchange,
                market_variant,
                credentials: CredentialSet {
                    api_key: self.api_key,
                    secret: self.secret_key,
                    passphrase: self.passphrase,
                },
                is_testnet: self.is_testnet,
                proxy: self.proxy,
            },
            contacts: self.contacts,
            risk_control: self.risk_control,
        })
    }

    fn from_strategy(s: &Strategy) -> Self {
        Self {
            strategy_id: s.strategy_id.clone(),
            strategy_name: s.display_name.clone(),
            strategy_type: s.kind.clone(),
            enabled: s.enabled,
            exchange: s.account.venue,
            api_key: s.account.credentials.api_key.clone(),
            secret_key: s.account.credentials.secret.clone(),
            passphrase: s.account.credentials.passphrase.clone(),
            is_testnet: s.account.is_testnet,
            market: Some(s.account.market_variant.to_string()),
            proxy: s.account.proxy.clone(),
            contacts: s.contacts.clone(),
            risk_control: s.risk_control.clone(),
            params: serde_json::Value::Null,
        }
    }
}

pub struct StrategyRegistry {
    dir: PathBuf,
    strategies: RwLock<HashMap<String, Strategy>>,
}

impl StrategyRegistry {
    /// Load every `*.json` file in `dir` as a §6 strategy config file.
    /// Duplicate `strategy_id`s or a credential/venue mismatch are load
    /// errors, not warnings — a half-loaded registry is worse than a
    /// refused start.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let mut strategies = HashMap::new();

        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read strategy config dir {}", dir.display()))?;

        for entry in entries {
            let entry = entry.context("failed to read directory entry")?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let strategy = Self::load_one(&path)?;
            validate_credentials(&strategy)?;

            if let Some(prev) = strategies.insert(strategy.strategy_id.clone(), strategy) {
                bail!("duplicate strategy_id '{}' (from {})", prev.strategy_id, path.display());
            }
        }

        info!(count = strategies.len(), dir = %dir.display(), "strategy registry loaded");
        Ok(Self { dir, strategies: RwLock::new(strategies) })
    }

    fn load_one(path: &Path) -> Result<Strategy> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read strategy config {}", path.display()))?;
        let file: StrategyConfigFile = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse strategy config {}", path.display()))?;
        file.into_strategy()
            .with_context(|| format!("invalid strategy config {}", path.display()))
    }

    /// Atomic tmp-write + rename, same pattern as runtime_config's save.
    /// Written back in the flat §6 shape, not the internal nested one.
    pub fn save_one(&self, strategy: &Strategy) -> Result<()> {
        let path = self.dir.join(format!("{}.json", strategy.strategy_id));
        let content = serde_json::to_string_pretty(&StrategyConfigFile::from_strategy(strategy))
            .context("failed to serialize strategy config")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp strategy config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("failed to rename tmp strategy config to {}", path.display()))?;

        info!(strategy_id = %strategy.strategy_id, path = %path.display(), "strategy config saved (atomic)");
        Ok(())
    }

    pub fn get(&self, strategy_id: &str) -> Option<Strategy> {
        self.strategies.read().get(strategy_id).cloned()
    }

    pub fn all(&self) -> Vec<Strategy> {
        self.strategies.read().values().cloned().collect()
    }

    pub fn enabled(&self) -> Vec<Strategy> {
        self.strategies.read().values().filter(|s| s.enabled).cloned().collect()
    }

    pub fn set_enabled(&self, strategy_id: &str, enabled: bool) -> Result<()> {
        let mut guard = self.strategies.write();
        let strategy = guard
            .get_mut(strategy_id)
            .with_context(|| format!("unknown strategy_id '{strategy_id}'"))?;
        strategy.enabled = enabled;
        let snapshot = strategy.clone();
        drop(guard);
        self.save_one(&snapshot)
    }

    pub fn contains(&self, strategy_id: &str) -> bool {
        self.strategies.read().contains_key(strategy_id)
    }

    /// Insert or replace a strategy record, validating credentials first,
    /// and persist it. Used by the Query Facade's `register_account` write.
    pub fn register(&self, strategy: Strategy) -> Result<()> {
        validate_credentials(&strategy)?;
        self.save_one(&strategy)?;
        self.strategies.write().insert(strategy.strategy_id.clone(), strategy);
        Ok(())
    }

    /// Remove a strategy from the in-memory map and delete its config file.
    /// Used by the Query Facade's `unregister_account` write.
    pub fn unregister(&self, strategy_id: &str) -> Result<()> {
        let removed = self.strategies.write().remove(strategy_id);
        if removed.is_none() {
            bail!("unknown strategy_id '{strategy_id}'");
        }
        let path = self.dir.join(format!("{strategy_id}.json"));
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to remove strategy config {}", path.display()))?;
        }
        Ok(())
    }
}

fn validate_credentials(strategy: &Strategy) -> Result<()> {
    let creds = &strategy.account.credentials;
    match strategy.account.venue {
        Venue::Okx if creds.passphrase.is_none() => {
            bail!(
                "strategy '{}': OKX account requires a passphrase",
                strategy.strategy_id
            );
        }
        Venue::Binance if creds.passphrase.is_some() => {
            warn!(
                strategy_id = %strategy.strategy_id,
                "Binance account config carries an unused passphrase field"
            );
        }
        _ => {}
    }
    if creds.api_key.is_empty() || creds.secret.is_empty() {
        bail!("strategy '{}': api_key/secret must not be empty", strategy.strategy_id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writes `s` to `dir/name` in the on-disk §6 flat shape, the way an
    /// operator's config file actually looks. File names are advisory
    /// (§6), so this takes one explicitly rather than deriving it from
    /// `strategy_id`.
    fn write_config_file(dir: &Path, name: &str, s: &Strategy) {
        let file = StrategyConfigFile::from_strategy(s);
        std::fs::write(dir.join(name), serde_json::to_string(&file).unwrap()).unwrap();
    }

    fn strategy(id: &str, venue: Venue, passphrase: Option<&str>) -> Strategy {
        Strategy {
            strategy_id: id.to_string(),
            display_name: String::new(),
            kind: String::new(),
            enabled: true,
            account: Account {
                venue,
                market_variant: MarketVariant::Spot,
                credentials: CredentialSet {
                    api_key: "key".into(),
                    secret: "secret".into(),
                    passphrase: passphrase.map(String::from),
                },
                is_testnet: true,
                proxy: None,
            },
            contacts: Vec::new(),
            risk_control: RiskConfig::default(),
        }
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("registry-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn okx_without_passphrase_is_rejected() {
        let s = strategy("s1", Venue::Okx, None);
        assert!(validate_credentials(&s).is_err());
    }

    #[test]
    fn okx_with_passphrase_is_accepted() {
        let s = strategy("s1", Venue::Okx, Some("pw"));
        assert!(validate_credentials(&s).is_ok());
    }

    #[test]
    fn binance_without_passphrase_is_accepted() {
        let s = strategy("s1", Venue::Binance, None);
        assert!(validate_credentials(&s).is_ok());
    }

    #[test]
    fn duplicate_strategy_id_fails_load() {
        let dir = tempdir();
        let a = strategy("dup", Venue::Binance, None);
        let b = strategy("dup", Venue::Binance, None);
        write_config_file(&dir, "a.json", &a);
        write_config_file(&dir, "b.json", &b);

        let result = StrategyRegistry::load(&dir);
        assert!(result.is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn load_save_round_trip_and_toggle() {
        let dir = tempdir();
        let s = strategy("s1", Venue::Okx, Some("pw"));
        write_config_file(&dir, "s1.json", &s);

        let registry = StrategyRegistry::load(&dir).unwrap();
        assert!(registry.contains("s1"));
        assert_eq!(registry.enabled().len(), 1);

        registry.set_enabled("s1", false).unwrap();
        assert_eq!(registry.enabled().len(), 0);

        let reloaded = StrategyRegistry::load(&dir).unwrap();
        assert!(!reloaded.get("s1").unwrap().enabled);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn register_then_unregister_round_trips() {
        let dir = tempdir();
        let registry = StrategyRegistry::load(&dir).unwrap();
        let s = strategy("new-strat", Venue::Binance, None);

        registry.register(s.clone()).unwrap();
        assert!(registry.contains("new-strat"));
        assert!(dir.join("new-strat.json").exists());

        registry.unregister("new-strat").unwrap();
        assert!(!registry.contains("new-strat"));
        assert!(!dir.join("new-strat.json").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn register_rejects_bad_credentials() {
        let dir = tempdir();
        let registry = StrategyRegistry::load(&dir).unwrap();
        let s = strategy("bad", Venue::Okx, None);
        assert!(registry.register(s).is_err());
        assert!(!registry.contains("bad"));
        std::fs::remove_dir_all(&dir).ok();
    }

    /// §6 "Strategy configuration file": a config written with the
    /// documented flat, operator-facing keys (`strategy_name`,
    /// `strategy_type`, `exchange`, `api_key`, `secret_key`, `market`) must
    /// load, not just the nested internal shape this repo works with
    /// internally.
    #[test]
    fn loads_spec_flat_config_file_shape() {
        let dir = tempdir();
        std::fs::write(
            dir.join("grid_btc.json"),
            r#"{
                "strategy_id": "grid_btc",
                "strategy_name": "BTC Grid",
                "strategy_type": "grid",
                "enabled": true,
                "exchange": "okx",
                "api_key": "key",
                "secret_key": "secret",
                "passphrase": "pw",
                "is_testnet": false,
                "market": "usdt_perp",
                "contacts": [],
                "risk_control": {},
                "params": {"grid_size": 10}
            }"#,
        )
        .unwrap();

        let registry = StrategyRegistry::load(&dir).unwrap();
        let s = registry.get("grid_btc").unwrap();
        assert_eq!(s.display_name, "BTC Grid");
        assert_eq!(s.kind, "grid");
        assert_eq!(s.account.venue, Venue::Okx);
        assert_eq!(s.account.market_variant, MarketVariant::UsdtPerp);
        assert_eq!(s.account.credentials.passphrase.as_deref(), Some("pw"));

        std::fs::remove_dir_all(&dir).ok();
    }

    /// An absent `market` key (scenario S1's OKX account has no `market`
    /// field at all) defaults to spot rather than failing to load.
    #[test]
    fn missing_market_field_defaults_to_spot() {
        let dir = tempdir();
        std::fs::write(
            dir.join("grid_btc.json"),
            r#"{
                "strategy_id": "grid_btc",
                "exchange": "okx",
                "api_key": "key",
                "secret_key": "secret",
                "passphrase": "pw"
            }"#,
        )
        .unwrap();

        let registry = StrategyRegistry::load(&dir).unwrap();
        assert_eq!(registry.get("grid_btc").unwrap().account.market_variant, MarketVariant::Spot);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn save_then_load_round_trips_non_spot_market() {
        let dir = tempdir();
        let mut s = strategy("perp-strat", Venue::Okx, Some("pw"));
        s.account.market_variant = MarketVariant::CoinPerp;
        write_config_file(&dir, "perp-strat.json", &s);

        let registry = StrategyRegistry::load(&dir).unwrap();
        assert_eq!(registry.get("perp-strat").unwrap().account.market_variant, MarketVariant::CoinPerp);
        std::fs::remove_dir_all(&dir).ok();
    }
}
