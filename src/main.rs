// =============================================================================
// Trading Core — Main Entry Point
// =============================================================================
//
// Wires the Strategy Registry, per-account Exchange Adapters, the Order
// Router, the Market Cache, the three IPC channels, and the Query Facade
// into one process, then spawns one Supervisor-backed reconnect loop per
// market stream and per user-data stream.
// =============================================================================

mod adapter;
mod core_config;
mod error;
mod ipc;
mod market_cache;
mod market_frame;
mod query_facade;
mod registry;
mod rest_client;
mod router;
mod signer;
mod supervisor;
mod types;
mod ws_transport;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::adapter::binance::BinanceAdapter;
use crate::adapter::okx::OkxAdapter;
use crate::adapter::ExchangeAdapter;
use crate::core_config::CoreConfig;
use crate::ipc::{MarketChannel, OrderChannel, ReportChannel};
use crate::market_cache::MarketCache;
use crate::query_facade::QueryFacade;
use crate::registry::StrategyRegistry;
use crate::router::OrderRouter;
use crate::supervisor::{run_with_backoff, UserDataSupervisor};
use crate::types::{Account, MarketVariant, Venue};

const CORE_CONFIG_PATH: &str = "core_config.json";

/// Binds a Unix listener at `path`, removing a stale socket file left behind
/// by an unclean shutdown first.
async fn bind_unix(path: &str) -> anyhow::Result<UnixListener> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(UnixListener::bind(path)?)
}

fn build_adapter(account: &Account) -> anyhow::Result<Arc<dyn ExchangeAdapter>> {
    match account.venue {
        Venue::Binance => Ok(Arc::new(BinanceAdapter::new(account.market_variant, account)?)),
        Venue::Okx => Ok(Arc::new(OkxAdapter::new(account.market_variant, account)?)),
    }
}

/// Per-venue channel name for a logical market stream. Binance's default
/// `subscribe_frame` impl lowercases the symbol and appends `@channel` (plus
/// `_interval` for klines); OKX's override appends the interval directly to
/// the channel name (`candle1m`) and keys off `instId` instead.
fn channel_name(venue: Venue, logical: &str) -> &'static str {
    match (venue, logical) {
        (Venue::Binance, "kline") => "kline",
        (Venue::Binance, "trade") => "trade",
        (Venue::Binance, "depth") => "depth",
        (Venue::Okx, "kline") => "candle",
        (Venue::Okx, "trade") => "trades",
        (Venue::Okx, "depth") => "books",
        _ => logical,
    }
}

/// Runs one reconnecting market-stream connection for `adapter`, subscribing
/// every configured symbol's kline/trade/depth streams on each (re)connect.
async fn run_market_stream(
    venue: Venue,
    adapter: Arc<dyn ExchangeAdapter>,
    account: Account,
    symbols: Vec<String>,
    market_cache: Arc<MarketCache>,
    market_channel: Arc<MarketChannel>,
) {
    let label = format!("{venue}-market");
    run_with_backoff(&label, move || {
        let adapter = adapter.clone();
        let account = account.clone();
        let symbols = symbols.clone();
        let market_cache = market_cache.clone();
        let market_channel = market_channel.clone();
        async move {
            let url = adapter.market_stream_url(&account);
            let (tx, rx) = mpsc::unbounded_channel::<String>();

            let mut id = 1u64;
            for symbol in &symbols {
                let subs: [(&str, Option<&str>); 3] = [
                    (channel_name(venue, "kline"), Some("1m")),
                    (channel_name(venue, "trade"), None),
                    (channel_name(venue, "depth"), None),
                ];
                for (channel, interval) in subs {
                    match adapter.subscribe_frame(channel, symbol, interval, id) {
                        Ok(frame) => {
                            let _ = tx.send(frame);
                        }
                        Err(e) => warn!(symbol, channel, error = %e, "failed to build subscribe frame"),
                    }
                    id += 1;
                }
            }

            let state = ws_transport::run_connection(&url, rx, |raw| {
                let Some(frame) = adapter.parse_market_message(raw) else { return };
                if let Err(e) = market_cache.ingest(venue, frame.clone()) {
                    warn!(error = %e, "market cache ingest failed");
                }
                if let Err(e) = market_channel.publish(venue, &frame) {
                    warn!(error = %e, "market channel publish failed");
                }
            })
            .await;

            match state {
                ws_transport::WsState::Closed { reason } => Err(anyhow::anyhow!("market stream closed: {reason}")),
                ws_transport::WsState::Fail { error } => Err(anyhow::anyhow!(error)),
                ws_transport::WsState::Open => Ok(()),
            }
        }
    })
    .await;
}

/// Runs the keepalive timer for one account's user-data stream, recreating
/// the listen key and reconciling open orders from REST whenever the
/// keepalive or the underlying connection fails — the Core never acts on
/// order state from the private stream payload directly, only from a
/// REST-confirmed reconciliation pass.
async fn run_user_data_stream(
    venue: Venue,
    supervisor: Arc<UserDataSupervisor>,
    account: Account,
    adapter: Arc<dyn ExchangeAdapter>,
    router: Arc<OrderRouter>,
) {
    let label = format!("{venue}-user-data");
    run_with_backoff(&label, move || {
        let supervisor = supervisor.clone();
        let account = account.clone();
        let adapter = adapter.clone();
        let router = router.clone();
        async move {
            let key = supervisor.create_listen_key().await?;

            let in_flight = router.in_flight_orders();
            match supervisor.reconcile_open_orders(&in_flight).await {
                Ok(reports) => {
                    for report in reports {
                        router.correlate_update(report);
                    }
                }
                Err(e) => warn!(venue = %venue, error = %e, "reconciliation on reconnect failed"),
            }

            let url = adapter.user_data_stream_url(&account, &key);
            let (_tx, rx) = mpsc::unbounded_channel::<String>();

            let keepalive = supervisor.keepalive_loop(&key);
            let connection = ws_transport::run_connection(&url, rx, |_raw| {
                // Private-stream pushes are not parsed into OrderReport directly;
                // reconciliation above, and again on the next reconnect, is the
                // source of truth, per the listen-key-race note this follows.
            });

            tokio::select! {
                res = keepalive => res?,
                state = connection => match state {
                    ws_transport::WsState::Closed { reason } => return Err(anyhow::anyhow!("user-data stream closed: {reason}")),
                    ws_transport::WsState::Fail { error } => return Err(anyhow::anyhow!(error)),
                    ws_transport::WsState::Open => {}
                },
            }
            Ok(())
        }
    })
    .await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("trading core starting up");

    let config = CoreConfig::load(CORE_CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load core config, using defaults");
        CoreConfig::default()
    });

    std::fs::create_dir_all(&config.strategy_config_dir)?;
    let registry = Arc::new(StrategyRegistry::load(&config.strategy_config_dir)?);

    let mut adapters: HashMap<(Venue, MarketVariant), Arc<dyn ExchangeAdapter>> = HashMap::new();
    let mut accounts: HashMap<(Venue, MarketVariant), Account> = HashMap::new();
    for strategy in registry.all() {
        let key = (strategy.account.venue, strategy.account.market_variant);
        if adapters.contains_key(&key) {
            continue;
        }
        match build_adapter(&strategy.account) {
            Ok(adapter) => {
                adapters.insert(key, adapter);
                accounts.insert(key, strategy.account.clone());
            }
            Err(e) => error!(
                strategy_id = %strategy.strategy_id,
                venue = %strategy.account.venue,
                variant = %strategy.account.market_variant,
                error = %e,
                "failed to build exchange adapter, strategy's account will be unreachable"
            ),
        }
    }
    info!(count = adapters.len(), "exchange adapters built");

    let (reports_tx, reports_rx) = mpsc::unbounded_channel();

    let market_cache = Arc::new(MarketCache::with_capacities(
        config.kline_capacity,
        config.trade_capacity,
        config.book_capacity,
        config.funding_capacity,
    ));
    let market_channel = Arc::new(MarketChannel::new());
    let report_channel = Arc::new(ReportChannel::new());
    let router = Arc::new(OrderRouter::new(registry.clone(), adapters.clone(), reports_tx));
    let order_channel = Arc::new(OrderChannel::new(router.clone(), registry.clone()));
    let query_facade = Arc::new(QueryFacade::new(
        registry.clone(),
        router.clone(),
        adapters.clone(),
        config.query_facade_token.clone(),
    ));

    for (&(venue, variant), adapter) in &adapters {
        let account = accounts[&(venue, variant)].clone();
        tokio::spawn(run_market_stream(
            venue,
            adapter.clone(),
            account,
            config.symbols.clone(),
            market_cache.clone(),
            market_channel.clone(),
        ));
    }

    for strategy in registry.enabled() {
        let key = (strategy.account.venue, strategy.account.market_variant);
        let Some(adapter) = adapters.get(&key).cloned() else { continue };
        let supervisor = Arc::new(UserDataSupervisor::new(adapter.clone(), strategy.account.clone()));
        tokio::spawn(run_user_data_stream(
            strategy.account.venue,
            supervisor,
            strategy.account.clone(),
            adapter,
            router.clone(),
        ));
    }

    {
        let router = router.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                router.sweep_retired();
            }
        });
    }
    {
        let report_channel = report_channel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                report_channel.prune_closed();
            }
        });
    }

    let market_listener = bind_unix(&config.market_socket_path).await?;
    tokio::spawn(market_channel.clone().serve(market_listener, config.market_socket_path.clone().into()));

    let orders_listener = bind_unix(&config.orders_socket_path).await?;
    tokio::spawn(order_channel.serve(orders_listener, config.orders_socket_path.clone().into()));

    let reports_listener = bind_unix(&config.reports_socket_path).await?;
    tokio::spawn(report_channel.serve(reports_rx, reports_listener, config.reports_socket_path.clone().into()));

    let query_listener = bind_unix(&config.query_socket_path).await?;
    tokio::spawn(query_facade.serve(query_listener, config.query_socket_path.clone().into()));

    info!("all subsystems running, press ctrl+c to stop");

    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received");

    if let Err(e) = config.save(CORE_CONFIG_PATH) {
        error!(error = %e, "failed to save core config on shutdown");
    }

    info!("trading core shut down complete");
    Ok(())
}
