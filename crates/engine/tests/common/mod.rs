// In crates/engine/tests/common/mod.rs

#![allow(dead_code)]

use app_config::PaperSettings;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Kline, MarketState, OrderRequest, OrderToken, SignalKind, Symbol};
use engine::{EngineContext, HealthState, MarketDataFeed, StateReconciler, TradingEngine};
use events::EventBus;
use execution::{ExchangeGateway, RetryPolicy, SimulatedVenue, Venue, VenueAccount, VenueError, VenueOrder};
use risk::{RiskManager, RiskSettings};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strategies::{Assessment, SizingSettings, Strategy, StrategyEngine};

/// Serves a flat kline history ending at the price set for each symbol.
#[derive(Default)]
pub struct ScriptedFeed {
    prices: Mutex<HashMap<Symbol, Decimal>>,
}

impl ScriptedFeed {
    pub fn set(&self, symbol: &str, price: Decimal) {
        self.prices.lock().unwrap().insert(Symbol::from(symbol), price);
    }
}

#[async_trait]
impl MarketDataFeed for ScriptedFeed {
    async fn market_state(&self, symbol: &Symbol, now: DateTime<Utc>) -> anyhow::Result<MarketState> {
        let Some(price) = self.prices.lock().unwrap().get(symbol).copied() else {
            anyhow::bail!("no price for {symbol}");
        };
        let klines = (0..30)
            .map(|i| Kline {
                open_time: i * 60_000,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: dec!(1),
                close_time: i * 60_000 + 59_999,
            })
            .collect();
        Ok(MarketState::new(symbol.clone(), klines, now))
    }
}

/// Readings per symbol, shared between a test and its strategy.
#[derive(Clone, Default)]
pub struct Script(Arc<Mutex<HashMap<Symbol, SignalKind>>>);

impl Script {
    pub fn set(&self, symbol: &str, kind: SignalKind) {
        self.0.lock().unwrap().insert(Symbol::from(symbol), kind);
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

pub struct ScriptedStrategy(Script);

impl Strategy for ScriptedStrategy {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn evaluate(&self, market: &MarketState, _current_side: Option<core_types::Side>) -> Assessment {
        match self.0.0.lock().unwrap().get(&market.symbol) {
            Some(kind) => Assessment::new(*kind, "scripted"),
            None => Assessment::hold("no reading"),
        }
    }
}

/// Paper venue whose account snapshot can be told to lag behind its fills.
pub struct LaggingVenue {
    inner: Arc<SimulatedVenue>,
    hide_positions: AtomicBool,
}

impl LaggingVenue {
    pub fn new(inner: Arc<SimulatedVenue>) -> Self {
        Self { inner, hide_positions: AtomicBool::new(false) }
    }

    /// While set, `account()` reports no positions.
    pub fn set_lagging(&self, lagging: bool) {
        self.hide_positions.store(lagging, Ordering::SeqCst);
    }
}

#[async_trait]
impl Venue for LaggingVenue {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<VenueOrder, VenueError> {
        self.inner.submit_order(order).await
    }

    async fn find_order(&self, symbol: &Symbol, token: &OrderToken) -> Result<Option<VenueOrder>, VenueError> {
        self.inner.find_order(symbol, token).await
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<(), VenueError> {
        self.inner.cancel_order(symbol, order_id).await
    }

    async fn account(&self) -> Result<VenueAccount, VenueError> {
        let mut account = self.inner.account().await?;
        if self.hide_positions.load(Ordering::SeqCst) {
            account.positions.clear();
        }
        Ok(account)
    }
}

pub struct Harness {
    pub trader: TradingEngine,
    pub reconciler: StateReconciler,
    pub ctx: EngineContext,
    pub venue: Arc<SimulatedVenue>,
    pub lag: Arc<LaggingVenue>,
    pub feed: Arc<ScriptedFeed>,
    pub script: Script,
}

/// Sizes entries at 10 units for a price of 100 with default stops (7% / 21%).
pub fn sizing() -> SizingSettings {
    SizingSettings { max_equity_fraction: dec!(0.1), ..SizingSettings::default() }
}

pub fn harness(symbols: &[&str], risk: RiskSettings, sizing: SizingSettings) -> Harness {
    let venue = Arc::new(SimulatedVenue::new(&PaperSettings {
        initial_balance: dec!(10000),
        taker_fee: Decimal::ZERO,
        slippage: Decimal::ZERO,
    }));
    let policy = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
        multiplier: 2.0,
        jitter: 0.0,
    };
    let lag = Arc::new(LaggingVenue::new(venue.clone()));
    let gateway = Arc::new(ExchangeGateway::with_policy(
        lag.clone() as Arc<dyn Venue>,
        policy,
        Duration::from_secs(5),
    ));
    let manager = RiskManager::new(risk, dec!(10000), Utc::now()).unwrap();
    let health = HealthState::new(Duration::from_secs(180), Duration::from_secs(600));
    let ctx = EngineContext::new(manager, gateway, EventBus::new(64), health);

    let script = Script::default();
    let strategy =
        Arc::new(StrategyEngine::new(Box::new(ScriptedStrategy(script.clone())), sizing).unwrap());
    let feed = Arc::new(ScriptedFeed::default());
    for symbol in symbols {
        feed.set(symbol, dec!(100));
    }

    let trader = TradingEngine::new(
        ctx.clone(),
        feed.clone(),
        strategy.clone(),
        symbols.iter().map(|s| Symbol::from(*s)).collect(),
        dec!(10),
    );
    let reconciler = StateReconciler::new(ctx.clone(), strategy);
    Harness { trader, reconciler, ctx, venue, lag, feed, script }
}
