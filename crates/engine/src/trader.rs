// In crates/engine/src/trader.rs

use chrono::{DateTime, Utc};
use core_types::{EntryPlan, ExitReason, MarketState, OrderRequest, Position, Side, Signal, Symbol};
use events::{EngineEvent, EventKind};
use risk::RiskAction;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use strategies::StrategyEngine;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::control::EngineContext;
use crate::feed::MarketDataFeed;

/// What one tick did. Recorded for the health endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub entries: usize,
    pub exits: usize,
    pub blocked: usize,
    pub failed_orders: usize,
    pub aborted: usize,
    pub feed_errors: usize,
    pub close_all: bool,
    /// Trading was skipped because the emergency stop is engaged.
    pub stopped: bool,
}

enum EntryOutcome {
    Opened,
    Blocked,
    CloseAll(String),
    Failed,
    Skipped,
}

/// Runs the tick cycle: market state, signal, risk gate, order, state update.
///
/// Symbols are processed one at a time. The risk manager lock is only taken for
/// in-memory decisions and is never held across a gateway call.
pub struct TradingEngine {
    ctx: EngineContext,
    feed: Arc<dyn MarketDataFeed>,
    strategy: Arc<StrategyEngine>,
    symbols: Vec<Symbol>,
    min_entry_balance: Decimal,
}

impl TradingEngine {
    pub fn new(
        ctx: EngineContext,
        feed: Arc<dyn MarketDataFeed>,
        strategy: Arc<StrategyEngine>,
        symbols: Vec<Symbol>,
        min_entry_balance: Decimal,
    ) -> Self {
        tracing::info!(
            strategy = strategy.strategy_name(),
            symbols = ?symbols,
            venue = ctx.gateway.venue_name(),
            "TradingEngine initialized."
        );
        Self { ctx, feed, strategy, symbols, min_entry_balance }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Ticks every `tick_interval` until cancelled. A tick in progress always completes.
    pub async fn run(&self, tick_interval: Duration, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Tick loop stopping.");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let report = self.run_tick(Utc::now()).await;
                    tracing::debug!(?report, "Tick complete.");
                }
            }
        }
    }

    /// One full cycle over all tracked symbols.
    ///
    /// Protective exits run first over every open position; a symbol closed by one is
    /// not evaluated by the strategy in the same tick. A CLOSE_ALL decision flattens
    /// every position and ends entry processing for the tick.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> TickReport {
        let _cycle = self.ctx.cycle.lock().await;
        let mut report = TickReport::default();

        let open_symbols: Vec<Symbol> = {
            let mut risk = self.ctx.risk.lock().await;
            risk.roll_day_if_needed(now);
            risk.positions().map(|p| p.symbol.clone()).collect()
        };

        // --- 1. Market state for tracked and held symbols ---
        let wanted: BTreeSet<Symbol> = self.symbols.iter().cloned().chain(open_symbols).collect();
        let mut markets = BTreeMap::new();
        for symbol in wanted {
            match self.feed.market_state(&symbol, now).await {
                Ok(market) => {
                    markets.insert(symbol, market);
                }
                Err(e) => {
                    report.feed_errors += 1;
                    self.emit(Some(&symbol), EventKind::TickFailed { error: format!("market data: {e:#}") }, now);
                }
            }
        }

        if self.ctx.control.is_stopped() {
            tracing::warn!("Emergency stop engaged; no orders this tick.");
            report.stopped = true;
            self.ctx.health.record_tick(now, report.clone());
            return report;
        }

        // --- 2. Protective exits ---
        let mut exited = BTreeSet::new();
        let positions: Vec<Position> = self.ctx.risk.lock().await.positions().cloned().collect();
        for position in positions {
            let Some(price) = markets.get(&position.symbol).and_then(MarketState::last_price) else {
                continue;
            };
            if let Some(reason) = position.protective_trigger(price) {
                self.emit(Some(&position.symbol), EventKind::ProtectiveExit { reason, price }, now);
                if self.exit(&position.symbol, price, reason, now, &mut report).await {
                    exited.insert(position.symbol.clone());
                }
            }
        }

        // --- 3. Strategy signals ---
        for symbol in &self.symbols {
            if exited.contains(symbol) {
                continue;
            }
            let Some(market) = markets.get(symbol) else { continue };
            let (current_side, equity) = {
                let risk = self.ctx.risk.lock().await;
                (risk.current_side(symbol), risk.equity().current_equity)
            };

            let signal = match self.strategy.generate_signal(market, current_side, equity) {
                Ok(signal) => signal,
                Err(e) => {
                    report.aborted += 1;
                    self.emit(Some(symbol), EventKind::InvariantViolation { detail: e.to_string() }, now);
                    continue;
                }
            };
            if !matches!(signal, Signal::Hold) {
                tracing::info!(symbol = %symbol, signal = ?signal.kind(), "Strategy generated a signal.");
            }

            if let Some((side, plan)) = signal.entry() {
                match self.enter(symbol, side, plan, now, &mut report).await {
                    EntryOutcome::CloseAll(reason) => {
                        self.flatten_all(&reason, ExitReason::CloseAll, &markets, now, &mut report).await;
                        report.close_all = true;
                        break;
                    }
                    EntryOutcome::Opened => report.entries += 1,
                    EntryOutcome::Blocked => report.blocked += 1,
                    EntryOutcome::Failed | EntryOutcome::Skipped => {}
                }
            } else if let Some(side) = signal.exit_side() {
                // Exits never pass through the risk gate.
                if current_side == Some(side) {
                    if let Some(price) = market.last_price() {
                        self.exit(symbol, price, ExitReason::Signal, now, &mut report).await;
                    }
                }
            }
        }

        self.ctx.health.record_tick(now, report.clone());
        report
    }

    /// Closes every open position, fetching fresh prices. Used on shutdown.
    pub async fn flatten(&self, why: &str, reason: ExitReason, now: DateTime<Utc>) -> TickReport {
        let _cycle = self.ctx.cycle.lock().await;
        let mut report = TickReport::default();
        let symbols: Vec<Symbol> = self.ctx.risk.lock().await.positions().map(|p| p.symbol.clone()).collect();
        let mut markets = BTreeMap::new();
        for symbol in symbols {
            if let Ok(market) = self.feed.market_state(&symbol, now).await {
                markets.insert(symbol, market);
            }
        }
        self.flatten_all(why, reason, &markets, now, &mut report).await;
        report
    }

    async fn flatten_all(
        &self,
        why: &str,
        reason: ExitReason,
        markets: &BTreeMap<Symbol, MarketState>,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        let positions: Vec<Position> = self.ctx.risk.lock().await.positions().cloned().collect();
        self.emit(
            None,
            EventKind::CloseAll { reason: why.to_string(), open_positions: positions.len() },
            now,
        );
        for position in positions {
            let price = markets
                .get(&position.symbol)
                .and_then(MarketState::last_price)
                .unwrap_or(position.entry_price);
            self.exit(&position.symbol, price, reason, now, report).await;
        }
    }

    /// Gate, place and register one entry.
    async fn enter(
        &self,
        symbol: &Symbol,
        side: Side,
        plan: &EntryPlan,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> EntryOutcome {
        if self.ctx.control.is_stopped() {
            return EntryOutcome::Skipped;
        }

        // --- 1. Free balance ---
        if self.min_entry_balance > Decimal::ZERO {
            match self.ctx.gateway.get_balances().await {
                Ok(account) if account.available_balance < self.min_entry_balance => {
                    tracing::warn!(
                        symbol = %symbol,
                        available = %account.available_balance,
                        minimum = %self.min_entry_balance,
                        "Available balance below minimum; skipping entry."
                    );
                    return EntryOutcome::Skipped;
                }
                Ok(_) => {}
                Err(e) => {
                    self.emit(Some(symbol), EventKind::TickFailed { error: format!("balance check: {e}") }, now);
                    return EntryOutcome::Skipped;
                }
            }
        }

        // --- 2. Risk gate, reserving the slot on approval ---
        let decision = self.ctx.risk.lock().await.reserve_entry(symbol, plan.size, side, now);
        self.emit(
            Some(symbol),
            EventKind::RiskDecision {
                side,
                action: decision.action,
                requested_size: plan.size,
                adjusted_size: decision.adjusted_size,
                reason: decision.reason.clone(),
            },
            now,
        );
        let size = match (decision.action, decision.approved_size()) {
            (RiskAction::CloseAll, _) => return EntryOutcome::CloseAll(decision.reason),
            (RiskAction::Allow | RiskAction::ReduceSize, Some(size)) => size,
            _ => return EntryOutcome::Blocked,
        };

        // --- 3. Order ---
        let order = OrderRequest::market(symbol.clone(), side, size, plan.reference_price);
        let fill = match self.ctx.gateway.place_order(&order).await {
            Ok(fill) => fill,
            Err(e) => {
                self.ctx.risk.lock().await.release_entry(symbol);
                report.failed_orders += 1;
                self.emit(
                    Some(symbol),
                    EventKind::OrderFailed { side, size, reduce_only: false, error: e.to_string() },
                    now,
                );
                return EntryOutcome::Failed;
            }
        };
        self.emit(Some(symbol), EventKind::OrderFilled(fill.clone()), now);

        // --- 4. Protective levels on the actual fill, then registration ---
        let registered = match self.strategy.levels_for_fill(symbol, side, plan, fill.price, fill.quantity) {
            Ok(levels) => {
                let position = Position {
                    symbol: symbol.clone(),
                    side,
                    entry_price: fill.price,
                    size: fill.quantity,
                    stop_loss: levels.stop_loss,
                    take_profit: levels.take_profit,
                    opened_at: fill.filled_at,
                };
                self.ctx
                    .risk
                    .lock()
                    .await
                    .register_position(position.clone())
                    .map(|()| position)
                    .map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        };

        match registered {
            Ok(position) => {
                self.emit(Some(symbol), EventKind::PositionOpened(position), now);
                EntryOutcome::Opened
            }
            Err(detail) => {
                // Never leave an unprotected fill on the venue.
                self.ctx.risk.lock().await.release_entry(symbol);
                report.aborted += 1;
                self.emit(Some(symbol), EventKind::InvariantViolation { detail }, now);
                self.unwind(symbol, side, fill.quantity, fill.price, now, report).await;
                EntryOutcome::Failed
            }
        }
    }

    /// Flattens a fill that could not be registered.
    async fn unwind(
        &self,
        symbol: &Symbol,
        side: Side,
        quantity: Decimal,
        price: Decimal,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        let mut order = OrderRequest::market(symbol.clone(), side.opposite(), quantity, price);
        order.reduce_only = true;
        match self.ctx.gateway.place_order(&order).await {
            Ok(fill) => self.emit(Some(symbol), EventKind::OrderFilled(fill), now),
            Err(e) => {
                report.failed_orders += 1;
                self.emit(
                    Some(symbol),
                    EventKind::OrderFailed {
                        side: order.side,
                        size: quantity,
                        reduce_only: true,
                        error: e.to_string(),
                    },
                    now,
                );
            }
        }
    }

    /// Closes the position for `symbol`. Returns true once the exit is confirmed.
    async fn exit(
        &self,
        symbol: &Symbol,
        price: Decimal,
        reason: ExitReason,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> bool {
        if self.ctx.control.is_stopped() {
            return false;
        }
        let position = match self.ctx.risk.lock().await.begin_exit(symbol) {
            Ok(position) => position,
            Err(e) => {
                tracing::debug!(symbol = %symbol, error = %e, "Nothing to close.");
                return false;
            }
        };

        let order = OrderRequest::closing(&position, price);
        let fill = match self.ctx.gateway.place_order(&order).await {
            Ok(fill) => fill,
            Err(e) => {
                self.ctx.risk.lock().await.abort_exit(symbol);
                report.failed_orders += 1;
                self.emit(
                    Some(symbol),
                    EventKind::OrderFailed {
                        side: order.side,
                        size: order.size,
                        reduce_only: true,
                        error: e.to_string(),
                    },
                    now,
                );
                return false;
            }
        };
        self.emit(Some(symbol), EventKind::OrderFilled(fill.clone()), now);
        if fill.quantity < position.size {
            tracing::warn!(
                symbol = %symbol,
                filled = %fill.quantity,
                size = %position.size,
                "Exit filled partially; the remainder stays open."
            );
        }

        let closed = {
            let mut risk = self.ctx.risk.lock().await;
            risk.reduce_position(symbol, fill.quantity, fill.price, fill.filled_at, reason)
                .map(|_| risk.last_closed_trade().cloned())
        };
        match closed {
            Ok(trade) => {
                if let Some(trade) = trade {
                    self.emit(Some(symbol), EventKind::PositionClosed(trade), now);
                }
                report.exits += 1;
                true
            }
            Err(e) => {
                self.ctx.risk.lock().await.abort_exit(symbol);
                self.emit(Some(symbol), EventKind::InvariantViolation { detail: e.to_string() }, now);
                false
            }
        }
    }

    fn emit(&self, symbol: Option<&Symbol>, event: EventKind, now: DateTime<Utc>) {
        self.ctx.events.emit(EngineEvent::new(symbol.cloned(), event, now));
    }
}
