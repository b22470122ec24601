// In crates/risk/src/manager.rs

use chrono::{DateTime, Duration, Utc};
use core_types::{ExitReason, Position, Side, Symbol};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, VecDeque};

use crate::types::{
    ClosedTrade, DiscrepancyKind, EquityState, ExchangeView, ReconcileOutcome,
    ReconciliationEvent, RiskDecision, RiskSettings, RiskSnapshot,
};
use crate::{Error, Result};

const JOURNAL_SIZE: usize = 100;
const RECONCILIATION_LOG_SIZE: usize = 50;

/// An order the engine has committed to but whose fill is not yet confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlight {
    Entry,
    Exit,
}

/// Authoritative holder of open positions and account equity.
///
/// All mutation goes through the methods below. Callers share one instance behind a
/// mutex and must release it before awaiting a network call; the in-flight markers
/// (`reserve_entry`, `begin_exit`) keep decisions consistent across that gap.
///
/// Per symbol the manager walks `NoPosition -> PositionOpen -> NoPosition`: a position
/// is created only by `register_position` after a confirmed fill and destroyed only by
/// `close_position` (or by reconciliation, in favour of the exchange).
#[derive(Debug)]
pub struct RiskManager {
    settings: RiskSettings,
    equity: EquityState,
    positions: BTreeMap<Symbol, Position>,
    in_flight: BTreeMap<Symbol, InFlight>,
    consecutive_losses: u32,
    last_loss_at: Option<DateTime<Utc>>,
    daily_trade_count: u32,
    journal: VecDeque<ClosedTrade>,
    consecutive_divergences: u32,
    reconciliation_log: VecDeque<ReconciliationEvent>,
    halted: Option<String>,
}

impl RiskManager {
    /// Creates a manager for an account holding `starting_equity` at `now`.
    pub fn new(settings: RiskSettings, starting_equity: Decimal, now: DateTime<Utc>) -> Result<Self> {
        settings.validate()?;
        let equity = EquityState {
            current_equity: starting_equity,
            daily_starting_equity: starting_equity,
            daily_realized_pnl: Decimal::ZERO,
            daily_loss_limit: settings.daily_loss_limit_for(starting_equity),
            peak_equity: starting_equity,
            trading_day: now.date_naive(),
        };
        tracing::info!(
            equity = %starting_equity,
            daily_loss_limit = %equity.daily_loss_limit,
            max_drawdown = %settings.max_drawdown,
            max_positions = settings.max_open_positions,
            "RiskManager initialized."
        );
        Ok(Self {
            settings,
            equity,
            positions: BTreeMap::new(),
            in_flight: BTreeMap::new(),
            consecutive_losses: 0,
            last_loss_at: None,
            daily_trade_count: 0,
            journal: VecDeque::with_capacity(JOURNAL_SIZE),
            consecutive_divergences: 0,
            reconciliation_log: VecDeque::with_capacity(RECONCILIATION_LOG_SIZE),
            halted: None,
        })
    }

    // --- Read accessors ---

    pub fn settings(&self) -> &RiskSettings {
        &self.settings
    }

    pub fn equity(&self) -> &EquityState {
        &self.equity
    }

    pub fn position(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Open positions in symbol order.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }

    /// The side of the open position for `symbol`, if any.
    pub fn current_side(&self, symbol: &Symbol) -> Option<Side> {
        self.positions.get(symbol).map(|p| p.side)
    }

    pub fn has_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    /// The most recently closed trade in the journal.
    pub fn last_closed_trade(&self) -> Option<&ClosedTrade> {
        self.journal.back()
    }

    /// Fractional drawdown of current equity from peak equity.
    pub fn current_drawdown(&self) -> Decimal {
        if self.equity.peak_equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.equity.peak_equity - self.equity.current_equity) / self.equity.peak_equity).max(Decimal::ZERO)
    }

    /// True once the day's realized loss has reached the daily limit.
    pub fn daily_loss_breached(&self) -> bool {
        self.equity.daily_realized_pnl <= -self.equity.daily_loss_limit
    }

    // --- Day boundary ---

    /// Resets the daily counters when `now` falls on a later UTC day.
    ///
    /// Open positions are kept; rollover never flattens.
    pub fn roll_day_if_needed(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if today <= self.equity.trading_day {
            return false;
        }
        self.equity.trading_day = today;
        self.equity.daily_starting_equity = self.equity.current_equity;
        self.equity.daily_realized_pnl = Decimal::ZERO;
        self.equity.daily_loss_limit = self.settings.daily_loss_limit_for(self.equity.current_equity);
        self.daily_trade_count = 0;
        tracing::info!(
            day = %today,
            starting_equity = %self.equity.daily_starting_equity,
            daily_loss_limit = %self.equity.daily_loss_limit,
            open_positions = self.positions.len(),
            "Daily risk counters reset."
        );
        true
    }

    // --- The gate ---

    /// Evaluates a proposed entry against the capital-protection rules.
    ///
    /// Rules run in fixed precedence and the first failing rule wins:
    /// 1. capital preservation (daily loss, max drawdown, halt, loss cooldown)
    /// 2. position count and duplicate symbol
    /// 3. sizing (drawdown warning zone, per-symbol exposure cap)
    ///
    /// The result depends only on the current state, the proposed trade and `now`.
    pub fn check_trade_allowed(
        &self,
        symbol: &Symbol,
        proposed_size: Decimal,
        side: Side,
        now: DateTime<Utc>,
    ) -> RiskDecision {
        let open = self.positions.len();

        // --- 1. Capital preservation ---
        if self.daily_loss_breached() {
            let reason = format!(
                "daily loss limit breached: realized {} against limit {}",
                self.equity.daily_realized_pnl, self.equity.daily_loss_limit
            );
            return self.block_or_flatten(open, reason);
        }

        let drawdown = self.current_drawdown();
        if drawdown >= self.settings.max_drawdown {
            let reason = format!(
                "max drawdown exceeded: {}% >= {}%",
                (drawdown * dec!(100)).round_dp(2),
                (self.settings.max_drawdown * dec!(100)).round_dp(2)
            );
            return self.block_or_flatten(open, reason);
        }

        if let Some(halt) = &self.halted {
            return RiskDecision::block(format!("entries halted: {halt}"));
        }

        if let Some(until) = self.cooldown_until() {
            if now < until {
                return RiskDecision::block(format!(
                    "cooldown after {} consecutive losses, {}s remaining",
                    self.consecutive_losses,
                    (until - now).num_seconds()
                ));
            }
        }

        // --- 2. Position count ---
        let already_open = self.positions.contains_key(symbol) || self.in_flight.contains_key(symbol);
        let pending_entries = self
            .in_flight
            .iter()
            .filter(|(s, f)| matches!(f, InFlight::Entry) && !self.positions.contains_key(*s))
            .count();
        if open + pending_entries >= self.settings.max_open_positions && !already_open {
            return RiskDecision::block(format!(
                "max positions reached: {}/{}",
                open + pending_entries,
                self.settings.max_open_positions
            ));
        }
        if already_open {
            return RiskDecision::block(format!("position already exists for {symbol}"));
        }

        // --- 3. Sizing ---
        if proposed_size <= Decimal::ZERO {
            return RiskDecision::block(format!("proposed size must be positive, got {proposed_size}"));
        }

        let mut adjusted = proposed_size;
        let mut reasons = Vec::new();
        if drawdown >= self.settings.max_drawdown * self.settings.drawdown_warning_ratio {
            adjusted /= dec!(2);
            reasons.push(format!("drawdown warning zone ({}%)", (drawdown * dec!(100)).round_dp(2)));
        }
        let cap = self.settings.exposure_cap(symbol);
        if adjusted > cap {
            adjusted = cap;
            reasons.push(format!("per-symbol exposure cap {cap} for {symbol}"));
        }

        if adjusted < proposed_size {
            RiskDecision::reduce(
                adjusted,
                format!("size reduced from {proposed_size} to {adjusted}: {}", reasons.join(", ")),
            )
        } else {
            RiskDecision::allow(proposed_size, format!("{side} {proposed_size} {symbol} allowed"))
        }
    }

    /// Runs the gate and, when it passes, marks an entry for `symbol` as in flight.
    ///
    /// The marker counts against the position cap and the duplicate check until
    /// `register_position` or `release_entry` clears it, so two callers can never both
    /// pass the gate for the same slot.
    pub fn reserve_entry(
        &mut self,
        symbol: &Symbol,
        proposed_size: Decimal,
        side: Side,
        now: DateTime<Utc>,
    ) -> RiskDecision {
        let decision = self.check_trade_allowed(symbol, proposed_size, side, now);
        if decision.approved_size().is_some() {
            self.in_flight.insert(symbol.clone(), InFlight::Entry);
        }
        decision
    }

    /// Clears an entry reservation after a failed or abandoned order.
    pub fn release_entry(&mut self, symbol: &Symbol) {
        if let Some(InFlight::Entry) = self.in_flight.get(symbol) {
            self.in_flight.remove(symbol);
        }
    }

    /// Marks an exit for `symbol` as in flight and returns the position being closed.
    pub fn begin_exit(&mut self, symbol: &Symbol) -> Result<Position> {
        let position = self
            .positions
            .get(symbol)
            .cloned()
            .ok_or_else(|| Error::UnknownPosition(symbol.clone()))?;
        self.in_flight.insert(symbol.clone(), InFlight::Exit);
        Ok(position)
    }

    /// Clears an exit marker after the closing order failed; the position stays open.
    pub fn abort_exit(&mut self, symbol: &Symbol) {
        if let Some(InFlight::Exit) = self.in_flight.get(symbol) {
            self.in_flight.remove(symbol);
        }
    }

    // --- Position lifecycle ---

    /// Records a position after its entry fill is confirmed.
    ///
    /// A second registration for the same symbol is a coordination bug upstream: it is
    /// logged and rejected, never allowed to overwrite.
    pub fn register_position(&mut self, position: Position) -> Result<()> {
        if self.positions.contains_key(&position.symbol) {
            tracing::error!(
                symbol = %position.symbol,
                "Refusing to register a second position for the same symbol."
            );
            return Err(Error::DuplicatePosition(position.symbol));
        }
        if !position.stop_is_protective() {
            tracing::error!(
                symbol = %position.symbol,
                entry = %position.entry_price,
                stop_loss = %position.stop_loss,
                "Refusing to register a position without a protective stop-loss."
            );
            return Err(Error::UnprotectedPosition {
                symbol: position.symbol,
                entry_price: position.entry_price,
                stop_loss: position.stop_loss,
            });
        }

        self.in_flight.remove(&position.symbol);
        self.daily_trade_count += 1;
        tracing::info!(
            symbol = %position.symbol,
            side = %position.side,
            entry = %position.entry_price,
            size = %position.size,
            stop_loss = %position.stop_loss,
            take_profit = %position.take_profit,
            "Position registered."
        );
        self.positions.insert(position.symbol.clone(), position);
        Ok(())
    }

    /// Removes the position after its exit fill and books the realized P&L.
    ///
    /// Returns `(exit_price - entry_price) * size * direction_sign`.
    pub fn close_position(
        &mut self,
        symbol: &Symbol,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
        reason: ExitReason,
    ) -> Result<Decimal> {
        let position = self
            .positions
            .remove(symbol)
            .ok_or_else(|| Error::UnknownPosition(symbol.clone()))?;
        self.in_flight.remove(symbol);
        Ok(self.book_exit(position, exit_price, exit_time, reason))
    }

    /// Books an exit fill of `quantity` units.
    ///
    /// P&L is realized on the filled quantity only. A partial fill leaves the
    /// remainder open with its stop-loss and take-profit unchanged; a fill covering
    /// the whole position closes it.
    pub fn reduce_position(
        &mut self,
        symbol: &Symbol,
        quantity: Decimal,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
        reason: ExitReason,
    ) -> Result<Decimal> {
        if quantity <= Decimal::ZERO {
            return Err(Error::InvalidParameters(format!("exit quantity {quantity} must be positive")));
        }
        let position = self
            .positions
            .get_mut(symbol)
            .ok_or_else(|| Error::UnknownPosition(symbol.clone()))?;
        if quantity >= position.size {
            return self.close_position(symbol, exit_price, exit_time, reason);
        }

        let mut filled = position.clone();
        filled.size = quantity;
        position.size -= quantity;
        let remaining = position.size;
        self.in_flight.remove(symbol);

        let pnl = self.book_exit(filled, exit_price, exit_time, reason);
        tracing::warn!(symbol = %symbol, filled = %quantity, remaining = %remaining, "Position partially closed.");
        Ok(pnl)
    }

    fn book_exit(
        &mut self,
        position: Position,
        exit_price: Decimal,
        exit_time: DateTime<Utc>,
        reason: ExitReason,
    ) -> Decimal {
        let symbol = position.symbol.clone();
        let pnl = position.pnl_at(exit_price);
        self.equity.current_equity += pnl;
        self.equity.daily_realized_pnl += pnl;
        self.equity.peak_equity = self.equity.peak_equity.max(self.equity.current_equity);

        if pnl < Decimal::ZERO {
            self.consecutive_losses += 1;
            self.last_loss_at = Some(exit_time);
        } else {
            self.consecutive_losses = 0;
        }

        let notional = position.entry_price * position.size;
        let pnl_percent = if notional.is_zero() {
            Decimal::ZERO
        } else {
            (pnl / notional * dec!(100)).round_dp(4)
        };
        if self.journal.len() >= JOURNAL_SIZE {
            self.journal.pop_front();
        }
        self.journal.push_back(ClosedTrade {
            symbol: symbol.clone(),
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            size: position.size,
            pnl,
            pnl_percent,
            entry_time: position.opened_at,
            exit_time,
            reason,
        });

        tracing::info!(
            symbol = %symbol,
            pnl = %pnl,
            pnl_percent = %pnl_percent,
            daily_realized_pnl = %self.equity.daily_realized_pnl,
            reason = %reason,
            "Position closed."
        );
        pnl
    }

    // --- Reconciliation ---

    /// Compares an external equity figure with the locally derived one.
    ///
    /// Beyond tolerance the external figure wins and a reconciliation event is returned.
    pub fn update_equity(&mut self, external_equity: Decimal, now: DateTime<Utc>) -> Option<ReconciliationEvent> {
        let local = self.equity.current_equity;
        let tolerance = self
            .settings
            .equity_tolerance
            .max(local.abs() * self.settings.equity_tolerance_pct);
        let event = if (external_equity - local).abs() > tolerance {
            tracing::warn!(
                local = %local,
                exchange = %external_equity,
                tolerance = %tolerance,
                "Equity diverged from exchange; adopting exchange figure."
            );
            self.equity.current_equity = external_equity;
            Some(self.record(ReconciliationEvent {
                kind: DiscrepancyKind::Equity,
                symbol: None,
                local: local.to_string(),
                exchange: external_equity.to_string(),
                at: now,
            }))
        } else {
            None
        };
        self.equity.peak_equity = self.equity.peak_equity.max(self.equity.current_equity);
        event
    }

    /// Merges the exchange's view of equity and positions into local state.
    ///
    /// Deferred while any order is in flight so a fill that the exchange has not yet
    /// reported cannot be overwritten. Repeated divergence halts new entries.
    pub fn reconcile(&mut self, view: &ExchangeView, now: DateTime<Utc>) -> ReconcileOutcome {
        if !self.in_flight.is_empty() {
            return ReconcileOutcome::Deferred { in_flight: self.in_flight.len() };
        }

        let mut events = Vec::new();
        if let Some(event) = self.update_equity(view.equity, now) {
            events.push(event);
        }

        // Positions the exchange no longer reports. A fill newer than the grace window
        // may simply not be in the snapshot yet.
        let stale: Vec<Symbol> = self
            .positions
            .values()
            .filter(|p| !view.positions.iter().any(|r| r.symbol == p.symbol))
            .filter(|p| {
                let lagging = self.within_lag_grace(p.opened_at, now);
                if lagging {
                    tracing::debug!(symbol = %p.symbol, "Recent position missing from exchange snapshot; keeping it.");
                }
                !lagging
            })
            .map(|p| p.symbol.clone())
            .collect();
        for symbol in stale {
            if let Some(local) = self.positions.remove(&symbol) {
                tracing::warn!(symbol = %symbol, "Exchange reports no position; dropping local position.");
                events.push(self.record(ReconciliationEvent {
                    kind: DiscrepancyKind::StalePosition,
                    symbol: Some(symbol),
                    local: describe(&local),
                    exchange: "flat".to_string(),
                    at: now,
                }));
            }
        }

        for reported in &view.positions {
            let adopted = Position {
                symbol: reported.symbol.clone(),
                side: reported.side,
                entry_price: reported.entry_price,
                size: reported.size,
                stop_loss: reported.stop_loss,
                take_profit: reported.take_profit,
                opened_at: now,
            };
            match self.positions.get(&reported.symbol).cloned() {
                None if self.recently_closed(&reported.symbol, now) => {
                    tracing::debug!(
                        symbol = %reported.symbol,
                        "Exchange still reports a position closed moments ago; not adopting it yet."
                    );
                }
                None => {
                    if !adopted.stop_is_protective() {
                        let reason = format!("cannot adopt {} without a protective stop-loss", reported.symbol);
                        self.halt(reason.clone());
                        return ReconcileOutcome::Halted { reason, events };
                    }
                    tracing::warn!(symbol = %reported.symbol, "Exchange reports an unknown position; adopting it.");
                    events.push(self.record(ReconciliationEvent {
                        kind: DiscrepancyKind::UnknownPosition,
                        symbol: Some(reported.symbol.clone()),
                        local: "flat".to_string(),
                        exchange: describe(&adopted),
                        at: now,
                    }));
                    self.positions.insert(reported.symbol.clone(), adopted);
                }
                Some(local) => {
                    let size_diff = (local.size - reported.size).abs();
                    if local.side == reported.side
                        && size_diff <= self.settings.position_size_tolerance
                    {
                        continue;
                    }
                    let mut merged = adopted.clone();
                    merged.opened_at = local.opened_at;
                    if local.side == reported.side {
                        merged.stop_loss = local.stop_loss;
                        merged.take_profit = local.take_profit;
                        if !merged.stop_is_protective() {
                            merged.stop_loss = reported.stop_loss;
                            merged.take_profit = reported.take_profit;
                        }
                    }
                    if !merged.stop_is_protective() {
                        let reason = format!("cannot correct {} without a protective stop-loss", reported.symbol);
                        self.halt(reason.clone());
                        return ReconcileOutcome::Halted { reason, events };
                    }
                    tracing::warn!(symbol = %reported.symbol, "Position diverged from exchange; adopting exchange view.");
                    events.push(self.record(ReconciliationEvent {
                        kind: DiscrepancyKind::PositionMismatch,
                        symbol: Some(reported.symbol.clone()),
                        local: describe(&local),
                        exchange: describe(&merged),
                        at: now,
                    }));
                    self.positions.insert(reported.symbol.clone(), merged);
                }
            }
        }

        if events.is_empty() {
            self.consecutive_divergences = 0;
            return ReconcileOutcome::InSync;
        }

        self.consecutive_divergences += 1;
        if self.consecutive_divergences >= self.settings.max_consecutive_divergences {
            let reason = format!(
                "state diverged from exchange on {} consecutive reconciliations",
                self.consecutive_divergences
            );
            self.halt(reason.clone());
            return ReconcileOutcome::Halted { reason, events };
        }
        ReconcileOutcome::Corrected(events)
    }

    /// Stops new entries until an operator calls `resume`.
    pub fn halt(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!(reason = %reason, "New entries halted.");
        self.halted = Some(reason);
    }

    /// Operator intervention: clears a halt and the divergence counter.
    pub fn resume(&mut self) {
        if let Some(reason) = self.halted.take() {
            tracing::warn!(previous_reason = %reason, "Entry halt cleared by operator.");
        }
        self.consecutive_divergences = 0;
    }

    // --- Reporting ---

    pub fn snapshot(&self) -> RiskSnapshot {
        let wins = self.journal.iter().filter(|t| t.pnl > Decimal::ZERO).count();
        let win_rate = if self.journal.is_empty() {
            Decimal::ZERO
        } else {
            Decimal::from(wins) / Decimal::from(self.journal.len())
        };
        let daily_drawdown = if self.equity.daily_starting_equity > Decimal::ZERO
            && self.equity.daily_realized_pnl < Decimal::ZERO
        {
            -self.equity.daily_realized_pnl / self.equity.daily_starting_equity
        } else {
            Decimal::ZERO
        };
        RiskSnapshot {
            equity: self.equity.clone(),
            daily_drawdown,
            drawdown: self.current_drawdown(),
            open_positions: self.positions.values().cloned().collect(),
            in_flight: self.in_flight.len(),
            daily_trades: self.daily_trade_count,
            win_rate,
            consecutive_losses: self.consecutive_losses,
            halted: self.halted.clone(),
            recent_trades: self.journal.iter().rev().take(5).cloned().collect(),
            recent_reconciliations: self.reconciliation_log.iter().rev().take(5).cloned().collect(),
        }
    }

    // --- Helpers ---

    fn block_or_flatten(&self, open: usize, reason: String) -> RiskDecision {
        if open > 0 {
            RiskDecision::close_all(reason)
        } else {
            RiskDecision::block(reason)
        }
    }

    fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        if self.settings.cooldown_after_losses == 0
            || self.consecutive_losses < self.settings.cooldown_after_losses
        {
            return None;
        }
        self.last_loss_at
            .map(|at| at + Duration::seconds(self.settings.cooldown_secs))
    }

    fn within_lag_grace(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - at <= Duration::seconds(self.settings.position_lag_grace_secs)
    }

    fn recently_closed(&self, symbol: &Symbol, now: DateTime<Utc>) -> bool {
        self.journal
            .iter()
            .rev()
            .find(|t| &t.symbol == symbol)
            .is_some_and(|t| self.within_lag_grace(t.exit_time, now))
    }

    fn record(&mut self, event: ReconciliationEvent) -> ReconciliationEvent {
        if self.reconciliation_log.len() >= RECONCILIATION_LOG_SIZE {
            self.reconciliation_log.pop_front();
        }
        self.reconciliation_log.push_back(event.clone());
        event
    }
}

fn describe(position: &Position) -> String {
    format!("{} {} @ {}", position.side, position.size, position.entry_price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ReportedPosition, RiskAction};
    use chrono::TimeZone;
    use proptest::prelude::*;
    use test_case::test_case;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn settings() -> RiskSettings {
        RiskSettings {
            daily_loss_limit_usd: dec!(500),
            cooldown_after_losses: 0,
            ..RiskSettings::default()
        }
    }

    fn manager() -> RiskManager {
        RiskManager::new(settings(), dec!(10000), t0()).unwrap()
    }

    fn long(symbol: &str, entry: Decimal, size: Decimal) -> Position {
        Position {
            symbol: Symbol::from(symbol),
            side: Side::Long,
            entry_price: entry,
            size,
            stop_loss: entry * dec!(0.93),
            take_profit: entry * dec!(1.21),
            opened_at: t0(),
        }
    }

    fn short(symbol: &str, entry: Decimal, size: Decimal) -> Position {
        Position {
            side: Side::Short,
            stop_loss: entry * dec!(1.07),
            take_profit: entry * dec!(0.79),
            ..long(symbol, entry, size)
        }
    }

    #[test]
    fn daily_loss_breach_blocks_when_flat() {
        let mut rm = manager();
        rm.register_position(long("BTCUSDT", dec!(100), dec!(10))).unwrap();
        let pnl = rm.close_position(&Symbol::from("BTCUSDT"), dec!(40), t0(), ExitReason::Signal).unwrap();
        assert_eq!(pnl, dec!(-600));

        let decision = rm.check_trade_allowed(&Symbol::from("ETHUSDT"), dec!(1), Side::Long, t0());
        assert_eq!(decision.action, RiskAction::Block);
        assert!(decision.reason.contains("daily loss limit"));
        assert_eq!(decision.adjusted_size, None);
    }

    #[test]
    fn daily_loss_breach_flattens_when_positions_are_open() {
        let mut rm = manager();
        rm.register_position(long("BTCUSDT", dec!(100), dec!(10))).unwrap();
        rm.register_position(long("SOLUSDT", dec!(20), dec!(5))).unwrap();
        rm.close_position(&Symbol::from("BTCUSDT"), dec!(40), t0(), ExitReason::Signal).unwrap();

        let decision = rm.check_trade_allowed(&Symbol::from("ETHUSDT"), dec!(1), Side::Short, t0());
        assert_eq!(decision.action, RiskAction::CloseAll);
        assert!(decision.reason.contains("daily loss limit"));
    }

    #[test]
    fn fourth_symbol_is_blocked_at_max_positions() {
        let mut rm = manager();
        for symbol in ["BTCUSDT", "ETHUSDT", "SOLUSDT"] {
            rm.register_position(long(symbol, dec!(10), dec!(1))).unwrap();
        }
        let decision = rm.check_trade_allowed(&Symbol::from("XRPUSDT"), dec!(1), Side::Long, t0());
        assert_eq!(decision.action, RiskAction::Block);
        assert!(decision.reason.contains("max positions reached"));
    }

    #[test]
    fn oversized_entry_is_reduced_to_cap() {
        let rm = manager();
        let decision = rm.check_trade_allowed(&Symbol::from("BTCUSDT"), dec!(150), Side::Long, t0());
        assert_eq!(decision.action, RiskAction::ReduceSize);
        assert_eq!(decision.adjusted_size, Some(dec!(100)));
    }

    #[test_case(dec!(50), RiskAction::Allow, Some(dec!(50)) ; "under cap")]
    #[test_case(dec!(100), RiskAction::Allow, Some(dec!(100)) ; "at cap")]
    #[test_case(dec!(100.5), RiskAction::ReduceSize, Some(dec!(100)) ; "just over cap")]
    #[test_case(dec!(0), RiskAction::Block, None ; "zero size")]
    fn sizing_rule(size: Decimal, action: RiskAction, adjusted: Option<Decimal>) {
        let decision = manager().check_trade_allowed(&Symbol::from("BTCUSDT"), size, Side::Long, t0());
        assert_eq!(decision.action, action);
        assert_eq!(decision.adjusted_size, adjusted);
    }

    #[test]
    fn capital_rules_dominate_sizing_rules() {
        let mut rm = manager();
        rm.register_position(short("BTCUSDT", dec!(100), dec!(10))).unwrap();
        rm.close_position(&Symbol::from("BTCUSDT"), dec!(160), t0(), ExitReason::StopLoss).unwrap();
        // Oversized and at a loss: the loss rule must win.
        let decision = rm.check_trade_allowed(&Symbol::from("ETHUSDT"), dec!(1000), Side::Long, t0());
        assert_eq!(decision.action, RiskAction::Block);
        assert!(decision.reason.contains("daily loss limit"));
    }

    #[test]
    fn drawdown_warning_zone_halves_size() {
        let mut rm = RiskManager::new(
            RiskSettings { daily_loss_limit_usd: dec!(5000), cooldown_after_losses: 0, ..RiskSettings::default() },
            dec!(10000),
            t0(),
        )
        .unwrap();
        rm.register_position(long("BTCUSDT", dec!(100), dec!(100))).unwrap();
        // 20% drawdown: past 0.7 * 25% but below 25%.
        rm.close_position(&Symbol::from("BTCUSDT"), dec!(80), t0(), ExitReason::StopLoss).unwrap();
        let decision = rm.check_trade_allowed(&Symbol::from("ETHUSDT"), dec!(10), Side::Long, t0());
        assert_eq!(decision.action, RiskAction::ReduceSize);
        assert_eq!(decision.adjusted_size, Some(dec!(5)));
    }

    #[test]
    fn max_drawdown_flattens_open_book() {
        let mut rm = RiskManager::new(
            RiskSettings { daily_loss_limit_pct: dec!(1), cooldown_after_losses: 0, ..RiskSettings::default() },
            dec!(10000),
            t0(),
        )
        .unwrap();
        rm.register_position(long("ETHUSDT", dec!(10), dec!(1))).unwrap();
        rm.update_equity(dec!(7000), t0());
        let decision = rm.check_trade_allowed(&Symbol::from("BTCUSDT"), dec!(1), Side::Long, t0());
        assert_eq!(decision.action, RiskAction::CloseAll);
        assert!(decision.reason.contains("max drawdown"));
    }

    #[test]
    fn cooldown_blocks_until_it_expires() {
        let mut rm = RiskManager::new(
            RiskSettings { daily_loss_limit_usd: dec!(5000), cooldown_after_losses: 2, cooldown_secs: 60, ..RiskSettings::default() },
            dec!(10000),
            t0(),
        )
        .unwrap();
        for _ in 0..2 {
            rm.register_position(long("BTCUSDT", dec!(100), dec!(1))).unwrap();
            rm.close_position(&Symbol::from("BTCUSDT"), dec!(99), t0(), ExitReason::StopLoss).unwrap();
        }
        let blocked = rm.check_trade_allowed(&Symbol::from("BTCUSDT"), dec!(1), Side::Long, t0() + Duration::seconds(30));
        assert_eq!(blocked.action, RiskAction::Block);
        assert!(blocked.reason.contains("cooldown"));
        let allowed = rm.check_trade_allowed(&Symbol::from("BTCUSDT"), dec!(1), Side::Long, t0() + Duration::seconds(61));
        assert_eq!(allowed.action, RiskAction::Allow);
    }

    #[test]
    fn duplicate_registration_is_rejected_without_overwrite() {
        let mut rm = manager();
        rm.register_position(long("BTCUSDT", dec!(100), dec!(1))).unwrap();
        let err = rm.register_position(long("BTCUSDT", dec!(200), dec!(5))).unwrap_err();
        assert_eq!(err, Error::DuplicatePosition(Symbol::from("BTCUSDT")));
        assert_eq!(rm.position(&Symbol::from("BTCUSDT")).unwrap().entry_price, dec!(100));
    }

    #[test]
    fn position_without_protective_stop_is_rejected() {
        let mut rm = manager();
        let mut pos = long("BTCUSDT", dec!(100), dec!(1));
        pos.stop_loss = dec!(101);
        assert!(matches!(rm.register_position(pos), Err(Error::UnprotectedPosition { .. })));
        assert_eq!(rm.open_position_count(), 0);
    }

    #[test]
    fn reservation_holds_the_slot_until_released() {
        let mut rm = manager();
        rm.register_position(long("BTCUSDT", dec!(10), dec!(1))).unwrap();
        rm.register_position(long("ETHUSDT", dec!(10), dec!(1))).unwrap();

        let first = rm.reserve_entry(&Symbol::from("SOLUSDT"), dec!(1), Side::Long, t0());
        assert_eq!(first.action, RiskAction::Allow);
        // A second caller cannot take the same slot, nor the same symbol.
        let same_symbol = rm.reserve_entry(&Symbol::from("SOLUSDT"), dec!(1), Side::Long, t0());
        assert_eq!(same_symbol.action, RiskAction::Block);
        let other = rm.reserve_entry(&Symbol::from("XRPUSDT"), dec!(1), Side::Long, t0());
        assert!(other.reason.contains("max positions reached"));

        rm.release_entry(&Symbol::from("SOLUSDT"));
        let retry = rm.reserve_entry(&Symbol::from("XRPUSDT"), dec!(1), Side::Long, t0());
        assert_eq!(retry.action, RiskAction::Allow);
    }

    #[test]
    fn rollover_resets_daily_counters_and_keeps_positions() {
        let mut rm = manager();
        rm.register_position(long("BTCUSDT", dec!(100), dec!(10))).unwrap();
        rm.register_position(long("ETHUSDT", dec!(10), dec!(1))).unwrap();
        rm.close_position(&Symbol::from("BTCUSDT"), dec!(40), t0(), ExitReason::Signal).unwrap();
        assert!(rm.daily_loss_breached());

        assert!(!rm.roll_day_if_needed(t0() + Duration::hours(1)));
        assert!(rm.roll_day_if_needed(t0() + Duration::days(1)));
        assert!(!rm.daily_loss_breached());
        assert_eq!(rm.equity().daily_starting_equity, dec!(9400));
        assert_eq!(rm.equity().daily_realized_pnl, Decimal::ZERO);
        assert_eq!(rm.open_position_count(), 1);
    }

    #[test]
    fn equity_within_tolerance_is_kept() {
        let mut rm = manager();
        assert!(rm.update_equity(dec!(10000.5), t0()).is_none());
        assert_eq!(rm.equity().current_equity, dec!(10000));
    }

    #[test]
    fn equity_beyond_tolerance_adopts_exchange() {
        let mut rm = manager();
        let event = rm.update_equity(dec!(9800), t0()).unwrap();
        assert_eq!(event.kind, DiscrepancyKind::Equity);
        assert_eq!(rm.equity().current_equity, dec!(9800));
    }

    fn reported(pos: &Position) -> ReportedPosition {
        ReportedPosition {
            symbol: pos.symbol.clone(),
            side: pos.side,
            size: pos.size,
            entry_price: pos.entry_price,
            stop_loss: pos.stop_loss,
            take_profit: pos.take_profit,
        }
    }

    #[test]
    fn reconcile_defers_while_orders_are_in_flight() {
        let mut rm = manager();
        rm.reserve_entry(&Symbol::from("BTCUSDT"), dec!(1), Side::Long, t0());
        let view = ExchangeView { equity: dec!(5000), positions: vec![] };
        assert_eq!(rm.reconcile(&view, t0()), ReconcileOutcome::Deferred { in_flight: 1 });
        assert_eq!(rm.equity().current_equity, dec!(10000));
    }

    #[test]
    fn reconcile_adopts_and_drops_positions() {
        let mut rm = manager();
        rm.register_position(long("BTCUSDT", dec!(100), dec!(1))).unwrap();
        let eth = short("ETHUSDT", dec!(10), dec!(3));
        let view = ExchangeView { equity: dec!(10000), positions: vec![reported(&eth)] };

        match rm.reconcile(&view, t0() + Duration::seconds(61)) {
            ReconcileOutcome::Corrected(events) => {
                let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
                assert_eq!(kinds, vec![DiscrepancyKind::StalePosition, DiscrepancyKind::UnknownPosition]);
            }
            other => panic!("expected correction, got {other:?}"),
        }
        assert!(rm.position(&Symbol::from("BTCUSDT")).is_none());
        assert_eq!(rm.current_side(&Symbol::from("ETHUSDT")), Some(Side::Short));
    }

    #[test]
    fn snapshot_lagging_a_fresh_fill_keeps_the_position() {
        let mut rm = manager();
        rm.register_position(long("BTCUSDT", dec!(100), dec!(1))).unwrap();
        let view = ExchangeView { equity: dec!(10000), positions: vec![] };

        assert_eq!(rm.reconcile(&view, t0() + Duration::seconds(5)), ReconcileOutcome::InSync);
        assert_eq!(rm.current_side(&Symbol::from("BTCUSDT")), Some(Side::Long));
        let decision = rm.check_trade_allowed(&Symbol::from("BTCUSDT"), dec!(1), Side::Long, t0());
        assert_eq!(decision.action, RiskAction::Block);
    }

    #[test]
    fn snapshot_lagging_an_exit_does_not_readopt() {
        let mut rm = manager();
        let btc = long("BTCUSDT", dec!(100), dec!(1));
        rm.register_position(btc.clone()).unwrap();
        rm.close_position(&btc.symbol, dec!(105), t0(), ExitReason::Signal).unwrap();
        let view = ExchangeView { equity: dec!(10005), positions: vec![reported(&btc)] };

        assert_eq!(rm.reconcile(&view, t0() + Duration::seconds(5)), ReconcileOutcome::InSync);
        assert!(rm.position(&btc.symbol).is_none());

        // Still reported after the window: the venue is right.
        assert!(matches!(rm.reconcile(&view, t0() + Duration::seconds(61)), ReconcileOutcome::Corrected(_)));
        assert!(rm.position(&btc.symbol).is_some());
    }

    #[test]
    fn partial_exit_books_only_the_filled_quantity() {
        let mut rm = manager();
        let btc = long("BTCUSDT", dec!(100), dec!(10));
        rm.register_position(btc.clone()).unwrap();
        rm.begin_exit(&btc.symbol).unwrap();

        let pnl = rm.reduce_position(&btc.symbol, dec!(4), dec!(110), t0(), ExitReason::Signal).unwrap();

        assert_eq!(pnl, dec!(40));
        assert_eq!(rm.equity().daily_realized_pnl, dec!(40));
        assert!(!rm.has_in_flight());
        let remainder = rm.position(&btc.symbol).unwrap();
        assert_eq!(remainder.size, dec!(6));
        assert_eq!(remainder.stop_loss, btc.stop_loss);
        assert_eq!(remainder.take_profit, btc.take_profit);
        assert_eq!(rm.last_closed_trade().unwrap().size, dec!(4));

        let rest = rm.reduce_position(&btc.symbol, dec!(6), dec!(90), t0(), ExitReason::StopLoss).unwrap();
        assert_eq!(rest, dec!(-60));
        assert_eq!(rm.equity().daily_realized_pnl, dec!(-20));
        assert!(rm.position(&btc.symbol).is_none());
    }

    #[test]
    fn reconcile_keeps_local_stop_on_size_correction() {
        let mut rm = manager();
        let local = long("BTCUSDT", dec!(100), dec!(1));
        rm.register_position(local.clone()).unwrap();
        let mut exchange = reported(&local);
        exchange.size = dec!(0.5);
        exchange.stop_loss = dec!(50);
        let view = ExchangeView { equity: dec!(10000), positions: vec![exchange] };

        assert!(matches!(rm.reconcile(&view, t0()), ReconcileOutcome::Corrected(_)));
        let merged = rm.position(&Symbol::from("BTCUSDT")).unwrap();
        assert_eq!(merged.size, dec!(0.5));
        assert_eq!(merged.stop_loss, local.stop_loss);
    }

    #[test]
    fn repeated_divergence_halts_entries() {
        let mut rm = manager();
        for i in 0..3 {
            let view = ExchangeView { equity: dec!(9000) - Decimal::from(i * 100), positions: vec![] };
            let outcome = rm.reconcile(&view, t0());
            if i < 2 {
                assert!(matches!(outcome, ReconcileOutcome::Corrected(_)));
            } else {
                assert!(matches!(outcome, ReconcileOutcome::Halted { .. }));
            }
        }
        let decision = rm.check_trade_allowed(&Symbol::from("BTCUSDT"), dec!(1), Side::Long, t0());
        assert_eq!(decision.action, RiskAction::Block);
        assert!(decision.reason.contains("halted"));

        rm.resume();
        assert!(rm.halt_reason().is_none());
    }

    #[test]
    fn clean_reconciliation_resets_divergence_count() {
        let mut rm = manager();
        rm.reconcile(&ExchangeView { equity: dec!(9000), positions: vec![] }, t0());
        rm.reconcile(&ExchangeView { equity: dec!(8000), positions: vec![] }, t0());
        assert_eq!(rm.reconcile(&ExchangeView { equity: dec!(8000), positions: vec![] }, t0()), ReconcileOutcome::InSync);
        assert!(matches!(
            rm.reconcile(&ExchangeView { equity: dec!(7000), positions: vec![] }, t0()),
            ReconcileOutcome::Corrected(_)
        ));
    }

    #[test]
    fn snapshot_reports_journal_statistics() {
        let mut rm = manager();
        rm.register_position(long("BTCUSDT", dec!(100), dec!(1))).unwrap();
        rm.close_position(&Symbol::from("BTCUSDT"), dec!(110), t0(), ExitReason::TakeProfit).unwrap();
        rm.register_position(long("BTCUSDT", dec!(100), dec!(1))).unwrap();
        rm.close_position(&Symbol::from("BTCUSDT"), dec!(95), t0(), ExitReason::StopLoss).unwrap();

        let snapshot = rm.snapshot();
        assert_eq!(snapshot.win_rate, dec!(0.5));
        assert_eq!(snapshot.daily_trades, 2);
        assert_eq!(snapshot.consecutive_losses, 1);
        assert_eq!(snapshot.recent_trades[0].reason, ExitReason::StopLoss);
    }

    proptest! {
        #[test]
        fn close_after_register_books_directional_pnl(
            entry in 1u32..10_000,
            exit in 1u32..10_000,
            size in 1u32..50,
            is_long in any::<bool>(),
        ) {
            let mut rm = RiskManager::new(
                RiskSettings { daily_loss_limit_pct: dec!(1), ..settings() },
                dec!(1_000_000),
                t0(),
            ).unwrap();
            let entry = Decimal::from(entry);
            let size = Decimal::from(size) / dec!(10);
            let pos = if is_long { long("BTCUSDT", entry, size) } else { short("BTCUSDT", entry, size) };
            let sign = pos.side.direction_sign();
            rm.register_position(pos).unwrap();

            let exit = Decimal::from(exit);
            let pnl = rm.close_position(&Symbol::from("BTCUSDT"), exit, t0(), ExitReason::Signal).unwrap();
            prop_assert_eq!(pnl, (exit - entry) * size * sign);
            prop_assert!(rm.position(&Symbol::from("BTCUSDT")).is_none());
        }

        #[test]
        fn check_is_pure_and_never_exceeds_cap(
            sizes in proptest::collection::vec(1u32..500, 1..12),
        ) {
            let mut rm = manager();
            let symbols = ["A", "B", "C", "D", "E", "F"];
            for (i, raw) in sizes.iter().enumerate() {
                let symbol = Symbol::from(symbols[i % symbols.len()]);
                let size = Decimal::from(*raw);
                let first = rm.check_trade_allowed(&symbol, size, Side::Long, t0());
                let second = rm.check_trade_allowed(&symbol, size, Side::Long, t0());
                prop_assert_eq!(&first, &second);
                if let Some(approved) = first.approved_size() {
                    prop_assert!(approved <= rm.settings().max_symbol_exposure);
                    rm.register_position(long(&symbol.0, dec!(10), approved)).unwrap();
                }
                prop_assert!(rm.open_position_count() <= rm.settings().max_open_positions);
            }
        }
    }
}
