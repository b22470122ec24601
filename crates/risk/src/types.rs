// In crates/risk/src/types.rs

use chrono::{DateTime, NaiveDate, Utc};
use core_types::{ExitReason, Position, Side, Symbol};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Error, Result};

/// Configuration for the risk manager. Loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSettings {
    /// Maximum number of simultaneously open positions.
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,

    /// Default per-symbol exposure cap, in base units.
    #[serde(default = "default_max_symbol_exposure")]
    pub max_symbol_exposure: Decimal,

    /// Per-symbol overrides of `max_symbol_exposure`, keyed by symbol.
    #[serde(default)]
    pub symbol_exposure_caps: HashMap<String, Decimal>,

    /// Absolute daily loss limit in quote currency. Zero means "use the percentage".
    #[serde(default)]
    pub daily_loss_limit_usd: Decimal,

    /// Daily loss limit as a fraction of the day's starting equity.
    #[serde(default = "default_daily_loss_limit_pct")]
    pub daily_loss_limit_pct: Decimal,

    /// Drawdown from peak equity that flattens the book.
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: Decimal,

    /// Fraction of `max_drawdown` at which entry sizes are halved.
    #[serde(default = "default_drawdown_warning_ratio")]
    pub drawdown_warning_ratio: Decimal,

    /// Consecutive losing trades that start a cooldown. Zero disables it.
    #[serde(default = "default_cooldown_after_losses")]
    pub cooldown_after_losses: u32,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: i64,

    /// Absolute equity difference tolerated before the exchange snapshot overwrites local state.
    #[serde(default = "default_equity_tolerance")]
    pub equity_tolerance: Decimal,

    /// Relative equity difference tolerated, as a fraction of local equity.
    #[serde(default = "default_equity_tolerance_pct")]
    pub equity_tolerance_pct: Decimal,

    /// Position size difference tolerated, in base units.
    #[serde(default = "default_position_size_tolerance")]
    pub position_size_tolerance: Decimal,

    /// Consecutive diverging reconciliations that halt new entries.
    #[serde(default = "default_max_consecutive_divergences")]
    pub max_consecutive_divergences: u32,

    /// How long the exchange snapshot may lag a local fill. A position opened (or
    /// closed) within this window is not corrected when the snapshot disagrees.
    #[serde(default = "default_position_lag_grace_secs")]
    pub position_lag_grace_secs: i64,
}

fn default_max_open_positions() -> usize { 3 }
fn default_max_symbol_exposure() -> Decimal { dec!(100) }
fn default_daily_loss_limit_pct() -> Decimal { dec!(0.10) }
fn default_max_drawdown() -> Decimal { dec!(0.25) }
fn default_drawdown_warning_ratio() -> Decimal { dec!(0.7) }
fn default_cooldown_after_losses() -> u32 { 3 }
fn default_cooldown_secs() -> i64 { 300 }
fn default_equity_tolerance() -> Decimal { dec!(1) }
fn default_equity_tolerance_pct() -> Decimal { dec!(0.005) }
fn default_position_size_tolerance() -> Decimal { dec!(0.000001) }
fn default_max_consecutive_divergences() -> u32 { 3 }
fn default_position_lag_grace_secs() -> i64 { 60 }

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_open_positions: default_max_open_positions(),
            max_symbol_exposure: default_max_symbol_exposure(),
            symbol_exposure_caps: HashMap::new(),
            daily_loss_limit_usd: Decimal::ZERO,
            daily_loss_limit_pct: default_daily_loss_limit_pct(),
            max_drawdown: default_max_drawdown(),
            drawdown_warning_ratio: default_drawdown_warning_ratio(),
            cooldown_after_losses: default_cooldown_after_losses(),
            cooldown_secs: default_cooldown_secs(),
            equity_tolerance: default_equity_tolerance(),
            equity_tolerance_pct: default_equity_tolerance_pct(),
            position_size_tolerance: default_position_size_tolerance(),
            max_consecutive_divergences: default_max_consecutive_divergences(),
            position_lag_grace_secs: default_position_lag_grace_secs(),
        }
    }
}

impl RiskSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_open_positions == 0 {
            return Err(Error::InvalidParameters("max_open_positions must be at least 1".into()));
        }
        if self.max_symbol_exposure <= Decimal::ZERO {
            return Err(Error::InvalidParameters("max_symbol_exposure must be positive".into()));
        }
        if let Some((symbol, cap)) = self.symbol_exposure_caps.iter().find(|(_, cap)| **cap <= Decimal::ZERO) {
            return Err(Error::InvalidParameters(format!("exposure cap for {symbol} must be positive, got {cap}")));
        }
        if self.daily_loss_limit_usd < Decimal::ZERO {
            return Err(Error::InvalidParameters("daily_loss_limit_usd cannot be negative".into()));
        }
        if self.daily_loss_limit_pct <= Decimal::ZERO || self.daily_loss_limit_pct > Decimal::ONE {
            return Err(Error::InvalidParameters(format!("invalid daily_loss_limit_pct: {}", self.daily_loss_limit_pct)));
        }
        if self.max_drawdown <= Decimal::ZERO || self.max_drawdown > Decimal::ONE {
            return Err(Error::InvalidParameters(format!("invalid max_drawdown: {}", self.max_drawdown)));
        }
        if self.drawdown_warning_ratio <= Decimal::ZERO || self.drawdown_warning_ratio > Decimal::ONE {
            return Err(Error::InvalidParameters(format!("invalid drawdown_warning_ratio: {}", self.drawdown_warning_ratio)));
        }
        if self.max_consecutive_divergences == 0 {
            return Err(Error::InvalidParameters("max_consecutive_divergences must be at least 1".into()));
        }
        if self.position_lag_grace_secs < 0 {
            return Err(Error::InvalidParameters("position_lag_grace_secs cannot be negative".into()));
        }
        Ok(())
    }

    /// The exposure cap for `symbol`, falling back to the default cap.
    ///
    /// Keys match case-insensitively; layered config may lowercase them.
    pub fn exposure_cap(&self, symbol: &Symbol) -> Decimal {
        self.symbol_exposure_caps
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(&symbol.0))
            .map(|(_, cap)| *cap)
            .unwrap_or(self.max_symbol_exposure)
    }

    /// The loss limit for a day that starts with `starting_equity`.
    pub fn daily_loss_limit_for(&self, starting_equity: Decimal) -> Decimal {
        if self.daily_loss_limit_usd > Decimal::ZERO {
            self.daily_loss_limit_usd
        } else {
            (starting_equity * self.daily_loss_limit_pct).max(Decimal::ZERO)
        }
    }
}

/// The verdict of the risk gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskAction {
    Allow,
    ReduceSize,
    Block,
    CloseAll,
}

/// The gate verdict on one proposed trade. Produced fresh per check, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskDecision {
    pub action: RiskAction,
    /// Present iff the action is `Allow` or `ReduceSize`.
    pub adjusted_size: Option<Decimal>,
    pub reason: String,
}

impl RiskDecision {
    pub fn allow(size: Decimal, reason: impl Into<String>) -> Self {
        Self { action: RiskAction::Allow, adjusted_size: Some(size), reason: reason.into() }
    }

    pub fn reduce(size: Decimal, reason: impl Into<String>) -> Self {
        Self { action: RiskAction::ReduceSize, adjusted_size: Some(size), reason: reason.into() }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self { action: RiskAction::Block, adjusted_size: None, reason: reason.into() }
    }

    pub fn close_all(reason: impl Into<String>) -> Self {
        Self { action: RiskAction::CloseAll, adjusted_size: None, reason: reason.into() }
    }

    /// The size an order may be placed with, if any.
    pub fn approved_size(&self) -> Option<Decimal> {
        match self.action {
            RiskAction::Allow | RiskAction::ReduceSize => self.adjusted_size,
            RiskAction::Block | RiskAction::CloseAll => None,
        }
    }
}

/// Account equity as tracked by the risk manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityState {
    pub current_equity: Decimal,
    pub daily_starting_equity: Decimal,
    pub daily_realized_pnl: Decimal,
    pub daily_loss_limit: Decimal,
    pub peak_equity: Decimal,
    pub trading_day: NaiveDate,
}

/// A completed round trip, kept in the trade journal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedTrade {
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub size: Decimal,
    pub pnl: Decimal,
    pub pnl_percent: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub reason: ExitReason,
}

/// A position as reported by the exchange, with protective levels filled in by the caller
/// in case the position has to be adopted.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedPosition {
    pub symbol: Symbol,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

/// The exchange's authoritative view of the account.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeView {
    pub equity: Decimal,
    pub positions: Vec<ReportedPosition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiscrepancyKind {
    Equity,
    /// The exchange reports a position the risk manager does not know about.
    UnknownPosition,
    /// The risk manager holds a position the exchange no longer reports.
    StalePosition,
    /// Both sides know the position but disagree on side, size or entry.
    PositionMismatch,
}

/// A recorded conflict between local state and the exchange, resolved in favour of the exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationEvent {
    pub kind: DiscrepancyKind,
    pub symbol: Option<Symbol>,
    pub local: String,
    pub exchange: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    InSync,
    Corrected(Vec<ReconciliationEvent>),
    /// Orders were in flight; nothing was compared or overwritten.
    Deferred { in_flight: usize },
    /// Divergence repeated past the threshold. Local state was still corrected.
    Halted { reason: String, events: Vec<ReconciliationEvent> },
}

/// Point-in-time view of the risk manager for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct RiskSnapshot {
    pub equity: EquityState,
    pub daily_drawdown: Decimal,
    pub drawdown: Decimal,
    pub open_positions: Vec<Position>,
    pub in_flight: usize,
    pub daily_trades: u32,
    pub win_rate: Decimal,
    pub consecutive_losses: u32,
    pub halted: Option<String>,
    pub recent_trades: Vec<ClosedTrade>,
    pub recent_reconciliations: Vec<ReconciliationEvent>,
}
