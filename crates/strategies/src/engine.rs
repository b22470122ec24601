// In crates/strategies/src/engine.rs

use core_types::{EntryPlan, MarketState, Side, Signal, SignalKind, Symbol};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::types::{ReducedSizeLevels, SizingSettings, StopMode};
use crate::{Error, Result, Strategy};

/// Protective levels for one side of one trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectiveLevels {
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

/// Turns a strategy's directional reading into a complete `Signal`.
///
/// Owns the signal contract (no same-tick reversal), the sizing contract (bounded by a
/// fraction of equity) and the protective price levels. Every entry plan passes the
/// level invariant check before it is returned.
pub struct StrategyEngine {
    strategy: Box<dyn Strategy>,
    sizing: SizingSettings,
}

impl std::fmt::Debug for StrategyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyEngine")
            .field("strategy", &self.strategy.name())
            .field("sizing", &self.sizing)
            .finish()
    }
}

impl StrategyEngine {
    pub fn new(strategy: Box<dyn Strategy>, sizing: SizingSettings) -> Result<Self> {
        sizing.validate()?;
        tracing::info!(
            strategy = strategy.name(),
            stop_loss_pct = %sizing.stop_loss_pct,
            take_profit_pct = %sizing.take_profit_pct,
            risk_per_trade = %sizing.risk_per_trade,
            "StrategyEngine initialized."
        );
        Ok(Self { strategy, sizing })
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn sizing(&self) -> &SizingSettings {
        &self.sizing
    }

    /// Produces the signal for `market.symbol` given the side currently held.
    ///
    /// # Arguments
    ///
    /// * `market` - Klines for the symbol, oldest first.
    /// * `current_side` - The open position's side, or `None` when flat.
    /// * `equity` - Account equity used for sizing entry signals.
    ///
    /// # Returns
    ///
    /// A `Signal` that never reverses an open position in place: an opposite reading
    /// while a position is open becomes an exit. Fails only when a computed protective
    /// level would sit on the wrong side of entry.
    pub fn generate_signal(
        &self,
        market: &MarketState,
        current_side: Option<Side>,
        equity: Decimal,
    ) -> Result<Signal> {
        let assessment = self.strategy.evaluate(market, current_side);
        let kind = constrain(assessment.kind, current_side);

        let side = match kind {
            SignalKind::Hold => return Ok(Signal::Hold),
            SignalKind::ExitLong => return Ok(Signal::ExitLong { reason: assessment.reason }),
            SignalKind::ExitShort => return Ok(Signal::ExitShort { reason: assessment.reason }),
            SignalKind::Long => Side::Long,
            SignalKind::Short => Side::Short,
        };

        let Some(price) = market.last_price().filter(|p| *p > Decimal::ZERO) else {
            return Ok(Signal::Hold);
        };
        let volatility = match self.sizing.stop_mode {
            StopMode::Fixed => None,
            StopMode::Volatility => market.volatility_estimate(self.sizing.volatility_period),
        };
        let size = self.calculate_position_size(&market.symbol, equity, price, volatility);
        if size <= Decimal::ZERO {
            tracing::debug!(symbol = %market.symbol, equity = %equity, "Entry reading sized to zero; holding.");
            return Ok(Signal::Hold);
        }

        let plan = EntryPlan {
            size,
            reference_price: price,
            stop_loss: self.stop_loss_price(price, side, volatility),
            take_profit: self.take_profit_price(price, side, volatility),
            volatility,
            reason: assessment.reason,
        };
        check_levels(&market.symbol, side, plan.reference_price, plan.stop_loss, plan.take_profit)?;

        Ok(match side {
            Side::Long => Signal::Long(plan),
            Side::Short => Signal::Short(plan),
        })
    }

    /// Fixed-fractional size in base units.
    ///
    /// Risks `risk_per_trade` of equity between entry and stop, and never exceeds
    /// `max_equity_fraction` of equity in notional. Returns zero for non-positive inputs.
    pub fn calculate_position_size(
        &self,
        symbol: &Symbol,
        equity: Decimal,
        price: Decimal,
        volatility: Option<Decimal>,
    ) -> Decimal {
        if equity <= Decimal::ZERO || price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let offset = self.stop_offset(volatility);
        let risk_amount = equity * self.sizing.risk_per_trade;
        let by_risk = risk_amount / (price * offset);
        let by_equity = equity * self.sizing.max_equity_fraction / price;
        let size = by_risk
            .min(by_equity)
            .round_dp_with_strategy(self.sizing.size_precision, RoundingStrategy::ToZero);
        tracing::trace!(symbol = %symbol, %by_risk, %by_equity, %size, "Position size calculated.");
        size
    }

    /// Stop distance as a fraction of entry price.
    pub fn stop_offset(&self, volatility: Option<Decimal>) -> Decimal {
        match (self.sizing.stop_mode, volatility) {
            (StopMode::Volatility, Some(v)) if v > Decimal::ZERO => {
                (v * self.sizing.volatility_multiplier).min(self.sizing.max_stop_offset)
            }
            _ => self.sizing.stop_loss_pct,
        }
    }

    fn target_offset(&self, volatility: Option<Decimal>) -> Decimal {
        match self.sizing.stop_mode {
            StopMode::Fixed => self.sizing.take_profit_pct,
            StopMode::Volatility => self.stop_offset(volatility) * self.sizing.reward_ratio(),
        }
    }

    pub fn stop_loss_price(&self, entry_price: Decimal, side: Side, volatility: Option<Decimal>) -> Decimal {
        entry_price * (Decimal::ONE - side.direction_sign() * self.stop_offset(volatility))
    }

    pub fn take_profit_price(&self, entry_price: Decimal, side: Side, volatility: Option<Decimal>) -> Decimal {
        entry_price * (Decimal::ONE + side.direction_sign() * self.target_offset(volatility))
    }

    /// Protective levels for a filled entry.
    ///
    /// The plan's offsets are re-applied to the actual fill price. When the risk gate
    /// cut the size and `reduced_size_levels` is `recompute`, the stop is widened so the
    /// amount at risk matches the plan, up to `max_stop_offset`, keeping the reward ratio.
    pub fn levels_for_fill(
        &self,
        symbol: &Symbol,
        side: Side,
        plan: &EntryPlan,
        fill_price: Decimal,
        filled_size: Decimal,
    ) -> Result<ProtectiveLevels> {
        if plan.reference_price <= Decimal::ZERO || fill_price <= Decimal::ZERO {
            return Err(Error::InvariantViolation {
                symbol: symbol.clone(),
                detail: format!("non-positive price (plan {}, fill {})", plan.reference_price, fill_price),
            });
        }
        let mut stop_offset = (plan.reference_price - plan.stop_loss).abs() / plan.reference_price;
        let mut target_offset = (plan.take_profit - plan.reference_price).abs() / plan.reference_price;

        let reduced = filled_size > Decimal::ZERO && filled_size < plan.size;
        if reduced && self.sizing.reduced_size_levels == ReducedSizeLevels::Recompute && !stop_offset.is_zero() {
            let ratio = target_offset / stop_offset;
            stop_offset = (stop_offset * plan.size / filled_size).min(self.sizing.max_stop_offset);
            target_offset = stop_offset * ratio;
        }

        let sign = side.direction_sign();
        let levels = ProtectiveLevels {
            stop_loss: fill_price * (Decimal::ONE - sign * stop_offset),
            take_profit: fill_price * (Decimal::ONE + sign * target_offset),
        };
        check_levels(symbol, side, fill_price, levels.stop_loss, levels.take_profit)?;
        Ok(levels)
    }
}

/// Applies position context: no entries while a position is open, no same-tick reversal,
/// and exits only for the side actually held.
fn constrain(kind: SignalKind, current_side: Option<Side>) -> SignalKind {
    match (current_side, kind) {
        (None, SignalKind::Long | SignalKind::Short) => kind,
        (None, _) => SignalKind::Hold,
        (Some(Side::Long), SignalKind::ExitLong | SignalKind::Short) => SignalKind::ExitLong,
        (Some(Side::Short), SignalKind::ExitShort | SignalKind::Long) => SignalKind::ExitShort,
        (Some(_), _) => SignalKind::Hold,
    }
}

/// Rejects protective levels that would amplify a loss instead of capping it.
pub fn check_levels(
    symbol: &Symbol,
    side: Side,
    entry: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
) -> Result<()> {
    let ok = stop_loss > Decimal::ZERO
        && match side {
            Side::Long => stop_loss < entry && take_profit > entry,
            Side::Short => stop_loss > entry && take_profit < entry && take_profit > Decimal::ZERO,
        };
    if ok {
        Ok(())
    } else {
        Err(Error::InvariantViolation {
            symbol: symbol.clone(),
            detail: format!("{side} entry {entry} with stop {stop_loss} and target {take_profit}"),
        })
    }
}
