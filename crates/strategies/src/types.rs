// In crates/strategies/src/types.rs

use core_types::SignalKind;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A strategy's raw reading for the latest bar, before position context is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub kind: SignalKind,
    pub reason: String,
}

impl Assessment {
    pub fn new(kind: SignalKind, reason: impl Into<String>) -> Self {
        Self { kind, reason: reason.into() }
    }

    pub fn hold(reason: impl Into<String>) -> Self {
        Self::new(SignalKind::Hold, reason)
    }
}

/// How the stop-loss distance is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// `stop_loss_pct` of entry price.
    #[default]
    Fixed,
    /// `volatility_multiplier` times the volatility estimate, bounded by `max_stop_offset`.
    Volatility,
}

/// Which protective levels a trade gets when the risk gate reduces its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReducedSizeLevels {
    /// Keep the offsets the signal was planned with.
    #[default]
    Reuse,
    /// Widen the stop so the money at risk matches the original plan.
    Recompute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingSettings {
    /// Fraction of equity put at risk between entry and stop.
    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: Decimal,
    /// Upper bound on position notional as a fraction of equity.
    #[serde(default = "default_max_equity_fraction")]
    pub max_equity_fraction: Decimal,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: Decimal,
    #[serde(default)]
    pub stop_mode: StopMode,
    #[serde(default = "default_volatility_multiplier")]
    pub volatility_multiplier: Decimal,
    #[serde(default = "default_volatility_period")]
    pub volatility_period: usize,
    /// Widest stop offset any mode may produce.
    #[serde(default = "default_max_stop_offset")]
    pub max_stop_offset: Decimal,
    #[serde(default)]
    pub reduced_size_levels: ReducedSizeLevels,
    /// Decimal places sizes are truncated to.
    #[serde(default = "default_size_precision")]
    pub size_precision: u32,
}

fn default_risk_per_trade() -> Decimal { dec!(0.05) }
fn default_max_equity_fraction() -> Decimal { dec!(0.5) }
fn default_stop_loss_pct() -> Decimal { dec!(0.07) }
fn default_take_profit_pct() -> Decimal { dec!(0.21) }
fn default_volatility_multiplier() -> Decimal { dec!(2) }
fn default_volatility_period() -> usize { 14 }
fn default_max_stop_offset() -> Decimal { dec!(0.2) }
fn default_size_precision() -> u32 { 3 }

impl Default for SizingSettings {
    fn default() -> Self {
        Self {
            risk_per_trade: default_risk_per_trade(),
            max_equity_fraction: default_max_equity_fraction(),
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            stop_mode: StopMode::default(),
            volatility_multiplier: default_volatility_multiplier(),
            volatility_period: default_volatility_period(),
            max_stop_offset: default_max_stop_offset(),
            reduced_size_levels: ReducedSizeLevels::default(),
            size_precision: default_size_precision(),
        }
    }
}

impl SizingSettings {
    pub fn validate(&self) -> Result<()> {
        let in_range = |value: Decimal, upper: Decimal| value > Decimal::ZERO && value <= upper;
        if !in_range(self.stop_loss_pct, dec!(0.5)) {
            return Err(Error::InvalidParameters(format!("stop_loss_pct must be in (0, 0.5], got {}", self.stop_loss_pct)));
        }
        if !in_range(self.take_profit_pct, Decimal::ONE) {
            return Err(Error::InvalidParameters(format!("take_profit_pct must be in (0, 1], got {}", self.take_profit_pct)));
        }
        if !in_range(self.risk_per_trade, Decimal::ONE) {
            return Err(Error::InvalidParameters(format!("risk_per_trade must be in (0, 1], got {}", self.risk_per_trade)));
        }
        if !in_range(self.max_equity_fraction, Decimal::ONE) {
            return Err(Error::InvalidParameters(format!("max_equity_fraction must be in (0, 1], got {}", self.max_equity_fraction)));
        }
        if !in_range(self.max_stop_offset, dec!(0.5)) || self.max_stop_offset < self.stop_loss_pct {
            return Err(Error::InvalidParameters("max_stop_offset must be in [stop_loss_pct, 0.5]".into()));
        }
        if self.volatility_multiplier <= Decimal::ZERO || self.volatility_period == 0 {
            return Err(Error::InvalidParameters("volatility sizing needs a positive multiplier and period".into()));
        }
        Ok(())
    }

    /// Reward-to-risk ratio implied by the fixed offsets.
    pub fn reward_ratio(&self) -> Decimal {
        self.take_profit_pct / self.stop_loss_pct
    }
}

/// Parameters for the RSI momentum strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsiMomentumSettings {
    pub rsi_period: usize,
    /// RSI must cross up through this level to enter long.
    pub rsi_entry_low: f64,
    /// ...and must not have run past this one.
    pub rsi_entry_high: f64,
    /// RSI at or above this exits a long; `100 - rsi_exit` exits a short.
    pub rsi_exit: f64,
    pub fast_sma: usize,
    pub slow_sma: usize,
}

impl Default for RsiMomentumSettings {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            rsi_entry_low: 30.0,
            rsi_entry_high: 60.0,
            rsi_exit: 80.0,
            fast_sma: 10,
            slow_sma: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MACrossoverSettings {
    pub fast_period: usize,
    pub slow_period: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SizingSettings::default().validate().is_ok());
        assert_eq!(SizingSettings::default().reward_ratio(), dec!(3));
    }

    #[test]
    fn stop_offset_beyond_half_is_rejected() {
        let settings = SizingSettings { stop_loss_pct: dec!(0.6), ..SizingSettings::default() };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn modes_deserialize_from_snake_case() {
        let settings: SizingSettings = toml::from_str(
            r#"
            stop_mode = "volatility"
            reduced_size_levels = "recompute"
            "#,
        )
        .unwrap();
        assert_eq!(settings.stop_mode, StopMode::Volatility);
        assert_eq!(settings.reduced_size_levels, ReducedSizeLevels::Recompute);
        assert_eq!(settings.stop_loss_pct, dec!(0.07));
    }
}
