// In crates/strategies/src/ma_crossover.rs

use crate::types::{Assessment, MACrossoverSettings};
use crate::{Error, Result, Strategy};
use core_types::{MarketState, Side, SignalKind};
use ta::Next;
use ta::indicators::ExponentialMovingAverage as Ema;

/// Fast/slow EMA crossover.
///
/// A bullish cross on the latest bar reads `Long`, a bearish cross reads `Short`.
/// While a position is open, the fast line closing back through the slow line reads
/// as an exit for that position.
#[derive(Debug, Clone)]
pub struct MACrossover {
    settings: MACrossoverSettings,
    fast_ema: Ema,
    slow_ema: Ema,
}

impl MACrossover {
    /// Creates a new `MACrossover` strategy instance from its settings.
    pub fn new(settings: MACrossoverSettings) -> Result<Self> {
        if settings.fast_period == 0 || settings.fast_period >= settings.slow_period {
            return Err(Error::InvalidParameters(format!(
                "ma_crossover needs 0 < fast_period < slow_period, got {} / {}",
                settings.fast_period, settings.slow_period
            )));
        }
        let invalid = |_| Error::InvalidParameters("ma_crossover period rejected".into());
        Ok(Self {
            fast_ema: Ema::new(settings.fast_period).map_err(invalid)?,
            slow_ema: Ema::new(settings.slow_period).map_err(invalid)?,
            settings,
        })
    }
}

impl Strategy for MACrossover {
    fn name(&self) -> &'static str {
        "ma_crossover"
    }

    fn evaluate(&self, market: &MarketState, current_side: Option<Side>) -> Assessment {
        let closes = market.closes();

        // 1. Ensure we have enough data to calculate indicators.
        if closes.len() <= self.settings.slow_period {
            return Assessment::hold("insufficient data for indicators");
        }

        // 2. Replay the history through fresh indicators.
        let mut fast = self.fast_ema.clone();
        let mut slow = self.slow_ema.clone();
        let (mut last_fast, mut last_slow) = (0.0, 0.0);
        let (mut current_fast, mut current_slow) = (0.0, 0.0);
        for close in &closes {
            last_fast = current_fast;
            last_slow = current_slow;
            current_fast = fast.next(*close);
            current_slow = slow.next(*close);
        }

        let crossed_up = current_fast > current_slow && last_fast <= last_slow;
        let crossed_down = current_fast < current_slow && last_fast >= last_slow;

        // 3. The crossover logic
        match current_side {
            Some(Side::Long) if current_fast < current_slow => {
                Assessment::new(SignalKind::ExitLong, "fast EMA below slow EMA")
            }
            Some(Side::Short) if current_fast > current_slow => {
                Assessment::new(SignalKind::ExitShort, "fast EMA above slow EMA")
            }
            Some(_) => Assessment::hold("trend intact"),
            None if crossed_up => Assessment::new(
                SignalKind::Long,
                format!("bullish crossover {current_fast:.4} > {current_slow:.4}"),
            ),
            None if crossed_down => Assessment::new(
                SignalKind::Short,
                format!("bearish crossover {current_fast:.4} < {current_slow:.4}"),
            ),
            None => Assessment::hold("no crossover on this bar"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use core_types::{Kline, Symbol};
    use rust_decimal::Decimal;

    fn market(closes: &[i64]) -> MarketState {
        let klines = closes
            .iter()
            .map(|c| Kline {
                open_time: 0,
                open: Decimal::from(*c),
                high: Decimal::from(*c),
                low: Decimal::from(*c),
                close: Decimal::from(*c),
                volume: Decimal::ONE,
                close_time: 0,
            })
            .collect();
        MarketState::new(Symbol::from("ETHUSDT"), klines, Utc::now())
    }

    fn strategy() -> MACrossover {
        MACrossover::new(MACrossoverSettings { fast_period: 2, slow_period: 4 }).unwrap()
    }

    #[test]
    fn reversal_after_decline_reads_long() {
        let reading = strategy().evaluate(&market(&[10, 9, 8, 7, 6, 5, 9]), None);
        assert_eq!(reading.kind, SignalKind::Long);
    }

    #[test]
    fn falling_market_exits_long() {
        let reading = strategy().evaluate(&market(&[5, 6, 7, 8, 7, 5, 3]), Some(Side::Long));
        assert_eq!(reading.kind, SignalKind::ExitLong);
    }

    #[test]
    fn equal_periods_are_rejected() {
        assert!(MACrossover::new(MACrossoverSettings { fast_period: 5, slow_period: 5 }).is_err());
    }
}
