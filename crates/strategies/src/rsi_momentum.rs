// In crates/strategies/src/rsi_momentum.rs

use crate::types::{Assessment, RsiMomentumSettings};
use crate::{Error, Result, Strategy};
use core_types::{MarketState, Side, SignalKind};
use ta::Next;
use ta::indicators::{RelativeStrengthIndex as Rsi, SimpleMovingAverage as Sma};

/// The values the entry and exit rules look at, computed on the latest bar.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Readings {
    rsi: f64,
    rsi_prev: f64,
    fast_sma: f64,
    slow_sma: f64,
}

impl Readings {
    fn bullish(&self) -> bool {
        self.fast_sma > self.slow_sma
    }
}

/// RSI momentum with a moving-average trend filter.
///
/// Enters long when RSI crosses up through `rsi_entry_low` while staying at or below
/// `rsi_entry_high` and the fast SMA is above the slow SMA. Shorts mirror this around 50.
/// Longs exit once RSI reaches `rsi_exit`, shorts once it falls to `100 - rsi_exit`.
#[derive(Debug, Clone)]
pub struct RsiMomentum {
    settings: RsiMomentumSettings,
    // Unfed prototypes; cloned for each evaluation.
    rsi: Rsi,
    fast: Sma,
    slow: Sma,
}

impl RsiMomentum {
    pub fn new(settings: RsiMomentumSettings) -> Result<Self> {
        if settings.rsi_period == 0 || settings.fast_sma == 0 || settings.slow_sma == 0 {
            return Err(Error::InvalidParameters("rsi_momentum periods must be greater than 0".into()));
        }
        if settings.fast_sma >= settings.slow_sma {
            return Err(Error::InvalidParameters("rsi_momentum fast_sma must be shorter than slow_sma".into()));
        }
        let band_ok = 0.0 < settings.rsi_entry_low
            && settings.rsi_entry_low < settings.rsi_entry_high
            && settings.rsi_entry_high < settings.rsi_exit
            && settings.rsi_exit < 100.0;
        if !band_ok {
            return Err(Error::InvalidParameters(
                "rsi_momentum needs 0 < rsi_entry_low < rsi_entry_high < rsi_exit < 100".into(),
            ));
        }

        let invalid = |_| Error::InvalidParameters("rsi_momentum indicator period rejected".into());
        Ok(Self {
            rsi: Rsi::new(settings.rsi_period).map_err(invalid)?,
            fast: Sma::new(settings.fast_sma).map_err(invalid)?,
            slow: Sma::new(settings.slow_sma).map_err(invalid)?,
            settings,
        })
    }

    /// Bars needed before the first reading is trusted.
    pub fn warmup(&self) -> usize {
        self.settings.slow_sma.max(self.settings.rsi_period + 1) + 1
    }

    fn readings(&self, closes: &[f64]) -> Option<Readings> {
        if closes.len() < self.warmup() {
            return None;
        }
        let mut rsi = self.rsi.clone();
        let mut fast = self.fast.clone();
        let mut slow = self.slow.clone();

        let mut out = Readings { rsi: 50.0, rsi_prev: 50.0, fast_sma: 0.0, slow_sma: 0.0 };
        for close in closes {
            out.rsi_prev = out.rsi;
            out.rsi = rsi.next(*close);
            out.fast_sma = fast.next(*close);
            out.slow_sma = slow.next(*close);
        }
        Some(out)
    }
}

impl Strategy for RsiMomentum {
    fn name(&self) -> &'static str {
        "rsi_momentum"
    }

    fn evaluate(&self, market: &MarketState, current_side: Option<Side>) -> Assessment {
        let Some(r) = self.readings(&market.closes()) else {
            return Assessment::hold("insufficient data for indicators");
        };
        let s = &self.settings;

        match current_side {
            Some(Side::Long) if r.rsi >= s.rsi_exit => {
                Assessment::new(SignalKind::ExitLong, format!("RSI overbought exit: {:.1} >= {}", r.rsi, s.rsi_exit))
            }
            Some(Side::Short) if r.rsi <= 100.0 - s.rsi_exit => Assessment::new(
                SignalKind::ExitShort,
                format!("RSI oversold exit: {:.1} <= {}", r.rsi, 100.0 - s.rsi_exit),
            ),
            Some(_) => Assessment::hold("no exit condition met"),
            None => {
                if r.rsi_prev < s.rsi_entry_low
                    && s.rsi_entry_low <= r.rsi
                    && r.rsi <= s.rsi_entry_high
                    && r.bullish()
                {
                    Assessment::new(
                        SignalKind::Long,
                        format!("RSI bullish cross-up {:.1} -> {:.1}, trend bullish", r.rsi_prev, r.rsi),
                    )
                } else if r.rsi_prev > 100.0 - s.rsi_entry_low
                    && 100.0 - s.rsi_entry_low >= r.rsi
                    && r.rsi >= 100.0 - s.rsi_entry_high
                    && !r.bullish()
                {
                    Assessment::new(
                        SignalKind::Short,
                        format!("RSI bearish cross-down {:.1} -> {:.1}, trend bearish", r.rsi_prev, r.rsi),
                    )
                } else {
                    Assessment::hold("no entry condition met")
                }
            }
        }
    }
}
