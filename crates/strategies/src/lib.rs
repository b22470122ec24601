// In crates/strategies/src/lib.rs

use core_types::{MarketState, Side};

pub mod engine;
pub mod error;
pub mod factory;
pub mod ma_crossover;
pub mod rsi_momentum;
pub mod types;

pub use engine::StrategyEngine;
pub use error::{Error, Result};
pub use factory::create_strategy;
pub use types::{Assessment, ReducedSizeLevels, SizingSettings, StopMode};

/// The universal interface for a trading strategy.
///
/// A strategy reads the market and reports a direction. It knows nothing about
/// sizing, protective levels or risk; `StrategyEngine` adds those.
///
/// Implementations must be deterministic: identical `market` and `current_side`
/// inputs always produce the same assessment. Indicators are therefore rebuilt from
/// the kline history on every call rather than carried between calls.
pub trait Strategy: Send + Sync {
    /// The name of the strategy.
    fn name(&self) -> &'static str;

    /// Reads the latest bar of `market`.
    ///
    /// `current_side` is the side of the open position for the symbol, if any.
    fn evaluate(&self, market: &MarketState, current_side: Option<Side>) -> Assessment;
}
