// In crates/core-types/src/types.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// A venue trading pair, e.g. `BTCUSDT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Symbol(value.to_string())
    }
}

/// Direction of a position or of the order that opens it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// `+1` for long, `-1` for short. Multiplies price moves into P&L.
    pub fn direction_sign(self) -> Decimal {
        match self {
            Side::Long => Decimal::ONE,
            Side::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => f.write_str("long"),
            Side::Short => f.write_str("short"),
        }
    }
}

impl FromStr for Side {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Side::Long),
            "short" | "sell" => Ok(Side::Short),
            other => Err(Error::UnknownSide(other.to_string())),
        }
    }
}

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

/// The market snapshot a strategy evaluates for one symbol on one tick.
///
/// Klines are ordered oldest first; the last kline's close is the latest price.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketState {
    pub symbol: Symbol,
    pub klines: Vec<Kline>,
    pub as_of: DateTime<Utc>,
}

impl MarketState {
    pub fn new(symbol: Symbol, klines: Vec<Kline>, as_of: DateTime<Utc>) -> Self {
        Self { symbol, klines, as_of }
    }

    pub fn last_price(&self) -> Option<Decimal> {
        self.klines.last().map(|k| k.close)
    }

    /// Close prices as `f64`, oldest first, for indicator libraries.
    pub fn closes(&self) -> Vec<f64> {
        self.klines
            .iter()
            .filter_map(|k| k.close.to_f64())
            .collect()
    }

    /// Average true range over the last `period` bars, as a fraction of the latest close.
    ///
    /// Returns `None` when there is not enough history or the latest close is zero.
    pub fn volatility_estimate(&self, period: usize) -> Option<Decimal> {
        if period == 0 || self.klines.len() < period + 1 {
            return None;
        }
        let window = &self.klines[self.klines.len() - period - 1..];
        let mut total = Decimal::ZERO;
        for pair in window.windows(2) {
            let (prev, bar) = (&pair[0], &pair[1]);
            let range = (bar.high - bar.low)
                .max((bar.high - prev.close).abs())
                .max((bar.low - prev.close).abs());
            total += range;
        }
        let last = self.last_price()?;
        if last.is_zero() {
            return None;
        }
        Some(total / Decimal::from(period) / last)
    }
}

/// The sizing and protective levels attached to an entry signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryPlan {
    /// Recommended size in base units.
    pub size: Decimal,
    /// The price the plan was computed against (latest close).
    pub reference_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Volatility estimate (fraction of price) used for sizing, if any.
    pub volatility: Option<Decimal>,
    pub reason: String,
}

/// The raw directional reading a strategy produces before position context is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SignalKind {
    Long,
    Short,
    ExitLong,
    ExitShort,
    Hold,
}

/// A trading instruction for one symbol on one tick. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Signal {
    Long(EntryPlan),
    Short(EntryPlan),
    ExitLong { reason: String },
    ExitShort { reason: String },
    Hold,
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Long(_) => SignalKind::Long,
            Signal::Short(_) => SignalKind::Short,
            Signal::ExitLong { .. } => SignalKind::ExitLong,
            Signal::ExitShort { .. } => SignalKind::ExitShort,
            Signal::Hold => SignalKind::Hold,
        }
    }

    /// The side and plan of an entry signal.
    pub fn entry(&self) -> Option<(Side, &EntryPlan)> {
        match self {
            Signal::Long(plan) => Some((Side::Long, plan)),
            Signal::Short(plan) => Some((Side::Short, plan)),
            _ => None,
        }
    }

    /// The side of the position an exit signal closes.
    pub fn exit_side(&self) -> Option<Side> {
        match self {
            Signal::ExitLong { .. } => Some(Side::Long),
            Signal::ExitShort { .. } => Some(Side::Short),
            _ => None,
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Signal,
    StopLoss,
    TakeProfit,
    CloseAll,
    Shutdown,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::Signal => "signal",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::CloseAll => "close_all",
            ExitReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// An open, live exposure to one symbol. Owned by the risk manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// `(exit_price - entry_price) * size * direction_sign`.
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.size * self.side.direction_sign()
    }

    /// Unrealized P&L is derived from a mark price, never stored.
    pub fn unrealized_pnl(&self, mark_price: Decimal) -> Decimal {
        self.pnl_at(mark_price)
    }

    /// True when the stop-loss sits on the capital-protecting side of entry.
    pub fn stop_is_protective(&self) -> bool {
        match self.side {
            Side::Long => self.stop_loss < self.entry_price,
            Side::Short => self.stop_loss > self.entry_price,
        }
    }

    /// Returns the protective exit the latest price has crossed, if any.
    ///
    /// Stop-loss is checked first so a bar that touches both levels is treated as a loss.
    pub fn protective_trigger(&self, price: Decimal) -> Option<ExitReason> {
        match self.side {
            Side::Long if price <= self.stop_loss => Some(ExitReason::StopLoss),
            Side::Short if price >= self.stop_loss => Some(ExitReason::StopLoss),
            Side::Long if price >= self.take_profit => Some(ExitReason::TakeProfit),
            Side::Short if price <= self.take_profit => Some(ExitReason::TakeProfit),
            _ => None,
        }
    }
}

/// Client-assigned idempotency token. Reused across retries of the same order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderToken(pub String);

impl OrderToken {
    /// A fresh token; fits the 36 character client order id limit of most venues.
    pub fn new() -> Self {
        OrderToken(format!("tx{}", uuid::Uuid::new_v4().simple()))
    }
}

impl Default for OrderToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

/// An order as submitted to the exchange gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    /// Buy (`Long`) or sell (`Short`).
    pub side: Side,
    pub size: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    /// Closing orders only reduce an existing position.
    pub reduce_only: bool,
    pub token: OrderToken,
    /// Latest observed price; used by simulated fills and for logging slippage.
    pub reference_price: Decimal,
}

impl OrderRequest {
    pub fn market(symbol: Symbol, side: Side, size: Decimal, reference_price: Decimal) -> Self {
        Self {
            symbol,
            side,
            size,
            order_type: OrderType::Market,
            limit_price: None,
            reduce_only: false,
            token: OrderToken::new(),
            reference_price,
        }
    }

    /// A reduce-only market order that flattens `position`.
    pub fn closing(position: &Position, reference_price: Decimal) -> Self {
        Self {
            reduce_only: true,
            ..Self::market(
                position.symbol.clone(),
                position.side.opposite(),
                position.size,
                reference_price,
            )
        }
    }
}

/// A confirmed fill reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Execution {
    pub order_id: String,
    pub token: OrderToken,
    pub symbol: Symbol,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    pub filled_at: DateTime<Utc>,
}
