// In crates/execution/src/types.rs

use chrono::{DateTime, Utc};
use core_types::{Execution, OrderToken, Side, Symbol};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "FILLED" => OrderStatus::Filled,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "CANCELED" => OrderStatus::Canceled,
            "REJECTED" => OrderStatus::Rejected,
            "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Expired,
            _ => OrderStatus::New,
        }
    }

    /// True once the order can no longer fill.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

/// An order as the venue reports it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VenueOrder {
    pub order_id: String,
    pub token: OrderToken,
    pub symbol: Symbol,
    pub side: Side,
    pub status: OrderStatus,
    pub filled_qty: Decimal,
    /// Average fill price; zero while nothing has filled.
    pub avg_price: Decimal,
    pub fee: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl VenueOrder {
    /// The confirmed fill, once the order is final and something executed.
    pub fn execution(&self) -> Option<Execution> {
        if !self.status.is_final() || self.filled_qty <= Decimal::ZERO {
            return None;
        }
        Some(Execution {
            order_id: self.order_id.clone(),
            token: self.token.clone(),
            symbol: self.symbol.clone(),
            side: self.side,
            price: self.avg_price,
            quantity: self.filled_qty,
            fee: self.fee,
            filled_at: self.updated_at,
        })
    }
}

/// A position as the venue reports it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VenuePosition {
    pub symbol: Symbol,
    pub side: Side,
    /// Always positive.
    pub size: Decimal,
    pub entry_price: Decimal,
}

/// Read-only account snapshot. May lag a fill by a short window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VenueAccount {
    /// Deposits plus realized P&L, net of fees.
    pub wallet_balance: Decimal,
    pub unrealized_pnl: Decimal,
    /// Quote balance free for new positions.
    pub available_balance: Decimal,
    pub positions: Vec<VenuePosition>,
}

impl VenueAccount {
    /// Wallet balance plus unrealized P&L.
    pub fn equity(&self) -> Decimal {
        self.wallet_balance + self.unrealized_pnl
    }

    pub fn position(&self, symbol: &Symbol) -> Option<&VenuePosition> {
        self.positions.iter().find(|p| &p.symbol == symbol)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    Cancelled,
    /// The order had already filled or closed; not an error.
    TooLate,
}
