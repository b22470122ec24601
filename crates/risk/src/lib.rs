// In crates/risk/src/lib.rs

//! Capital protection for the trading engine.
//!
//! The [`RiskManager`] is the single owner of open positions and account equity.
//! Every proposed entry passes through [`RiskManager::check_trade_allowed`] (or its
//! reserving variant) before an order may reach the exchange gateway.

pub mod error;
pub mod manager;
pub mod types;

// Re-export public types
pub use error::{Error, Result};
pub use manager::RiskManager;
pub use types::{
    ClosedTrade, DiscrepancyKind, EquityState, ExchangeView, ReconcileOutcome,
    ReconciliationEvent, ReportedPosition, RiskAction, RiskDecision, RiskSettings, RiskSnapshot,
};
