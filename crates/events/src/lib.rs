// In crates/events/src/lib.rs

//! Structured engine events and the bus that fans them out.
//!
//! Every event is logged through `tracing` at a level derived from its severity,
//! kept in a bounded replay cache for the status API, and broadcast to live
//! subscribers such as the alert forwarder.

use chrono::{DateTime, Utc};
use core_types::{Execution, ExitReason, Position, Side, Symbol};
use risk::{ClosedTrade, ReconciliationEvent, RiskAction};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// What happened. `tag` and `content` are used by serde for clean JSON representation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    RiskDecision {
        side: Side,
        action: RiskAction,
        requested_size: Decimal,
        adjusted_size: Option<Decimal>,
        reason: String,
    },
    CloseAll {
        reason: String,
        open_positions: usize,
    },
    OrderFilled(Execution),
    OrderFailed {
        side: Side,
        size: Decimal,
        reduce_only: bool,
        error: String,
    },
    PositionOpened(Position),
    PositionClosed(ClosedTrade),
    ProtectiveExit {
        reason: ExitReason,
        price: Decimal,
    },
    Reconciliation(ReconciliationEvent),
    EntriesHalted {
        reason: String,
    },
    InvariantViolation {
        detail: String,
    },
    EmergencyStop {
        engaged: bool,
    },
    TickFailed {
        error: String,
    },
}

impl EventKind {
    pub fn severity(&self) -> Severity {
        match self {
            EventKind::RiskDecision { action, .. } => match action {
                RiskAction::Allow | RiskAction::ReduceSize => Severity::Info,
                RiskAction::Block => Severity::Warning,
                RiskAction::CloseAll => Severity::Critical,
            },
            EventKind::OrderFilled(_) | EventKind::PositionOpened(_) | EventKind::PositionClosed(_) => {
                Severity::Info
            }
            EventKind::ProtectiveExit { .. }
            | EventKind::Reconciliation(_)
            | EventKind::TickFailed { .. } => Severity::Warning,
            EventKind::CloseAll { .. }
            | EventKind::OrderFailed { .. }
            | EventKind::EntriesHalted { .. }
            | EventKind::InvariantViolation { .. }
            | EventKind::EmergencyStop { .. } => Severity::Critical,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::RiskDecision { .. } => "risk_decision",
            EventKind::CloseAll { .. } => "close_all",
            EventKind::OrderFilled(_) => "order_filled",
            EventKind::OrderFailed { .. } => "order_failed",
            EventKind::PositionOpened(_) => "position_opened",
            EventKind::PositionClosed(_) => "position_closed",
            EventKind::ProtectiveExit { .. } => "protective_exit",
            EventKind::Reconciliation(_) => "reconciliation",
            EventKind::EntriesHalted { .. } => "entries_halted",
            EventKind::InvariantViolation { .. } => "invariant_violation",
            EventKind::EmergencyStop { .. } => "emergency_stop",
            EventKind::TickFailed { .. } => "tick_failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::RiskDecision { side, action, requested_size, adjusted_size, reason } => {
                write!(f, "{action:?} {side} {requested_size}")?;
                if let Some(size) = adjusted_size {
                    write!(f, " -> {size}")?;
                }
                write!(f, ": {reason}")
            }
            EventKind::CloseAll { reason, open_positions } => {
                write!(f, "flattening {open_positions} position(s): {reason}")
            }
            EventKind::OrderFilled(e) => write!(f, "{} {} @ {} (order {})", e.side, e.quantity, e.price, e.order_id),
            EventKind::OrderFailed { side, size, reduce_only, error } => {
                let kind = if *reduce_only { "exit" } else { "entry" };
                write!(f, "{kind} order {side} {size} failed: {error}")
            }
            EventKind::PositionOpened(p) => {
                write!(f, "{} {} @ {} sl {} tp {}", p.side, p.size, p.entry_price, p.stop_loss, p.take_profit)
            }
            EventKind::PositionClosed(t) => write!(f, "closed @ {} pnl {} ({})", t.exit_price, t.pnl, t.reason),
            EventKind::ProtectiveExit { reason, price } => write!(f, "{reason} touched at {price}"),
            EventKind::Reconciliation(r) => write!(f, "{:?}: local {} exchange {}", r.kind, r.local, r.exchange),
            EventKind::EntriesHalted { reason } => write!(f, "entries halted: {reason}"),
            EventKind::InvariantViolation { detail } => write!(f, "trade aborted: {detail}"),
            EventKind::EmergencyStop { engaged: true } => f.write_str("emergency stop engaged"),
            EventKind::EmergencyStop { engaged: false } => f.write_str("emergency stop released"),
            EventKind::TickFailed { error } => write!(f, "tick failed: {error}"),
        }
    }
}

/// A structured record sufficient to reconstruct a decision after the fact.
#[derive(Debug, Clone, Serialize)]
pub struct EngineEvent {
    pub at: DateTime<Utc>,
    pub symbol: Option<Symbol>,
    pub severity: Severity,
    pub event: EventKind,
}

impl EngineEvent {
    pub fn new(symbol: Option<Symbol>, event: EventKind, at: DateTime<Utc>) -> Self {
        Self { at, symbol, severity: event.severity(), event }
    }

    pub fn for_symbol(symbol: &Symbol, event: EventKind, at: DateTime<Utc>) -> Self {
        Self::new(Some(symbol.clone()), event, at)
    }

    /// Warning and critical events go to the alert channel.
    pub fn is_alert(&self) -> bool {
        self.severity >= Severity::Warning
    }
}

/// Fan-out for engine events. Cheap to clone; all clones share one channel and cache.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
    recent: Arc<Mutex<VecDeque<EngineEvent>>>,
    history: usize,
}

impl EventBus {
    /// `history` bounds both the broadcast buffer and the replay cache.
    pub fn new(history: usize) -> Self {
        let history = history.max(1);
        let (sender, _) = broadcast::channel(history);
        Self {
            sender,
            recent: Arc::new(Mutex::new(VecDeque::with_capacity(history))),
            history,
        }
    }

    /// Logs, caches and broadcasts `event`.
    pub fn emit(&self, event: EngineEvent) {
        let symbol = event.symbol.as_ref().map(|s| s.0.as_str()).unwrap_or("-");
        match event.severity {
            Severity::Info => {
                tracing::info!(symbol, kind = event.event.name(), at = %event.at, "{}", event.event)
            }
            Severity::Warning => {
                tracing::warn!(symbol, kind = event.event.name(), at = %event.at, "{}", event.event)
            }
            Severity::Critical => {
                tracing::error!(symbol, kind = event.event.name(), at = %event.at, "{}", event.event)
            }
        }

        {
            let mut recent = self.recent.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if recent.len() >= self.history {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }
        // No subscribers is fine; the cache still holds the event.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Up to `limit` most recent events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<EngineEvent> {
        let recent = self.recent.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        recent.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
