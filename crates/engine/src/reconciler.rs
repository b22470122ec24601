// In crates/engine/src/reconciler.rs

use chrono::{DateTime, Utc};
use events::{EngineEvent, EventKind};
use risk::{ExchangeView, ReconcileOutcome, ReportedPosition};
use std::sync::Arc;
use std::time::Duration;
use strategies::StrategyEngine;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::control::EngineContext;

/// A background task that periodically reconciles the risk manager's state
/// with the account state reported by the exchange.
pub struct StateReconciler {
    ctx: EngineContext,
    /// Supplies protective levels for positions found only on the exchange.
    strategy: Arc<StrategyEngine>,
}

impl StateReconciler {
    pub fn new(ctx: EngineContext, strategy: Arc<StrategyEngine>) -> Self {
        Self { ctx, strategy }
    }

    /// The main reconciliation loop. The first pass runs immediately.
    pub async fn run(&self, every: Duration, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile_once(Utc::now()).await {
                        tracing::error!(error = %e, "Failed to reconcile state.");
                    }
                }
            }
        }
    }

    /// One comparison against the exchange. Waits for any running tick to finish first.
    pub async fn reconcile_once(&self, now: DateTime<Utc>) -> anyhow::Result<ReconcileOutcome> {
        let _cycle = self.ctx.cycle.lock().await;

        let account = match self.ctx.gateway.get_balances().await {
            Ok(account) => account,
            Err(e) => {
                self.ctx.health.record_reconcile_failure(e.to_string());
                return Err(e.into());
            }
        };

        let view = ExchangeView {
            // Local equity tracks realized P&L only.
            equity: account.wallet_balance,
            positions: account
                .positions
                .iter()
                .map(|p| ReportedPosition {
                    symbol: p.symbol.clone(),
                    side: p.side,
                    size: p.size,
                    entry_price: p.entry_price,
                    stop_loss: self.strategy.stop_loss_price(p.entry_price, p.side, None),
                    take_profit: self.strategy.take_profit_price(p.entry_price, p.side, None),
                })
                .collect(),
        };

        let outcome = self.ctx.risk.lock().await.reconcile(&view, now);
        match &outcome {
            ReconcileOutcome::InSync => {
                tracing::debug!(equity = %view.equity, "State in sync with exchange.");
                self.ctx.health.record_reconciled(now);
            }
            ReconcileOutcome::Corrected(events) => {
                self.publish(events, now);
                self.ctx.health.record_reconciled(now);
            }
            ReconcileOutcome::Halted { reason, events } => {
                self.publish(events, now);
                self.ctx.events.emit(EngineEvent::new(None, EventKind::EntriesHalted { reason: reason.clone() }, now));
                self.ctx.health.record_reconciled(now);
            }
            ReconcileOutcome::Deferred { in_flight } => {
                tracing::debug!(in_flight, "Orders in flight; reconciliation deferred.");
            }
        }
        Ok(outcome)
    }

    fn publish(&self, events: &[risk::ReconciliationEvent], now: DateTime<Utc>) {
        for event in events {
            self.ctx
                .events
                .emit(EngineEvent::new(event.symbol.clone(), EventKind::Reconciliation(event.clone()), now));
        }
    }
}
