// In crates/engine/src/lib.rs

pub mod control;
pub mod feed;
pub mod health;
pub mod reconciler;
pub mod trader;

pub use control::{EngineContext, EngineControl};
pub use feed::{MarketDataFeed, RestKlineFeed};
pub use health::{HealthReport, HealthState};
pub use reconciler::StateReconciler;
pub use trader::{TickReport, TradingEngine};

use anyhow::Result;
use chrono::Utc;
use core_types::ExitReason;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Timing and shutdown behaviour for [`Engine::run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub tick_interval: Duration,
    pub reconcile_interval: Duration,
    pub close_on_shutdown: bool,
}

/// The top-level orchestrator: the tick loop plus the reconciliation timer.
pub struct Engine {
    trader: TradingEngine,
    reconciler: StateReconciler,
    options: RunOptions,
}

impl Engine {
    pub fn new(trader: TradingEngine, reconciler: StateReconciler, options: RunOptions) -> Self {
        Self { trader, reconciler, options }
    }

    pub fn context(&self) -> &EngineContext {
        self.trader.context()
    }

    /// Runs until `cancel` fires.
    ///
    /// State is reconciled once before the first tick so positions opened before a
    /// restart are adopted. On shutdown, positions are flattened when configured.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        tracing::info!("Initializing trading engine...");

        if let Err(e) = self.reconciler.reconcile_once(Utc::now()).await {
            tracing::error!(error = %e, "Initial reconciliation failed; continuing with local state.");
        }

        let (ticks, reconciles) = tokio::join!(
            self.trader.run(self.options.tick_interval, cancel.clone()),
            self.reconciler.run(self.options.reconcile_interval, cancel.clone()),
        );
        ticks?;
        reconciles?;

        if self.options.close_on_shutdown {
            tracing::warn!("Closing all positions before shutdown.");
            let report = self.trader.flatten("shutdown", ExitReason::Shutdown, Utc::now()).await;
            tracing::info!(exits = report.exits, failed = report.failed_orders, "Shutdown flatten complete.");
        }
        tracing::info!("Trading engine stopped.");
        Ok(())
    }
}
