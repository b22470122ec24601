// In app/src/main.rs

use anyhow::{Context, Result};
use app_config::Settings;
use chrono::Utc;
use clap::{Parser, Subcommand};
use engine::{
    Engine, EngineContext, HealthState, MarketDataFeed, RestKlineFeed, RunOptions, StateReconciler,
    TradingEngine,
};
use events::EventBus;
use execution::{ExchangeGateway, LiveVenue, SimulatedVenue, Venue};
use risk::RiskManager;
use std::sync::Arc;
use strategies::StrategyEngine;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

mod alerts;

use crate::alerts::AlertForwarder;

// Engine events kept for /api/events and WebSocket replay.
const EVENT_HISTORY: usize = 500;

// --- Command-Line Interface Definition ---

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = "A risk-managed Binance Futures trading engine.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs the trading engine and its HTTP surface until interrupted.
    Run,

    /// Loads and validates the configuration, then exits.
    CheckConfig,
}

// --- Main Application Entry Point ---

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from a .env file, if it exists.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = app_config::load_settings().context("failed to load settings")?;
    init_tracing(&settings);

    tracing::info!(environment = %settings.app.environment, "Starting application");

    match cli.command {
        Commands::Run => run_app(settings).await?,
        Commands::CheckConfig => {
            tracing::info!(
                symbols = ?settings.engine.symbols(),
                strategy = %settings.strategy.name,
                live = settings.app.live_trading_enabled,
                "Configuration is valid."
            );
        }
    }

    tracing::info!("Application has finished successfully.");
    Ok(())
}

/// `RUST_LOG` wins over the configured level when set.
fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.app.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if settings.app.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

// --- "Run" Subcommand Logic ---

/// Wires every component together and runs until Ctrl-C.
async fn run_app(settings: Settings) -> Result<()> {
    // --- 1. Venue and Gateway ---
    let client = api_client::ApiClient::new(&settings.exchange)?;
    let venue: Arc<dyn Venue> = if settings.app.live_trading_enabled {
        tracing::warn!("LIVE TRADING IS ENABLED. REAL ORDERS WILL BE PLACED.");
        Arc::new(LiveVenue::new(client.clone(), settings.engine.quote_asset.clone()))
    } else {
        tracing::info!(balance = %settings.paper.initial_balance, "Paper trading against simulated fills.");
        Arc::new(SimulatedVenue::new(&settings.paper))
    };
    let gateway = Arc::new(ExchangeGateway::new(venue, &settings.retry));

    // --- 2. Risk Manager ---
    // Local equity starts from the venue's wallet balance so the first
    // reconciliation has nothing to correct.
    let starting_equity = gateway
        .get_balances()
        .await
        .context("failed to read starting balance from the venue")?
        .wallet_balance;
    let risk = RiskManager::new(settings.risk.clone(), starting_equity, Utc::now())?;
    tracing::info!(equity = %starting_equity, "Risk manager initialized.");

    // --- 3. Strategy ---
    let strategy = strategies::create_strategy(&settings.strategy)?;
    let strategy = Arc::new(StrategyEngine::new(strategy, settings.sizing.clone())?);

    // --- 4. Engine ---
    let events = EventBus::new(EVENT_HISTORY);
    let health = HealthState::new(settings.engine.health_max_tick_age(), settings.engine.reconcile_interval() * 2);
    let ctx = EngineContext::new(risk, gateway, events.clone(), health);

    let feed: Arc<dyn MarketDataFeed> = Arc::new(RestKlineFeed::new(
        client,
        settings.engine.kline_interval.clone(),
        settings.engine.kline_history,
    ));
    let trader = TradingEngine::new(
        ctx.clone(),
        feed,
        strategy.clone(),
        settings.engine.symbols(),
        settings.engine.min_entry_balance,
    );
    let reconciler = StateReconciler::new(ctx.clone(), strategy);
    let engine = Engine::new(
        trader,
        reconciler,
        RunOptions {
            tick_interval: settings.engine.tick_interval(),
            reconcile_interval: settings.engine.reconcile_interval(),
            close_on_shutdown: settings.engine.close_on_shutdown,
        },
    );

    // --- 5. Launch Concurrent Tasks ---
    let cancel = CancellationToken::new();

    let alert_handle = match &settings.alerts.webhook_url {
        Some(url) => {
            let forwarder = AlertForwarder::new(url.clone())?;
            Some(tokio::spawn(forwarder.run(events, cancel.clone())))
        }
        None => None,
    };

    let server_handle = {
        let server = settings.server.clone();
        let ctx = ctx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { web_server::run(&server, ctx, cancel).await })
    };

    let shutdown = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown signal received."),
                Err(e) => tracing::error!(error = %e, "Failed to listen for the shutdown signal."),
            }
            cancel.cancel();
        })
    };

    tracing::info!("Launching trading engine and web server...");
    let engine_result = engine.run(cancel.clone()).await;

    // The engine only returns once cancelled or on a fatal error.
    cancel.cancel();
    shutdown.abort();
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Web server terminated with an error."),
        Err(e) => tracing::error!(error = %e, "Web server task panicked."),
    }
    if let Some(handle) = alert_handle {
        let _ = handle.await;
    }

    engine_result
}
