// In crates/app-config/src/types.rs

use core_types::{StrategyConfig, Symbol};
use risk::RiskSettings;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::time::Duration;
use strategies::SizingSettings;

use crate::{Error, Result};

#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    /// The application's general settings.
    pub app: AppSettings,
    /// Credentials and endpoints of the venue.
    pub exchange: ExchangeSettings,
    pub server: ServerSettings,
    pub engine: EngineSettings,
    #[serde(default)]
    pub risk: RiskSettings,
    #[serde(default)]
    pub sizing: SizingSettings,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub paper: PaperSettings,
    #[serde(default)]
    pub alerts: AlertSettings,
}

impl Settings {
    /// Checks cross-field constraints that deserialization cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.engine.symbols.is_empty() {
            return Err(Error::Invalid("engine.symbols must list at least one symbol".into()));
        }
        if self.engine.tick_interval_secs == 0 || self.engine.reconcile_interval_secs == 0 {
            return Err(Error::Invalid("engine intervals must be positive".into()));
        }
        if self.engine.kline_history < 2 {
            return Err(Error::Invalid("engine.kline_history must be at least 2".into()));
        }
        self.risk.validate()?;
        self.sizing.validate()?;
        if self.retry.max_attempts == 0 {
            return Err(Error::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.multiplier < 1.0 || !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(Error::Invalid("retry.multiplier must be >= 1 and retry.jitter within [0, 1]".into()));
        }
        if self.app.live_trading_enabled
            && (self.exchange.api_key.is_empty() || self.exchange.secret_key.is_empty())
        {
            return Err(Error::Invalid("live trading requires exchange.api_key and exchange.secret_key".into()));
        }
        if self.paper.initial_balance <= Decimal::ZERO {
            return Err(Error::Invalid("paper.initial_balance must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppSettings {
    /// The environment the application is running in (e.g., "development", "production").
    pub environment: String,
    /// The log level for the application.
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
    /// Orders go to the real venue only when this is set; otherwise they are paper-filled.
    #[serde(default)]
    pub live_trading_enabled: bool,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ExchangeSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// The REST API base URL of the venue.
    pub rest_base_url: String,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_recv_window_ms() -> u64 { 5_000 }
fn default_request_timeout_ms() -> u64 { 10_000 }

impl ExchangeSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone)]
pub struct EngineSettings {
    pub symbols: Vec<String>,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Kline interval requested from the venue, e.g. "1h".
    #[serde(default = "default_kline_interval")]
    pub kline_interval: String,
    #[serde(default = "default_kline_history")]
    pub kline_history: u16,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    /// The health check fails once the last completed tick is older than this.
    #[serde(default = "default_health_max_tick_age_secs")]
    pub health_max_tick_age_secs: u64,
    #[serde(default)]
    pub close_on_shutdown: bool,
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Entries are skipped while available quote balance is below this.
    #[serde(default = "default_min_entry_balance")]
    pub min_entry_balance: Decimal,
}

fn default_tick_interval_secs() -> u64 { 60 }
fn default_kline_interval() -> String { "1h".to_string() }
fn default_kline_history() -> u16 { 100 }
fn default_reconcile_interval_secs() -> u64 { 300 }
fn default_health_max_tick_age_secs() -> u64 { 180 }
fn default_quote_asset() -> String { "USDT".to_string() }
fn default_min_entry_balance() -> Decimal { dec!(10) }

impl EngineSettings {
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.iter().map(|s| Symbol(s.to_uppercase())).collect()
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn health_max_tick_age(&self) -> Duration {
        Duration::from_secs(self.health_max_tick_age_secs)
    }
}

/// Retry policy for venue calls.
#[derive(Deserialize, Debug, Clone)]
pub struct RetrySettings {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Jitter as a fraction of the computed backoff (0.1 = +/-10%).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Upper bound on a single venue call.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_max_attempts() -> u32 { 3 }
fn default_initial_backoff_ms() -> u64 { 200 }
fn default_max_backoff_ms() -> u64 { 5_000 }
fn default_multiplier() -> f64 { 2.0 }
fn default_jitter() -> f64 { 0.1 }
fn default_call_timeout_ms() -> u64 { 10_000 }

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl RetrySettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Fill model used when live trading is disabled.
#[derive(Deserialize, Debug, Clone)]
pub struct PaperSettings {
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,
    #[serde(default = "default_taker_fee")]
    pub taker_fee: Decimal,
    /// Adverse price move applied to every paper fill, as a fraction.
    #[serde(default = "default_slippage")]
    pub slippage: Decimal,
}

fn default_initial_balance() -> Decimal { dec!(10000) }
fn default_taker_fee() -> Decimal { dec!(0.0004) }
fn default_slippage() -> Decimal { dec!(0.0005) }

impl Default for PaperSettings {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
            taker_fee: default_taker_fee(),
            slippage: default_slippage(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AlertSettings {
    /// Warning and critical events are POSTed here as JSON when set.
    pub webhook_url: Option<String>,
}
