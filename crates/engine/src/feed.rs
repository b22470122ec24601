// In crates/engine/src/feed.rs

use api_client::ApiClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{MarketState, Symbol};

/// Source of per-tick market state.
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Klines for `symbol`, oldest first. The last kline's close is the latest price.
    async fn market_state(&self, symbol: &Symbol, now: DateTime<Utc>) -> anyhow::Result<MarketState>;
}

/// Polls the venue's kline endpoint on every tick.
pub struct RestKlineFeed {
    client: ApiClient,
    interval: String,
    history: u16,
}

impl RestKlineFeed {
    pub fn new(client: ApiClient, interval: impl Into<String>, history: u16) -> Self {
        Self { client, interval: interval.into(), history }
    }
}

#[async_trait]
impl MarketDataFeed for RestKlineFeed {
    async fn market_state(&self, symbol: &Symbol, now: DateTime<Utc>) -> anyhow::Result<MarketState> {
        let klines = self.client.get_klines(symbol, &self.interval, self.history).await?;
        if klines.is_empty() {
            anyhow::bail!("venue returned no klines for {symbol}");
        }
        tracing::trace!(symbol = %symbol, count = klines.len(), "Fetched klines.");
        Ok(MarketState::new(symbol.clone(), klines, now))
    }
}
