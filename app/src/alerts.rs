// In app/src/alerts.rs

use events::{EngineEvent, EventBus};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

/// Forwards alert-worthy engine events to an HTTP webhook.
///
/// Delivery is best effort: a failed POST is logged and the event dropped, so
/// a slow or dead endpoint never backs up into the engine.
pub struct AlertForwarder {
    client: reqwest::Client,
    url: String,
}

impl AlertForwarder {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(5)).build()?;
        Ok(Self { client, url: url.into() })
    }

    /// Runs until `cancel` fires or the bus closes.
    pub async fn run(self, events: EventBus, cancel: CancellationToken) {
        let mut rx = events.subscribe();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = rx.recv() => match received {
                    Ok(event) if event.is_alert() => self.deliver(&event).await,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Alert forwarder lagging; alerts dropped.");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    async fn deliver(&self, event: &EngineEvent) {
        let body = serde_json::json!({
            "text": format!("[{:?}] {}: {}", event.severity, event.event.name(), event.event),
            "event": event,
        });
        match self.client.post(&self.url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => tracing::warn!(status = %response.status(), "Alert webhook rejected the alert."),
            Err(e) => tracing::warn!(error = %e, "Failed to deliver alert."),
        }
    }
}
