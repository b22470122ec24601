// In crates/engine/src/health.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::TickReport;

#[derive(Debug, Default)]
struct HealthInner {
    last_tick: Option<DateTime<Utc>>,
    last_report: Option<TickReport>,
    last_reconciled: Option<DateTime<Utc>>,
    reconcile_error: Option<String>,
}

/// What the health endpoints report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub tick_fresh: bool,
    pub reconciled: bool,
    pub last_tick: Option<DateTime<Utc>>,
    pub last_reconciled: Option<DateTime<Utc>>,
    pub last_report: Option<TickReport>,
    pub reconcile_error: Option<String>,
}

/// Liveness bookkeeping shared by the tick loop, the reconciler and the HTTP server.
#[derive(Debug, Clone)]
pub struct HealthState {
    inner: Arc<RwLock<HealthInner>>,
    max_tick_age: Duration,
    max_reconcile_age: Duration,
}

impl HealthState {
    pub fn new(max_tick_age: Duration, max_reconcile_age: Duration) -> Self {
        Self { inner: Arc::new(RwLock::new(HealthInner::default())), max_tick_age, max_reconcile_age }
    }

    pub fn record_tick(&self, at: DateTime<Utc>, report: TickReport) {
        let mut inner = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.last_tick = Some(at);
        inner.last_report = Some(report);
    }

    pub fn record_reconciled(&self, at: DateTime<Utc>) {
        let mut inner = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.last_reconciled = Some(at);
        inner.reconcile_error = None;
    }

    pub fn record_reconcile_failure(&self, error: impl Into<String>) {
        let mut inner = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.reconcile_error = Some(error.into());
    }

    /// Healthy once a tick completed within `max_tick_age` and the last reconciliation
    /// succeeded within `max_reconcile_age`.
    pub fn report(&self, now: DateTime<Utc>) -> HealthReport {
        let inner = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let fresh = |at: Option<DateTime<Utc>>, max: Duration| {
            at.is_some_and(|at| (now - at).to_std().map_or(true, |age| age <= max))
        };
        let tick_fresh = fresh(inner.last_tick, self.max_tick_age);
        let reconciled = inner.reconcile_error.is_none() && fresh(inner.last_reconciled, self.max_reconcile_age);
        HealthReport {
            healthy: tick_fresh && reconciled,
            tick_fresh,
            reconciled,
            last_tick: inner.last_tick,
            last_reconciled: inner.last_reconciled,
            last_report: inner.last_report.clone(),
            reconcile_error: inner.reconcile_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health() -> HealthState {
        HealthState::new(Duration::from_secs(180), Duration::from_secs(600))
    }

    #[test]
    fn unhealthy_before_first_tick() {
        let report = health().report(Utc::now());
        assert!(!report.healthy);
        assert!(!report.tick_fresh);
    }

    #[test]
    fn healthy_after_tick_and_reconcile() {
        let health = health();
        let now = Utc::now();
        health.record_reconciled(now);
        health.record_tick(now, TickReport::default());
        assert!(health.report(now + chrono::Duration::seconds(60)).healthy);
    }

    #[test]
    fn stale_tick_is_unhealthy() {
        let health = health();
        let now = Utc::now();
        health.record_reconciled(now);
        health.record_tick(now, TickReport::default());
        let report = health.report(now + chrono::Duration::seconds(181));
        assert!(!report.tick_fresh);
        assert!(!report.healthy);
    }

    #[test]
    fn failed_reconcile_is_unhealthy_until_next_success() {
        let health = health();
        let now = Utc::now();
        health.record_tick(now, TickReport::default());
        health.record_reconciled(now);
        health.record_reconcile_failure("timeout");
        assert!(!health.report(now).reconciled);
        health.record_reconciled(now);
        assert!(health.report(now).healthy);
    }
}
