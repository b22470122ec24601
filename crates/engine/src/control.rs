// In crates/engine/src/control.rs

use chrono::{DateTime, Utc};
use events::{EngineEvent, EventBus, EventKind};
use execution::ExchangeGateway;
use risk::{RiskManager, RiskSnapshot};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::health::HealthState;

/// Emergency-stop flag. While engaged no new order is issued; orders already
/// submitted are left to complete.
#[derive(Debug, Clone, Default)]
pub struct EngineControl {
    stopped: Arc<AtomicBool>,
}

impl EngineControl {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Returns the previous state.
    fn set(&self, stopped: bool) -> bool {
        self.stopped.swap(stopped, Ordering::SeqCst)
    }
}

/// Handles shared by the tick loop, the reconciler and the HTTP surface.
#[derive(Clone)]
pub struct EngineContext {
    pub risk: Arc<Mutex<RiskManager>>,
    pub gateway: Arc<ExchangeGateway>,
    pub events: EventBus,
    pub control: EngineControl,
    pub health: HealthState,
    /// Serializes whole ticks against whole reconciliations.
    pub(crate) cycle: Arc<Mutex<()>>,
}

impl EngineContext {
    pub fn new(risk: RiskManager, gateway: Arc<ExchangeGateway>, events: EventBus, health: HealthState) -> Self {
        Self {
            risk: Arc::new(Mutex::new(risk)),
            gateway,
            events,
            control: EngineControl::default(),
            health,
            cycle: Arc::new(Mutex::new(())),
        }
    }

    pub fn emergency_stop(&self, now: DateTime<Utc>) {
        if !self.control.set(true) {
            self.events.emit(EngineEvent::new(None, EventKind::EmergencyStop { engaged: true }, now));
        }
    }

    /// Releases the emergency stop and clears any risk halt.
    pub async fn resume(&self, now: DateTime<Utc>) {
        self.risk.lock().await.resume();
        if self.control.set(false) {
            self.events.emit(EngineEvent::new(None, EventKind::EmergencyStop { engaged: false }, now));
        }
    }

    pub async fn snapshot(&self) -> RiskSnapshot {
        self.risk.lock().await.snapshot()
    }
}
