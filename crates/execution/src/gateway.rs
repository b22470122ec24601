// In crates/execution/src/gateway.rs

use app_config::RetrySettings;
use core_types::{Execution, OrderRequest, OrderToken, Symbol};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::types::{CancelOutcome, VenueAccount, VenueOrder, VenuePosition};
use crate::{GatewayError, Result, Venue, VenueError};

const FILL_CACHE_SIZE: usize = 1024;

/// Fills already returned to a caller, keyed by order token.
#[derive(Debug, Default)]
struct FillCache {
    fills: HashMap<OrderToken, Execution>,
    order: VecDeque<OrderToken>,
}

impl FillCache {
    fn get(&self, token: &OrderToken) -> Option<Execution> {
        self.fills.get(token).cloned()
    }

    fn insert(&mut self, execution: Execution) {
        if self.fills.contains_key(&execution.token) {
            return;
        }
        if self.order.len() >= FILL_CACHE_SIZE {
            if let Some(oldest) = self.order.pop_front() {
                self.fills.remove(&oldest);
            }
        }
        self.order.push_back(execution.token.clone());
        self.fills.insert(execution.token.clone(), execution);
    }
}

/// The engine's only path to the venue.
///
/// Wraps a `Venue` with a per-call timeout, exponential backoff for transient
/// failures and idempotent order placement: a token that already produced a fill
/// returns that fill, and before any retry the venue is asked whether the previous
/// attempt reached it.
pub struct ExchangeGateway {
    venue: Arc<dyn Venue>,
    policy: RetryPolicy,
    call_timeout: Duration,
    fills: Mutex<FillCache>,
}

impl ExchangeGateway {
    pub fn new(venue: Arc<dyn Venue>, settings: &RetrySettings) -> Self {
        Self::with_policy(venue, RetryPolicy::from(settings), settings.call_timeout())
    }

    pub fn with_policy(venue: Arc<dyn Venue>, policy: RetryPolicy, call_timeout: Duration) -> Self {
        tracing::info!(
            venue = venue.name(),
            max_attempts = policy.max_attempts,
            call_timeout_ms = call_timeout.as_millis() as u64,
            "ExchangeGateway initialized."
        );
        Self { venue, policy, call_timeout, fills: Mutex::new(FillCache::default()) }
    }

    pub fn venue_name(&self) -> &'static str {
        self.venue.name()
    }

    /// Places `order` and waits for its fill.
    ///
    /// Calling this again with the same token never produces a second fill.
    /// Terminal venue errors are returned immediately; transient ones are retried
    /// until the attempt budget is spent.
    pub async fn place_order(&self, order: &OrderRequest) -> Result<Execution> {
        if let Some(fill) = self.cached_fill(&order.token) {
            tracing::debug!(symbol = %order.symbol, token = %order.token, "Token already filled; returning cached fill.");
            return Ok(fill);
        }

        let venue = &self.venue;
        let acknowledged = self
            .call("place_order", move |attempt| async move {
                if attempt > 1 {
                    // The previous attempt may have reached the venue before failing.
                    if let Some(existing) = venue.find_order(&order.symbol, &order.token).await? {
                        tracing::info!(
                            symbol = %order.symbol,
                            token = %order.token,
                            order_id = %existing.order_id,
                            "Order from an earlier attempt found on venue; not resubmitting."
                        );
                        return Ok(existing);
                    }
                }
                venue.submit_order(order).await
            })
            .await?;

        let execution = self.settle(acknowledged).await?;
        self.fills
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(execution.clone());
        tracing::info!(
            symbol = %execution.symbol,
            side = %execution.side,
            price = %execution.price,
            quantity = %execution.quantity,
            order_id = %execution.order_id,
            "Order filled."
        );
        Ok(execution)
    }

    /// Best-effort cancel. An order that already filled or closed is `TooLate`, not an error.
    pub async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<CancelOutcome> {
        match self.call("cancel_order", |_| self.venue.cancel_order(symbol, order_id)).await {
            Ok(()) => Ok(CancelOutcome::Cancelled),
            Err(GatewayError::Terminal(VenueError::UnknownOrder(reason))) => {
                tracing::info!(symbol = %symbol, order_id, reason = %reason, "Too late to cancel.");
                Ok(CancelOutcome::TooLate)
            }
            Err(e) => Err(e),
        }
    }

    /// Account equity, free balance and positions. May lag recent fills.
    pub async fn get_balances(&self) -> Result<VenueAccount> {
        self.call("account", |_| self.venue.account()).await
    }

    pub async fn get_position(&self, symbol: &Symbol) -> Result<Option<VenuePosition>> {
        let account = self.get_balances().await?;
        Ok(account.position(symbol).cloned())
    }

    fn cached_fill(&self, token: &OrderToken) -> Option<Execution> {
        self.fills
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(token)
    }

    /// Waits for an acknowledged order to become final, cancelling it if it does not.
    async fn settle(&self, mut order: VenueOrder) -> Result<Execution> {
        let mut polls = 0;
        while !order.status.is_final() && polls < self.policy.max_attempts {
            polls += 1;
            tokio::time::sleep(self.policy.backoff(polls)).await;
            let latest = self
                .call("find_order", |_| self.venue.find_order(&order.symbol, &order.token))
                .await?;
            if let Some(latest) = latest {
                order = latest;
            }
        }

        if !order.status.is_final() {
            tracing::warn!(symbol = %order.symbol, order_id = %order.order_id, "Order still open; cancelling.");
            self.cancel_order(&order.symbol, &order.order_id).await?;
            let latest = self
                .call("find_order", |_| self.venue.find_order(&order.symbol, &order.token))
                .await?;
            if let Some(latest) = latest {
                order = latest;
            }
        }

        match order.execution() {
            Some(execution) => Ok(execution),
            None => Err(GatewayError::Terminal(VenueError::Rejected(format!(
                "order {} ended {:?} with nothing filled",
                order.order_id, order.status
            )))),
        }
    }

    /// Runs `op` under the call timeout, retrying transient failures with backoff.
    ///
    /// `op` receives the 1-based attempt number.
    async fn call<T, F, Fut>(&self, what: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, VenueError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(self.call_timeout, op(attempt)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(VenueError::Transient(format!(
                    "{what} timed out after {}ms",
                    self.call_timeout.as_millis()
                ))),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(call = what, attempt, "Venue call succeeded after retry.");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => {
                    tracing::warn!(call = what, attempt, error = %e, "Terminal venue error; not retrying.");
                    return Err(GatewayError::Terminal(e));
                }
                Err(e) if attempt >= self.policy.max_attempts => {
                    tracing::error!(call = what, attempts = attempt, error = %e, "Venue call retries exhausted.");
                    return Err(GatewayError::RetriesExhausted { attempts: attempt, last: e });
                }
                Err(e) => {
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        call = what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient venue error; retrying."
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockVenue;
    use crate::types::OrderStatus;
    use chrono::Utc;
    use core_types::Side;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    fn gateway(venue: MockVenue) -> ExchangeGateway {
        ExchangeGateway::with_policy(Arc::new(venue), policy(), Duration::from_secs(1))
    }

    fn order() -> OrderRequest {
        OrderRequest::market(Symbol::from("BTCUSDT"), Side::Long, dec!(0.5), dec!(100))
    }

    fn filled(order: &OrderRequest, price: Decimal, id: &str) -> VenueOrder {
        VenueOrder {
            order_id: id.to_string(),
            token: order.token.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            status: OrderStatus::Filled,
            filled_qty: order.size,
            avg_price: price,
            fee: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    fn venue() -> MockVenue {
        let mut venue = MockVenue::new();
        venue.expect_name().return_const("mock");
        venue
    }

    #[tokio::test(start_paused = true)]
    async fn two_transient_failures_then_fill_uses_third_attempt() {
        let mut venue = venue();
        let submits = Arc::new(AtomicU32::new(0));
        let counter = submits.clone();
        venue.expect_submit_order().times(3).returning(move |order| {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(VenueError::Transient("503".into())),
                _ => Ok(filled(order, dec!(101), "third")),
            }
        });
        venue.expect_find_order().times(2).returning(|_, _| Ok(None));

        let execution = gateway(venue).place_order(&order()).await.unwrap();
        assert_eq!(execution.order_id, "third");
        assert_eq!(execution.price, dec!(101));
        assert_eq!(submits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_is_not_retried() {
        let mut venue = venue();
        venue
            .expect_submit_order()
            .times(1)
            .returning(|_| Err(VenueError::InsufficientBalance("margin".into())));

        let err = gateway(venue).place_order(&order()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Terminal(VenueError::InsufficientBalance(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_report_last_error() {
        let mut venue = venue();
        venue
            .expect_submit_order()
            .times(3)
            .returning(|_| Err(VenueError::Transient("timeout".into())));
        venue.expect_find_order().returning(|_, _| Ok(None));

        let err = gateway(venue).place_order(&order()).await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::RetriesExhausted { attempts: 3, last: VenueError::Transient("timeout".into()) }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn lost_acknowledgement_is_recovered_without_resubmitting() {
        let mut venue = venue();
        let request = order();
        let on_venue = filled(&request, dec!(100), "first");
        venue
            .expect_submit_order()
            .times(1)
            .returning(|_| Err(VenueError::Transient("connection reset".into())));
        venue.expect_find_order().times(1).returning(move |_, _| Ok(Some(on_venue.clone())));

        let execution = gateway(venue).place_order(&request).await.unwrap();
        assert_eq!(execution.order_id, "first");
    }

    #[tokio::test(start_paused = true)]
    async fn same_token_twice_fills_once() {
        let mut venue = venue();
        venue
            .expect_submit_order()
            .times(1)
            .returning(|order| Ok(filled(order, dec!(100), "only")));

        let gateway = gateway(venue);
        let request = order();
        let first = gateway.place_order(&request).await.unwrap();
        let second = gateway.place_order(&request).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn open_order_is_polled_until_filled() {
        let mut venue = venue();
        let request = order();
        let mut working = filled(&request, Decimal::ZERO, "slow");
        working.status = OrderStatus::New;
        working.filled_qty = Decimal::ZERO;
        let done = filled(&request, dec!(99), "slow");
        venue.expect_submit_order().times(1).returning(move |_| Ok(working.clone()));
        venue.expect_find_order().times(1).returning(move |_, _| Ok(Some(done.clone())));

        let execution = gateway(venue).place_order(&request).await.unwrap();
        assert_eq!(execution.price, dec!(99));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_a_filled_order_is_too_late() {
        let mut venue = venue();
        venue
            .expect_cancel_order()
            .times(1)
            .returning(|_, _| Err(VenueError::UnknownOrder("-2011".into())));

        let outcome = gateway(venue).cancel_order(&Symbol::from("BTCUSDT"), "42").await.unwrap();
        assert_eq!(outcome, CancelOutcome::TooLate);
    }
}
