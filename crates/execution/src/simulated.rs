// In crates/execution/src/simulated.rs

use app_config::PaperSettings;
use async_trait::async_trait;
use chrono::Utc;
use core_types::{OrderRequest, OrderToken, OrderType, Side, Symbol};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::types::{OrderStatus, VenueAccount, VenueOrder, VenuePosition};
use crate::{Venue, VenueError};

/// A scripted misbehaviour applied to the next `submit_order` call.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail without touching the book.
    Fail(VenueError),
    /// Fill the order but report a transient failure to the caller.
    LoseAck,
    /// Fill the order, then take `Duration` to answer.
    Stall(Duration),
    /// Fill at most this many units; the rest of the order expires.
    PartialFill(Decimal),
}

#[derive(Debug)]
struct PaperBook {
    cash: Decimal,
    positions: BTreeMap<Symbol, VenuePosition>,
    orders: HashMap<OrderToken, VenueOrder>,
    marks: HashMap<Symbol, Decimal>,
    faults: VecDeque<Fault>,
    next_id: u64,
}

impl PaperBook {
    fn mark(&self, position: &VenuePosition) -> Decimal {
        self.marks.get(&position.symbol).copied().unwrap_or(position.entry_price)
    }

    fn unrealized(&self) -> Decimal {
        self.positions
            .values()
            .map(|p| (self.mark(p) - p.entry_price) * p.size * p.side.direction_sign())
            .sum()
    }

    fn equity(&self) -> Decimal {
        self.cash + self.unrealized()
    }

    fn committed(&self) -> Decimal {
        self.positions.values().map(|p| p.entry_price * p.size).sum()
    }

    fn fill(&mut self, order: &OrderRequest, settings: &PaperSettings) -> Result<VenueOrder, VenueError> {
        // --- 1. Idempotency: a token is only ever filled once ---
        if let Some(existing) = self.orders.get(&order.token) {
            return Ok(existing.clone());
        }
        if order.size <= Decimal::ZERO {
            return Err(VenueError::Rejected(format!("quantity {} must be positive", order.size)));
        }
        let reference = match (order.order_type, order.limit_price) {
            (OrderType::Limit, Some(limit)) => limit,
            _ => order.reference_price,
        };
        if reference <= Decimal::ZERO {
            return Err(VenueError::Rejected(format!("no price for {}", order.symbol)));
        }

        // --- 2. Adverse slippage: buys fill higher, sells lower ---
        let fill_price = match order.side {
            Side::Long => reference * (Decimal::ONE + settings.slippage),
            Side::Short => reference * (Decimal::ONE - settings.slippage),
        };

        // --- 3. Net against any existing position ---
        let existing = self.positions.get(&order.symbol).cloned();
        let quantity = match &existing {
            Some(pos) if pos.side != order.side => {
                if order.reduce_only { order.size.min(pos.size) } else { order.size }
            }
            _ if order.reduce_only => {
                return Err(VenueError::Rejected(format!(
                    "reduce-only {} order for {} would not reduce a position",
                    order.side, order.symbol
                )));
            }
            _ => {
                let available = self.equity() - self.committed();
                if fill_price * order.size > available {
                    return Err(VenueError::InsufficientBalance(format!(
                        "notional {} exceeds available {}",
                        (fill_price * order.size).round_dp(2),
                        available.round_dp(2)
                    )));
                }
                order.size
            }
        };

        match existing {
            Some(mut pos) if pos.side == order.side => {
                let total = pos.size + quantity;
                pos.entry_price = (pos.entry_price * pos.size + fill_price * quantity) / total;
                pos.size = total;
                self.positions.insert(order.symbol.clone(), pos);
            }
            Some(mut pos) => {
                let closed = quantity.min(pos.size);
                self.cash += (fill_price - pos.entry_price) * closed * pos.side.direction_sign();
                pos.size -= closed;
                let remainder = quantity - closed;
                if pos.size.is_zero() {
                    self.positions.remove(&order.symbol);
                } else {
                    self.positions.insert(order.symbol.clone(), pos);
                }
                if remainder > Decimal::ZERO {
                    self.positions.insert(
                        order.symbol.clone(),
                        VenuePosition {
                            symbol: order.symbol.clone(),
                            side: order.side,
                            size: remainder,
                            entry_price: fill_price,
                        },
                    );
                }
            }
            None => {
                self.positions.insert(
                    order.symbol.clone(),
                    VenuePosition {
                        symbol: order.symbol.clone(),
                        side: order.side,
                        size: quantity,
                        entry_price: fill_price,
                    },
                );
            }
        }

        let fee = fill_price * quantity * settings.taker_fee;
        self.cash -= fee;
        self.marks.insert(order.symbol.clone(), order.reference_price);
        self.next_id += 1;

        let filled = VenueOrder {
            order_id: self.next_id.to_string(),
            token: order.token.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            status: OrderStatus::Filled,
            filled_qty: quantity,
            avg_price: fill_price,
            fee,
            updated_at: Utc::now(),
        };
        self.orders.insert(order.token.clone(), filled.clone());
        Ok(filled)
    }
}

impl PaperBook {
    fn fill_partial(
        &mut self,
        order: &OrderRequest,
        max: Decimal,
        settings: &PaperSettings,
    ) -> Result<VenueOrder, VenueError> {
        if self.orders.contains_key(&order.token) || order.size <= max {
            return self.fill(order, settings);
        }
        let mut capped = order.clone();
        capped.size = max;
        let mut filled = self.fill(&capped, settings)?;
        filled.status = OrderStatus::Expired;
        self.orders.insert(order.token.clone(), filled.clone());
        Ok(filled)
    }
}

/// Paper-trading venue: fills market orders immediately against the last known price.
///
/// Supports scripted faults so the gateway's retry and idempotency paths can be
/// exercised without a network.
#[derive(Debug)]
pub struct SimulatedVenue {
    settings: PaperSettings,
    book: Mutex<PaperBook>,
}

impl SimulatedVenue {
    pub fn new(settings: &PaperSettings) -> Self {
        tracing::info!(initial_balance = %settings.initial_balance, "Paper venue initialized.");
        Self {
            settings: settings.clone(),
            book: Mutex::new(PaperBook {
                cash: settings.initial_balance,
                positions: BTreeMap::new(),
                orders: HashMap::new(),
                marks: HashMap::new(),
                faults: VecDeque::new(),
                next_id: 0,
            }),
        }
    }

    fn book(&self) -> MutexGuard<'_, PaperBook> {
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues a fault for the next order submission.
    pub fn inject(&self, fault: Fault) {
        self.book().faults.push_back(fault);
    }

    /// Sets the mark price used for unrealized P&L.
    pub fn set_mark(&self, symbol: &Symbol, price: Decimal) {
        self.book().marks.insert(symbol.clone(), price);
    }

    /// Places a position directly on the book, as if opened outside the engine.
    pub fn seed_position(&self, position: VenuePosition) {
        self.book().positions.insert(position.symbol.clone(), position);
    }

    /// Removes a position from the book without touching cash.
    pub fn drop_position(&self, symbol: &Symbol) -> Option<VenuePosition> {
        self.book().positions.remove(symbol)
    }

    /// Credits or debits cash, e.g. funding payments.
    pub fn adjust_cash(&self, delta: Decimal) {
        self.book().cash += delta;
    }

    pub fn cash(&self) -> Decimal {
        self.book().cash
    }

    /// Number of distinct orders that reached the book.
    pub fn order_count(&self) -> usize {
        self.book().orders.len()
    }
}

#[async_trait]
impl Venue for SimulatedVenue {
    fn name(&self) -> &'static str {
        "paper"
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<VenueOrder, VenueError> {
        let fault = self.book().faults.pop_front();
        if let Some(Fault::Fail(e)) = &fault {
            tracing::debug!(symbol = %order.symbol, error = %e, "Injected venue failure.");
            return Err(e.clone());
        }

        let filled = match &fault {
            Some(Fault::PartialFill(max)) => self.book().fill_partial(order, *max, &self.settings)?,
            _ => self.book().fill(order, &self.settings)?,
        };

        match fault {
            Some(Fault::LoseAck) => {
                tracing::debug!(symbol = %order.symbol, token = %order.token, "Order filled; dropping acknowledgement.");
                Err(VenueError::Transient("acknowledgement lost".into()))
            }
            Some(Fault::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(filled)
            }
            _ => Ok(filled),
        }
    }

    async fn find_order(&self, symbol: &Symbol, token: &OrderToken) -> Result<Option<VenueOrder>, VenueError> {
        Ok(self.book().orders.get(token).filter(|o| &o.symbol == symbol).cloned())
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<(), VenueError> {
        // Paper orders fill on submission, so nothing is ever open.
        Err(VenueError::UnknownOrder(format!("order {order_id} on {symbol} is not open")))
    }

    async fn account(&self) -> Result<VenueAccount, VenueError> {
        let book = self.book();
        Ok(VenueAccount {
            wallet_balance: book.cash,
            unrealized_pnl: book.unrealized(),
            available_balance: book.equity() - book.committed(),
            positions: book.positions.values().cloned().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn venue() -> SimulatedVenue {
        SimulatedVenue::new(&PaperSettings {
            initial_balance: dec!(10000),
            taker_fee: dec!(0.001),
            slippage: dec!(0.01),
        })
    }

    fn btc() -> Symbol {
        Symbol::from("BTCUSDT")
    }

    fn buy(size: Decimal, price: Decimal) -> OrderRequest {
        OrderRequest::market(btc(), Side::Long, size, price)
    }

    #[tokio::test]
    async fn fills_with_adverse_slippage_and_fee() {
        let venue = venue();
        let order = venue.submit_order(&buy(dec!(2), dec!(100))).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.avg_price, dec!(101));
        assert_eq!(order.fee, dec!(0.202));
        assert_eq!(venue.cash(), dec!(9999.798));
    }

    #[tokio::test]
    async fn closing_order_realizes_pnl() {
        let venue = venue();
        venue.submit_order(&buy(dec!(1), dec!(100))).await.unwrap();
        let position = core_types::Position {
            symbol: btc(),
            side: Side::Long,
            entry_price: dec!(101),
            size: dec!(1),
            stop_loss: dec!(90),
            take_profit: dec!(130),
            opened_at: Utc::now(),
        };
        let close = venue.submit_order(&OrderRequest::closing(&position, dec!(120))).await.unwrap();
        // sells fill at 118.8
        assert_eq!(close.avg_price, dec!(118.8));
        let account = venue.account().await.unwrap();
        assert!(account.positions.is_empty());
        assert_eq!(account.wallet_balance, dec!(10017.5802));
    }

    #[tokio::test]
    async fn reduce_only_without_position_is_rejected() {
        let venue = venue();
        let mut order = OrderRequest::market(btc(), Side::Short, dec!(1), dec!(100));
        order.reduce_only = true;
        let err = venue.submit_order(&order).await.unwrap_err();
        assert!(matches!(err, VenueError::Rejected(_)));
    }

    #[tokio::test]
    async fn resubmitting_a_token_returns_the_same_order() {
        let venue = venue();
        let order = buy(dec!(1), dec!(100));
        let first = venue.submit_order(&order).await.unwrap();
        let second = venue.submit_order(&order).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(venue.order_count(), 1);
    }

    #[tokio::test]
    async fn lost_ack_still_lands_the_order() {
        let venue = venue();
        venue.inject(Fault::LoseAck);
        let order = buy(dec!(1), dec!(100));
        assert!(venue.submit_order(&order).await.unwrap_err().is_transient());
        let found = venue.find_order(&btc(), &order.token).await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn partial_fill_expires_the_rest() {
        let venue = venue();
        venue.inject(Fault::PartialFill(dec!(0.5)));
        let order = venue.submit_order(&buy(dec!(2), dec!(100))).await.unwrap();
        assert_eq!(order.status, OrderStatus::Expired);
        assert_eq!(order.execution().unwrap().quantity, dec!(0.5));
        let account = venue.account().await.unwrap();
        assert_eq!(account.position(&btc()).unwrap().size, dec!(0.5));
    }

    #[tokio::test]
    async fn oversized_entry_is_insufficient_balance() {
        let venue = venue();
        let err = venue.submit_order(&buy(dec!(1000), dec!(100))).await.unwrap_err();
        assert!(matches!(err, VenueError::InsufficientBalance(_)));
        assert_eq!(venue.order_count(), 0);
    }

    #[tokio::test]
    async fn equity_follows_the_mark() {
        let venue = venue();
        venue.seed_position(VenuePosition { symbol: btc(), side: Side::Short, size: dec!(2), entry_price: dec!(100) });
        venue.set_mark(&btc(), dec!(90));
        let account = venue.account().await.unwrap();
        assert_eq!(account.wallet_balance, dec!(10000));
        assert_eq!(account.equity(), dec!(10020));
        assert_eq!(account.available_balance, dec!(9820));
    }
}
