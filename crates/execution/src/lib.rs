// In crates/execution/src/lib.rs

use async_trait::async_trait;
use core_types::{OrderRequest, OrderToken, Symbol};

pub mod error;
pub mod gateway;
pub mod live;
pub mod retry;
pub mod simulated;
pub mod types;

// Re-export public types
pub use error::{GatewayError, Result, VenueError};
pub use gateway::ExchangeGateway;
pub use live::LiveVenue;
pub use retry::RetryPolicy;
pub use simulated::{Fault, SimulatedVenue};
pub use types::{CancelOutcome, OrderStatus, VenueAccount, VenueOrder, VenuePosition};

/// Single-attempt operations against a trading venue.
///
/// Implementations make exactly one call per method and classify failures; retry,
/// timeouts and idempotency live in `ExchangeGateway`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Venue: Send + Sync {
    /// The name of the venue (e.g., "binance-futures", "paper").
    fn name(&self) -> &'static str;

    /// Submits `order`, tagging it with the order's token as client order id.
    ///
    /// # Returns
    ///
    /// The order as acknowledged. Market orders are normally final on return.
    async fn submit_order(&self, order: &OrderRequest) -> std::result::Result<VenueOrder, VenueError>;

    /// Looks up an order by its client token. `Ok(None)` when the venue never saw it.
    async fn find_order(
        &self,
        symbol: &Symbol,
        token: &OrderToken,
    ) -> std::result::Result<Option<VenueOrder>, VenueError>;

    /// Cancels an open order. `VenueError::UnknownOrder` when it already closed.
    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> std::result::Result<(), VenueError>;

    async fn account(&self) -> std::result::Result<VenueAccount, VenueError>;
}
