// In crates/execution/src/live.rs

use api_client::{AccountState, ApiClient, NewOrder, OrderResponse};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{OrderRequest, OrderToken, OrderType, Side, Symbol};
use rust_decimal::Decimal;

use crate::types::{OrderStatus, VenueAccount, VenueOrder, VenuePosition};
use crate::{Venue, VenueError};

/// USDⓈ-M futures venue over the signed REST client.
pub struct LiveVenue {
    client: ApiClient,
    quote_asset: String,
}

impl LiveVenue {
    pub fn new(client: ApiClient, quote_asset: impl Into<String>) -> Self {
        Self { client, quote_asset: quote_asset.into() }
    }
}

fn new_order(order: &OrderRequest) -> NewOrder {
    NewOrder {
        symbol: order.symbol.0.clone(),
        side: match order.side {
            Side::Long => "BUY",
            Side::Short => "SELL",
        },
        order_type: match order.order_type {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
        },
        quantity: order.size,
        price: order.limit_price.filter(|_| order.order_type == OrderType::Limit),
        reduce_only: order.reduce_only,
        client_order_id: order.token.0.clone(),
    }
}

fn venue_order(response: OrderResponse) -> Result<VenueOrder, VenueError> {
    let side = match response.side.as_str() {
        "BUY" => Side::Long,
        "SELL" => Side::Short,
        other => return Err(VenueError::Rejected(format!("unexpected order side {other}"))),
    };
    Ok(VenueOrder {
        order_id: response.order_id.to_string(),
        token: OrderToken(response.client_order_id),
        symbol: Symbol(response.symbol),
        side,
        status: OrderStatus::parse(&response.status),
        filled_qty: response.executed_qty,
        avg_price: response.avg_price,
        // Commission is settled by the venue and shows up in equity at reconciliation.
        fee: Decimal::ZERO,
        updated_at: DateTime::from_timestamp_millis(response.update_time).unwrap_or_else(Utc::now),
    })
}

fn venue_account(state: AccountState, quote_asset: &str) -> VenueAccount {
    let available_balance = state
        .available_balance
        .or_else(|| state.asset(quote_asset).map(|a| a.available_balance))
        .unwrap_or(Decimal::ZERO);
    let positions = state
        .open_positions()
        .map(|p| VenuePosition {
            symbol: Symbol(p.symbol.clone()),
            side: if p.position_amt.is_sign_negative() { Side::Short } else { Side::Long },
            size: p.position_amt.abs(),
            entry_price: p.entry_price,
        })
        .collect();
    VenueAccount {
        wallet_balance: state.total_wallet_balance,
        unrealized_pnl: state.total_unrealized_profit,
        available_balance,
        positions,
    }
}

#[async_trait]
impl Venue for LiveVenue {
    fn name(&self) -> &'static str {
        "binance-futures"
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<VenueOrder, VenueError> {
        let response = self.client.place_order(&new_order(order)).await?;
        venue_order(response)
    }

    async fn find_order(&self, symbol: &Symbol, token: &OrderToken) -> Result<Option<VenueOrder>, VenueError> {
        match self.client.query_order(symbol, &token.0).await? {
            Some(response) => venue_order(response).map(Some),
            None => Ok(None),
        }
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<(), VenueError> {
        let id: i64 = order_id
            .parse()
            .map_err(|_| VenueError::UnknownOrder(format!("malformed order id {order_id}")))?;
        self.client.cancel_order(symbol, id).await?;
        Ok(())
    }

    async fn account(&self) -> Result<VenueAccount, VenueError> {
        let state = self.client.get_account().await?;
        Ok(venue_account(state, &self.quote_asset))
    }
}
