// In crates/api-client/src/types.rs

use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

/// The main client for interacting with the USDⓈ-M futures REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// The persistent HTTP client.
    pub http_client: Client,
    pub api_key: String,
    pub secret_key: String,
    /// The base URL for the futures API.
    pub base_url: String,
    pub recv_window_ms: u64,
}

/// Represents a single asset's balance in the futures account.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FuturesAsset {
    /// The asset's symbol (e.g., "USDT").
    pub asset: String,
    pub wallet_balance: Decimal,
    pub unrealized_profit: Decimal,
    pub margin_balance: Decimal,
    /// The available balance for new positions.
    pub available_balance: Decimal,
}

/// Represents a single position as returned by the account endpoint.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PositionInfo {
    pub symbol: String,
    /// The quantity of the position (positive for long, negative for short).
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    #[serde(default)]
    pub unrealized_profit: Decimal,
    /// "BOTH" in one-way mode.
    #[serde(default)]
    pub position_side: String,
}

/// Represents the overall futures account state.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AccountState {
    pub assets: Vec<FuturesAsset>,
    pub positions: Vec<PositionInfo>,
    pub total_wallet_balance: Decimal,
    pub total_unrealized_profit: Decimal,
    pub total_margin_balance: Decimal,
    pub available_balance: Option<Decimal>,
}

impl AccountState {
    /// Positions with a non-zero quantity.
    pub fn open_positions(&self) -> impl Iterator<Item = &PositionInfo> {
        self.positions.iter().filter(|p| !p.position_amt.is_zero())
    }

    pub fn asset(&self, asset: &str) -> Option<&FuturesAsset> {
        self.assets.iter().find(|a| a.asset == asset)
    }
}

/// Temporary struct to deserialize the kline response,
/// which is a JSON array of mixed types.
#[derive(Debug, Deserialize)]
pub struct RawKline(
    pub i64,    // 0: Open time
    pub String, // 1: Open
    pub String, // 2: High
    pub String, // 3: Low
    pub String, // 4: Close
    pub String, // 5: Volume
    pub i64,    // 6: Close time
    pub String, // 7: Quote asset volume
    pub i64,    // 8: Number of trades
    pub String, // 9: Taker buy base asset volume
    pub String, // 10: Taker buy quote asset volume
    pub String, // 11: Ignore
);

/// Parameters of `POST /fapi/v1/order`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub symbol: String,
    /// "BUY" or "SELL".
    pub side: &'static str,
    /// "MARKET" or "LIMIT".
    pub order_type: &'static str,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub reduce_only: bool,
    /// Becomes `newClientOrderId`; the venue rejects a second order with the same id.
    pub client_order_id: String,
}

impl NewOrder {
    /// The url-encoded parameter string, without timestamp and signature.
    pub fn to_params(&self) -> String {
        let mut params = format!(
            "symbol={}&side={}&type={}&quantity={}&newClientOrderId={}&newOrderRespType=RESULT",
            self.symbol,
            self.side,
            self.order_type,
            self.quantity.normalize(),
            self.client_order_id
        );
        if let Some(price) = self.price {
            params.push_str(&format!("&price={}&timeInForce=GTC", price.normalize()));
        }
        if self.reduce_only {
            params.push_str("&reduceOnly=true");
        }
        params
    }
}

/// An order as reported by the place, query and cancel endpoints.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub client_order_id: String,
    pub symbol: String,
    /// NEW, PARTIALLY_FILLED, FILLED, CANCELED, REJECTED, EXPIRED.
    pub status: String,
    pub side: String,
    pub r#type: String,
    /// The actual average fill price.
    pub avg_price: Decimal,
    /// The actual filled quantity.
    pub executed_qty: Decimal,
    pub orig_qty: Decimal,
    #[serde(default)]
    pub cum_quote: Decimal,
    #[serde(default)]
    pub update_time: i64,
}

impl OrderResponse {
    pub fn is_filled(&self) -> bool {
        self.status == "FILLED"
    }

    /// True once the order can no longer fill.
    pub fn is_final(&self) -> bool {
        matches!(self.status.as_str(), "FILLED" | "CANCELED" | "REJECTED" | "EXPIRED")
    }
}
