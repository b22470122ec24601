// In crates/api-client/src/lib.rs

use app_config::ExchangeSettings;
use chrono::Utc;
use core_types::{Kline, Symbol};
use hmac::{Hmac, Mac};
use reqwest::{Method, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::Sha256;

// Create a type alias for the HMAC-SHA256 implementation.
type HmacSha256 = Hmac<Sha256>;

pub mod error;
pub mod types;

// Re-export public types
pub use error::{Error, Result};
pub use types::*;

impl ApiClient {
    /// Constructs a new ApiClient from the exchange settings.
    pub fn new(settings: &ExchangeSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| Error::ClientBuildError(e.to_string()))?;
        Ok(ApiClient {
            http_client,
            api_key: settings.api_key.clone(),
            secret_key: settings.secret_key.clone(),
            base_url: settings.rest_base_url.trim_end_matches('/').to_string(),
            recv_window_ms: settings.recv_window_ms,
        })
    }

    /// Generates an HMAC-SHA256 signature for a given query string.
    ///
    /// # Arguments
    ///
    /// * `query_string`: The URL-encoded query string to be signed.
    ///
    /// # Returns
    ///
    /// A hexadecimal string representation of the signature.
    fn sign(&self, query_string: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| Error::ClientBuildError(format!("invalid secret key: {e}")))?;
        mac.update(query_string.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Appends `recvWindow`, `timestamp` and the signature to `params`.
    fn create_signed_query(&self, params: &mut String) -> Result<()> {
        let timestamp = Utc::now().timestamp_millis();
        if !params.is_empty() {
            params.push('&');
        }
        params.push_str(&format!("recvWindow={}&timestamp={}", self.recv_window_ms, timestamp));
        let signature = self.sign(params)?;
        params.push_str(&format!("&signature={}", signature));
        Ok(())
    }

    fn signed_request(&self, method: Method, path: &str, mut params: String) -> Result<RequestBuilder> {
        self.create_signed_query(&mut params)?;
        let url = format!("{}{}?{}", self.base_url, path, params);
        Ok(self
            .http_client
            .request(method, url)
            .header("X-MBX-APIKEY", &self.api_key))
    }

    /// Sends the request and decodes the body, mapping venue error objects and
    /// non-success statuses to `Error`.
    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        // The venue returns an error object on failure, so we check for that first.
        if let Ok(value) = serde_json::from_str::<Value>(&text) {
            if let Some(code) = value.get("code").and_then(Value::as_i64) {
                if code != 0 && code != 200 {
                    let msg = value
                        .get("msg")
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown error")
                        .to_string();
                    return Err(Error::ApiError { code, msg });
                }
            }
        }
        if !status.is_success() {
            return Err(Error::HttpStatus { status: status.as_u16(), body: text });
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// Fetches the futures account balance, asset and position information.
    ///
    /// This corresponds to the `GET /fapi/v2/account` endpoint.
    pub async fn get_account(&self) -> Result<AccountState> {
        let request = self.signed_request(Method::GET, "/fapi/v2/account", String::new())?;
        self.execute(request).await
    }

    /// Fetches the most recent klines, oldest first.
    ///
    /// This corresponds to the `GET /fapi/v1/klines` endpoint.
    ///
    /// # Arguments
    ///
    /// * `symbol`: The symbol to fetch klines for.
    /// * `interval`: The kline interval (e.g., "1m", "5m", "1h").
    /// * `limit`: Number of klines to return (max 1500).
    pub async fn get_klines(&self, symbol: &Symbol, interval: &str, limit: u16) -> Result<Vec<Kline>> {
        let url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol.0, interval, limit
        );
        let raw_klines: Vec<RawKline> = self.execute(self.http_client.get(&url)).await?;

        raw_klines
            .into_iter()
            .map(|raw| {
                let parse = |s: &str| {
                    s.parse::<Decimal>().map_err(|_| Error::Malformed(format!("kline value '{s}'")))
                };
                Ok(Kline {
                    open_time: raw.0,
                    open: parse(&raw.1)?,
                    high: parse(&raw.2)?,
                    low: parse(&raw.3)?,
                    close: parse(&raw.4)?,
                    volume: parse(&raw.5)?,
                    close_time: raw.6,
                })
            })
            .collect()
    }

    /// Places a new order.
    ///
    /// Corresponds to `POST /fapi/v1/order`. One-way position mode is assumed.
    pub async fn place_order(&self, order: &NewOrder) -> Result<OrderResponse> {
        tracing::debug!(
            symbol = %order.symbol,
            side = order.side,
            quantity = %order.quantity,
            client_order_id = %order.client_order_id,
            "Submitting order."
        );
        let request = self.signed_request(Method::POST, "/fapi/v1/order", order.to_params())?;
        self.execute(request).await
    }

    /// Looks up an order by the client id it was submitted with.
    ///
    /// Returns `Ok(None)` when the venue has no such order.
    pub async fn query_order(&self, symbol: &Symbol, client_order_id: &str) -> Result<Option<OrderResponse>> {
        let params = format!("symbol={}&origClientOrderId={}", symbol.0, client_order_id);
        let request = self.signed_request(Method::GET, "/fapi/v1/order", params)?;
        match self.execute(request).await {
            Ok(order) => Ok(Some(order)),
            Err(e) if e.is_unknown_order() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Cancels an open order. Corresponds to `DELETE /fapi/v1/order`.
    pub async fn cancel_order(&self, symbol: &Symbol, order_id: i64) -> Result<OrderResponse> {
        let params = format!("symbol={}&orderId={}", symbol.0, order_id);
        let request = self.signed_request(Method::DELETE, "/fapi/v1/order", params)?;
        self.execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str) -> ApiClient {
        ApiClient::new(&ExchangeSettings {
            api_key: "key".into(),
            secret_key: "secret".into(),
            rest_base_url: base_url.into(),
            recv_window_ms: 5_000,
            request_timeout_ms: 2_000,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn klines_are_parsed_oldest_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/klines"))
            .and(query_param("symbol", "BTCUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                [1, "100.0", "101.0", "99.0", "100.5", "10", 2, "0", 5, "0", "0", "0"],
                [3, "100.5", "102.0", "100.0", "101.5", "12", 4, "0", 6, "0", "0", "0"]
            ])))
            .mount(&server)
            .await;

        let klines = client(&server.uri())
            .get_klines(&Symbol::from("BTCUSDT"), "1h", 2)
            .await
            .unwrap();
        assert_eq!(klines.len(), 2);
        assert_eq!(klines[1].close, dec!(101.5));
    }

    #[tokio::test]
    async fn venue_error_object_becomes_terminal_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fapi/v1/order"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"code": -2019, "msg": "Margin is insufficient."})),
            )
            .mount(&server)
            .await;

        let order = NewOrder {
            symbol: "BTCUSDT".into(),
            side: "BUY",
            order_type: "MARKET",
            quantity: dec!(1),
            price: None,
            reduce_only: false,
            client_order_id: "tx1".into(),
        };
        let err = client(&server.uri()).place_order(&order).await.unwrap_err();
        assert!(matches!(err, Error::ApiError { code: -2019, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/account"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let err = client(&server.uri()).get_account().await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn unknown_client_id_queries_as_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v1/order"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"code": -2013, "msg": "Order does not exist."})),
            )
            .mount(&server)
            .await;

        let found = client(&server.uri())
            .query_order(&Symbol::from("BTCUSDT"), "tx1")
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn signature_is_hex_sha256() {
        let signature = client("http://localhost").sign("symbol=BTCUSDT").unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
