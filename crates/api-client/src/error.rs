// In crates/api-client/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to build the API client: {0}")]
    ClientBuildError(String),
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(#[from] serde_json::Error),
    #[error("API error: code {code}, msg: {msg}")]
    ApiError { code: i64, msg: String },
    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// Venue error codes that signal an overloaded or unreachable matching engine.
const TRANSIENT_CODES: &[i64] = &[
    -1000, // unknown error while processing
    -1001, // internal error; unable to process
    -1003, // too many requests
    -1007, // timeout waiting for backend; execution status unknown
    -1008, // server overloaded
];

/// Order lookups and cancels for an order the venue does not know.
const UNKNOWN_ORDER_CODES: &[i64] = &[-2011, -2013];

impl Error {
    /// True for failures that may succeed on a later attempt: timeouts, connection
    /// errors, 5xx, rate limits and the venue's own "busy" codes.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::RequestFailed(e) => e.is_timeout() || e.is_connect(),
            Error::HttpStatus { status, .. } => *status >= 500 || *status == 429 || *status == 418,
            Error::ApiError { code, .. } => TRANSIENT_CODES.contains(code),
            Error::ClientBuildError(_) | Error::DeserializationFailed(_) | Error::Malformed(_) => false,
        }
    }

    pub fn is_unknown_order(&self) -> bool {
        matches!(self, Error::ApiError { code, .. } if UNKNOWN_ORDER_CODES.contains(code))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
