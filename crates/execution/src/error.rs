// In crates/execution/src/error.rs

use thiserror::Error;

/// A single failed venue call, classified by whether trying again can help.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VenueError {
    /// Timeouts, connection failures, 5xx, rate limits.
    #[error("transient venue failure: {0}")]
    Transient(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("order rejected: {0}")]
    Rejected(String),

    /// The venue has no such order, or it can no longer be changed.
    #[error("unknown or closed order: {0}")]
    UnknownOrder(String),
}

impl VenueError {
    pub fn is_transient(&self) -> bool {
        matches!(self, VenueError::Transient(_))
    }
}

impl From<api_client::Error> for VenueError {
    fn from(e: api_client::Error) -> Self {
        if e.is_transient() {
            return VenueError::Transient(e.to_string());
        }
        if e.is_unknown_order() {
            return VenueError::UnknownOrder(e.to_string());
        }
        match &e {
            api_client::Error::ApiError { code: -2018 | -2019, .. } => VenueError::InsufficientBalance(e.to_string()),
            api_client::Error::ApiError { code: -1121, .. } => VenueError::InvalidSymbol(e.to_string()),
            _ => VenueError::Rejected(e.to_string()),
        }
    }
}

/// What the gateway reports once its retry budget is spent or a terminal error arrives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("terminal venue error: {0}")]
    Terminal(VenueError),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: VenueError },

    #[error("order not found: {0}")]
    NotFound(String),
}

impl GatewayError {
    pub fn venue_error(&self) -> Option<&VenueError> {
        match self {
            GatewayError::Terminal(e) | GatewayError::RetriesExhausted { last: e, .. } => Some(e),
            GatewayError::NotFound(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_margin_errors_to_insufficient_balance() {
        let e: VenueError = api_client::Error::ApiError { code: -2019, msg: "Margin is insufficient.".into() }.into();
        assert!(matches!(e, VenueError::InsufficientBalance(_)));
        assert!(!e.is_transient());
    }

    #[test]
    fn maps_overload_to_transient() {
        let e: VenueError = api_client::Error::HttpStatus { status: 502, body: String::new() }.into();
        assert!(e.is_transient());
    }
}
