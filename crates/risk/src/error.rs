// In crates/risk/src/error.rs

use core_types::Symbol;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("A position for {0} is already registered")]
    DuplicatePosition(Symbol),

    #[error("No open position for {0}")]
    UnknownPosition(Symbol),

    #[error("Position for {symbol} has a stop-loss ({stop_loss}) on the wrong side of entry ({entry_price})")]
    UnprotectedPosition {
        symbol: Symbol,
        entry_price: rust_decimal::Decimal,
        stop_loss: rust_decimal::Decimal,
    },

    #[error("Invalid risk parameters: {0}")]
    InvalidParameters(String),
}

pub type Result<T> = std::result::Result<T, Error>;
