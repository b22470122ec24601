// In crates/strategies/src/error.rs

use core_types::Symbol;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid strategy parameters: {0}")]
    InvalidParameters(String),

    #[error(transparent)]
    Config(#[from] core_types::Error),

    /// A computed level sits on the wrong side of entry. The trade must be aborted.
    #[error("Invariant violated for {symbol}: {detail}")]
    InvariantViolation { symbol: Symbol, detail: String },
}

pub type Result<T> = std::result::Result<T, Error>;
