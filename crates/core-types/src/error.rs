// In crates/core-types/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown side: {0}")]
    UnknownSide(String),

    #[error("Invalid strategy parameters for '{name}': {source}")]
    InvalidStrategyParams {
        name: String,
        #[source]
        source: toml::de::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
