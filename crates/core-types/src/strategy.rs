// In crates/core-types/src/strategy.rs

use serde::Deserialize;
use serde::de::DeserializeOwned;
use toml::Value;

use crate::{Error, Result};

/// Selects a strategy by name and carries its parameter table.
#[derive(Deserialize, Debug, Clone)]
pub struct StrategyConfig {
    pub name: String,
    // This will hold the `params = { ... }` table from the TOML
    #[serde(default = "empty_params")]
    pub params: Value,
}

impl StrategyConfig {
    /// Deserializes the `params` table into a strategy-specific settings struct.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T> {
        self.params
            .clone()
            .try_into()
            .map_err(|source| Error::InvalidStrategyParams {
                name: self.name.clone(),
                source,
            })
    }
}

fn empty_params() -> Value {
    Value::Table(Default::default())
}
