// In crates/strategies/src/factory.rs

use crate::types::{MACrossoverSettings, RsiMomentumSettings};
use crate::{Error, Result, Strategy, ma_crossover::MACrossover, rsi_momentum::RsiMomentum};
use core_types::StrategyConfig;

/// Builds the strategy named in `config`, deserializing its `params` table.
///
/// `rsi_momentum` falls back to its default parameters when the table is empty.
pub fn create_strategy(config: &StrategyConfig) -> Result<Box<dyn Strategy>> {
    let strategy: Box<dyn Strategy> = match config.name.as_str() {
        "rsi_momentum" => {
            let settings: RsiMomentumSettings = if is_empty(config) {
                RsiMomentumSettings::default()
            } else {
                config.params_as()?
            };
            Box::new(RsiMomentum::new(settings)?)
        }
        "ma_crossover" => {
            let settings: MACrossoverSettings = config.params_as()?;
            Box::new(MACrossover::new(settings)?)
        }
        unknown => return Err(Error::UnknownStrategy(unknown.to_string())),
    };
    tracing::info!(strategy = strategy.name(), "Strategy created.");
    Ok(strategy)
}

fn is_empty(config: &StrategyConfig) -> bool {
    config.params.as_table().is_some_and(|t| t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(src: &str) -> StrategyConfig {
        toml::from_str(src).unwrap()
    }

    #[test]
    fn builds_default_rsi_momentum() {
        let strategy = create_strategy(&config(r#"name = "rsi_momentum""#)).unwrap();
        assert_eq!(strategy.name(), "rsi_momentum");
    }

    #[test]
    fn builds_ma_crossover_from_params() {
        let strategy = create_strategy(&config(
            r#"
            name = "ma_crossover"
            params = { fast_period = 9, slow_period = 21 }
            "#,
        ))
        .unwrap();
        assert_eq!(strategy.name(), "ma_crossover");
    }

    #[test]
    fn unknown_name_is_an_error() {
        let err = create_strategy(&config(r#"name = "martingale""#)).err().unwrap();
        assert!(matches!(err, Error::UnknownStrategy(name) if name == "martingale"));
    }

    #[test]
    fn missing_params_surface_config_error() {
        let err = create_strategy(&config(r#"name = "ma_crossover""#)).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }
}
