//! Grid Trading Strategy
//!
//! Mean-reversion grid around a moving center price. Entries are taken
//! toward the center from the outer levels and gated by a regime filter,
//! an EMA trend filter, a volatility floor and a position cap.

mod config;
mod grid;
mod strategy;

pub use config::GridTradingConfig;
pub use grid::{GridLevel, GridState, LevelReservation};
pub use strategy::{GridStatistics, GridTradingStrategy};

use crate::{Config, Strategy};
use anyhow::Result;

/// Registry key
pub const NAME: &str = "grid_trading";

/// Create strategy from config (called by registry)
pub fn create(config: &Config) -> Result<Box<dyn Strategy>> {
    let strategy_config: GridTradingConfig = serde_json::from_value(config.strategy.clone())
        .map_err(|e| anyhow::anyhow!("Failed to parse grid_trading config: {}", e))?;
    strategy_config.validate()?;
    Ok(Box::new(GridTradingStrategy::new(strategy_config)))
}
