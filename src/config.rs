//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files. Every section is
//! optional and falls back to its defaults; a few settings can be overridden
//! from the environment (a `.env` file is loaded by the binary).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_DATA_DIR: &str = "BACKTEST_DATA_DIR";
pub const ENV_RESULTS_DIR: &str = "BACKTEST_RESULTS_DIR";
pub const ENV_INITIAL_CAPITAL: &str = "BACKTEST_INITIAL_CAPITAL";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    /// Registry key of the strategy to run
    #[serde(default = "default_strategy_name")]
    pub strategy_name: String,
    /// Strategy parameters, parsed by the selected strategy
    #[serde(default = "default_strategy_params")]
    pub strategy: serde_json::Value,
    /// Grid search parameters for optimization (optional)
    /// Each key is a strategy param name, value is array of values to test
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<HashMap<String, Vec<serde_json::Value>>>,
}

fn default_strategy_name() -> String {
    "grid_trading".to_string()
}

fn default_strategy_params() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            backtest: BacktestConfig::default(),
            strategy_name: default_strategy_name(),
            strategy: default_strategy_params(),
            grid: None,
        }
    }
}

impl Config {
    /// Load configuration from JSON file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        config.apply_overrides_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `BACKTEST_*` overrides using the given variable lookup
    pub fn apply_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.backtest.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_RESULTS_DIR) {
            self.backtest.results_dir = PathBuf::from(dir);
        }
        if let Some(capital) = lookup(ENV_INITIAL_CAPITAL) {
            self.engine.initial_capital = capital
                .trim()
                .parse()
                .with_context(|| format!("Invalid {}: '{}'", ENV_INITIAL_CAPITAL, capital))?;
        }
        Ok(())
    }

    /// Symbols to backtest
    pub fn symbols(&self) -> &[String] {
        &self.backtest.symbols
    }
}

/// Simulated account and execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub initial_capital: f64,
    pub leverage: f64,
    /// Fee rate charged on notional at entry and exit (0.0005 = 0.05%)
    pub taker_fee: f64,
    /// Used when a signal omits its take-profit
    pub default_take_profit_pct: f64,
    /// Used when a signal omits its stop-loss
    pub default_stop_loss_pct: f64,
    /// Bars handed to the strategy on each tick
    pub lookback: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            leverage: 10.0,
            taker_fee: 0.0005,
            default_take_profit_pct: 5.0,
            default_stop_loss_pct: 1.5,
            lookback: 100,
        }
    }
}

/// Data, run and output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub data_dir: PathBuf,
    pub results_dir: PathBuf,
    pub symbols: Vec<String>,
    pub timeframe: String,
    /// Share of current capital committed per position, in [0, 1]
    pub capital_fraction: f64,
    pub allow_reversal: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            results_dir: PathBuf::from("results"),
            symbols: Vec::new(),
            timeframe: "1h".to_string(),
            capital_fraction: 1.0,
            allow_reversal: false,
        }
    }
}
