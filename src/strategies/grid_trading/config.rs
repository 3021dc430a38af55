//! Grid Trading Strategy Configuration

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// Ten years; longer intervals would never allow a rebalance anyway
pub const MAX_REBALANCE_INTERVAL_SECS: i64 = 10 * 365 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridTradingConfig {
    // Grid geometry
    #[serde(default = "default_num_grids")]
    pub num_grids: usize,
    /// Half-width of the grid around its center, in percent
    #[serde(default = "default_range_pct")]
    pub range_pct: f64,

    // Rebalancing
    #[serde(default = "default_rebalance_threshold_pct")]
    pub rebalance_threshold_pct: f64,
    #[serde(default = "default_min_rebalance_interval_secs")]
    pub min_rebalance_interval_secs: i64,

    #[serde(default = "default_max_positions")]
    pub max_positions: usize,

    // Stop loss
    #[serde(default = "default_true")]
    pub tight_sl: bool,
    #[serde(default = "default_true")]
    pub dynamic_sl: bool,

    // EMA trend filter
    #[serde(default = "default_true")]
    pub use_trend_filter: bool,
    #[serde(default = "default_trend_period")]
    pub trend_period: usize,
    #[serde(default = "default_trend_threshold_pct")]
    pub trend_threshold_pct: f64,

    // ADX regime filter
    #[serde(default = "default_true")]
    pub use_regime_filter: bool,
    #[serde(default = "default_adx_period")]
    pub adx_period: usize,
    #[serde(default = "default_adx_threshold")]
    pub adx_threshold: f64,
    /// Tags trending readings as strong at or above this ADX
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adx_strong_threshold: Option<f64>,

    // Volatility floor
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    #[serde(default = "default_min_atr_pct")]
    pub min_atr_pct: f64,

    #[serde(default = "default_min_period")]
    pub min_period: usize,
}

fn default_num_grids() -> usize {
    10
}
fn default_range_pct() -> f64 {
    5.0
}
fn default_rebalance_threshold_pct() -> f64 {
    7.0
}
fn default_min_rebalance_interval_secs() -> i64 {
    3600
}
fn default_max_positions() -> usize {
    5
}
fn default_true() -> bool {
    true
}
fn default_trend_period() -> usize {
    20
}
fn default_trend_threshold_pct() -> f64 {
    3.0
}
fn default_adx_period() -> usize {
    14
}
fn default_adx_threshold() -> f64 {
    25.0
}
fn default_atr_period() -> usize {
    14
}
fn default_min_atr_pct() -> f64 {
    0.5
}
fn default_min_period() -> usize {
    20
}

impl Default for GridTradingConfig {
    fn default() -> Self {
        Self {
            num_grids: default_num_grids(),
            range_pct: default_range_pct(),
            rebalance_threshold_pct: default_rebalance_threshold_pct(),
            min_rebalance_interval_secs: default_min_rebalance_interval_secs(),
            max_positions: default_max_positions(),
            tight_sl: true,
            dynamic_sl: true,
            use_trend_filter: true,
            trend_period: default_trend_period(),
            trend_threshold_pct: default_trend_threshold_pct(),
            use_regime_filter: true,
            adx_period: default_adx_period(),
            adx_threshold: default_adx_threshold(),
            adx_strong_threshold: None,
            atr_period: default_atr_period(),
            min_atr_pct: default_min_atr_pct(),
            min_period: default_min_period(),
        }
    }
}

impl GridTradingConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.num_grids >= 2, "num_grids must be >= 2, got {}", self.num_grids);
        ensure!(
            self.range_pct > 0.0 && self.range_pct < 100.0,
            "range_pct must be in (0, 100), got {}",
            self.range_pct
        );
        ensure!(
            self.rebalance_threshold_pct >= 0.0,
            "rebalance_threshold_pct must be >= 0"
        );
        ensure!(
            (0..=MAX_REBALANCE_INTERVAL_SECS).contains(&self.min_rebalance_interval_secs),
            "min_rebalance_interval_secs must be in [0, {}], got {}",
            MAX_REBALANCE_INTERVAL_SECS,
            self.min_rebalance_interval_secs
        );
        ensure!(self.min_period >= 1, "min_period must be >= 1");
        Ok(())
    }
}
