//! Parallel parameter optimization
//!
//! Runs every sweep combination against every loaded symbol on the rayon
//! pool and ranks the combinations by a chosen metric.

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::backtest::Backtester;
use crate::report::BacktestReport;
use crate::strategies::create_strategy;
use crate::sweep::extract_params;
use crate::{Candle, Config};

/// Metric used to rank optimization results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMetric {
    #[default]
    Sharpe,
    Return,
    /// Shallowest drawdown first
    Drawdown,
    WinRate,
    ProfitFactor,
}

impl FromStr for SortMetric {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sharpe" => Ok(SortMetric::Sharpe),
            "return" => Ok(SortMetric::Return),
            "drawdown" => Ok(SortMetric::Drawdown),
            "win_rate" => Ok(SortMetric::WinRate),
            "profit_factor" => Ok(SortMetric::ProfitFactor),
            other => anyhow::bail!(
                "Unknown sort metric '{}'. Use sharpe, return, drawdown, win_rate or profit_factor",
                other
            ),
        }
    }
}

/// Optimization result for a single parameter combination, averaged over
/// symbols (drawdown is the worst symbol's)
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    pub params: BTreeMap<String, f64>,
    pub total_return: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    pub total_trades: usize,
    pub symbols: usize,
}

impl OptimizationResult {
    fn from_reports(config: &Config, reports: &[BacktestReport]) -> Self {
        let n = reports.len().max(1) as f64;
        let avg = |f: fn(&BacktestReport) -> f64| reports.iter().map(f).sum::<f64>() / n;

        Self {
            params: extract_params(config),
            total_return: avg(|r| r.total_return_pct),
            max_drawdown: reports
                .iter()
                .map(|r| r.metrics.max_drawdown)
                .fold(0.0, f64::min),
            win_rate: avg(|r| r.metrics.win_rate),
            profit_factor: avg(|r| {
                if r.metrics.profit_factor.is_finite() {
                    r.metrics.profit_factor
                } else {
                    0.0
                }
            }),
            sharpe_ratio: avg(|r| r.metrics.sharpe_ratio),
            total_trades: reports.iter().map(|r| r.metrics.total_trades).sum(),
            symbols: reports.len(),
        }
    }

    fn metric(&self, metric: SortMetric) -> f64 {
        match metric {
            SortMetric::Sharpe => self.sharpe_ratio,
            SortMetric::Return => self.total_return,
            SortMetric::Drawdown => self.max_drawdown,
            SortMetric::WinRate => self.win_rate,
            SortMetric::ProfitFactor => self.profit_factor,
        }
    }
}

/// Runs sweep combinations over a fixed data set
pub struct Optimizer<'a> {
    data: &'a [(String, Vec<Candle>)],
}

impl<'a> Optimizer<'a> {
    pub fn new(data: &'a [(String, Vec<Candle>)]) -> Self {
        Self { data }
    }

    /// Backtest one combination on every symbol
    pub fn evaluate(&self, config: &Config) -> Result<OptimizationResult> {
        let backtester = Backtester::new(config.engine.clone())?;
        let reports = self
            .data
            .iter()
            .map(|(symbol, candles)| {
                let mut strategy = create_strategy(config)?;
                backtester
                    .run(
                        candles,
                        strategy.as_mut(),
                        config.backtest.capital_fraction,
                        config.backtest.allow_reversal,
                    )
                    .with_context(|| format!("Backtest failed for {}", symbol))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(OptimizationResult::from_reports(config, &reports))
    }

    /// Evaluate all combinations in parallel
    pub fn optimize(
        &self,
        configs: &[Config],
        progress_bar: Option<&ProgressBar>,
    ) -> Result<Vec<OptimizationResult>> {
        tracing::info!(
            "Testing {} parameter combinations on {} symbols",
            configs.len(),
            self.data.len()
        );

        configs
            .par_iter()
            .map(|config| {
                let result = self.evaluate(config);
                if let Some(pb) = progress_bar {
                    pb.inc(1);
                }
                result
            })
            .collect()
    }

    /// Sort optimization results best-first by the given metric
    pub fn sort_results(results: &mut [OptimizationResult], metric: SortMetric) {
        results.sort_by(|a, b| {
            b.metric(metric)
                .partial_cmp(&a.metric(metric))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(total_return: f64, max_drawdown: f64, sharpe_ratio: f64) -> OptimizationResult {
        OptimizationResult {
            params: BTreeMap::new(),
            total_return,
            max_drawdown,
            win_rate: 50.0,
            profit_factor: 1.0,
            sharpe_ratio,
            total_trades: 10,
            symbols: 1,
        }
    }

    #[test]
    fn test_sort_metric_parsing() {
        assert_eq!("return".parse::<SortMetric>().unwrap(), SortMetric::Return);
        assert_eq!("drawdown".parse::<SortMetric>().unwrap(), SortMetric::Drawdown);
        assert!("calmar".parse::<SortMetric>().is_err());
    }

    #[test]
    fn test_sort_results_best_first() {
        let mut results = vec![result(5.0, -10.0, 0.1), result(12.0, -25.0, 0.05), result(-2.0, -3.0, 0.2)];

        Optimizer::sort_results(&mut results, SortMetric::Return);
        assert_eq!(results[0].total_return, 12.0);

        Optimizer::sort_results(&mut results, SortMetric::Drawdown);
        assert_eq!(results[0].max_drawdown, -3.0);

        Optimizer::sort_results(&mut results, SortMetric::Sharpe);
        assert_eq!(results[0].sharpe_ratio, 0.2);
    }
}
