//! Backtest report
//!
//! Summary statistics over a finished (or partially run) session: returns,
//! win/loss profile, fees, peak-to-trough drawdown, per-tick Sharpe and a
//! breakdown of trades by exit reason.

use serde::Serialize;
use statrs::statistics::{Data, Distribution};
use std::collections::BTreeMap;

use crate::{EquityPoint, ExitReason, Money, PerformanceMetrics, TradeRecord};

/// Trades grouped by why they were closed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExitBucket {
    pub reason: ExitReason,
    pub trades: usize,
    pub pnl: f64,
    pub win_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub initial_capital: Money,
    pub final_capital: Money,
    pub total_return_pct: f64,
    pub metrics: PerformanceMetrics,
    pub by_exit_reason: Vec<ExitBucket>,
    /// Bars processed
    pub ticks: usize,
    /// Entries whose exit thresholds were filled from engine defaults
    pub defaults_applied: usize,
    /// `final_capital` minus the last marked equity point: the exit fee of a
    /// position force-closed at the end of data, zero otherwise
    pub settlement_adjustment: f64,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
}

impl BacktestReport {
    pub fn new(
        initial_capital: Money,
        final_capital: Money,
        trades: Vec<TradeRecord>,
        equity_curve: Vec<EquityPoint>,
        ticks: usize,
        defaults_applied: usize,
    ) -> Self {
        let initial = initial_capital.to_f64();
        let total_return_pct = if initial > 0.0 {
            (final_capital - initial_capital).to_f64() / initial * 100.0
        } else {
            0.0
        };

        let mut metrics = calculate_metrics(&trades, &equity_curve);
        metrics.total_return = total_return_pct;

        let settlement_adjustment = equity_curve
            .last()
            .map_or(0.0, |point| final_capital.to_f64() - point.equity);

        Self {
            initial_capital,
            final_capital,
            total_return_pct,
            metrics,
            by_exit_reason: exit_reason_breakdown(&trades),
            ticks,
            defaults_applied,
            settlement_adjustment,
            trades,
            equity_curve,
        }
    }

    /// Number of trades closed for `reason`
    pub fn exit_count(&self, reason: ExitReason) -> usize {
        self.by_exit_reason
            .iter()
            .find(|bucket| bucket.reason == reason)
            .map_or(0, |bucket| bucket.trades)
    }

    pub fn net_pnl(&self) -> Money {
        self.trades.iter().map(|t| t.pnl).sum()
    }

    /// Report without the per-trade and per-tick series
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "initial_capital": self.initial_capital,
            "final_capital": self.final_capital,
            "total_return_pct": self.total_return_pct,
            "metrics": self.metrics,
            "by_exit_reason": self.by_exit_reason,
            "ticks": self.ticks,
            "defaults_applied": self.defaults_applied,
            "settlement_adjustment": self.settlement_adjustment,
        })
    }
}

pub fn calculate_metrics(trades: &[TradeRecord], equity_curve: &[EquityPoint]) -> PerformanceMetrics {
    let max_drawdown = max_drawdown_pct(equity_curve);
    let sharpe_ratio = sharpe_ratio(equity_curve);

    if trades.is_empty() {
        return PerformanceMetrics {
            max_drawdown,
            sharpe_ratio,
            ..PerformanceMetrics::default()
        };
    }

    let pnls: Vec<f64> = trades.iter().map(|t| t.pnl.to_f64()).collect();
    let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p <= 0.0).collect();

    let gross_profits: f64 = wins.iter().sum();
    let gross_losses: f64 = losses.iter().map(|p| p.abs()).sum();

    let profit_factor = if gross_losses > 0.0 {
        gross_profits / gross_losses
    } else if gross_profits > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let mean = |values: &[f64]| {
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    };

    PerformanceMetrics {
        total_return: 0.0,
        max_drawdown,
        win_rate: wins.len() as f64 / trades.len() as f64 * 100.0,
        profit_factor,
        sharpe_ratio,
        total_trades: trades.len(),
        winning_trades: wins.len(),
        losing_trades: losses.len(),
        avg_win: mean(&wins),
        avg_loss: mean(&losses),
        largest_win: wins.iter().copied().fold(0.0, f64::max),
        largest_loss: losses.iter().copied().fold(0.0, f64::min),
        avg_trade_pnl: mean(&pnls),
        total_fees: trades.iter().map(|t| t.fees).sum::<Money>().to_f64(),
    }
}

/// Drawdown from the running peak at each point, in percent (<= 0)
pub fn drawdown_series(equity_curve: &[EquityPoint]) -> Vec<f64> {
    let mut peak = f64::MIN;
    equity_curve
        .iter()
        .map(|point| {
            peak = peak.max(point.equity);
            if peak > 0.0 {
                ((point.equity - peak) / peak * 100.0).min(0.0)
            } else {
                0.0
            }
        })
        .collect()
}

/// Most negative drawdown over the curve, in percent (<= 0)
pub fn max_drawdown_pct(equity_curve: &[EquityPoint]) -> f64 {
    drawdown_series(equity_curve)
        .into_iter()
        .fold(0.0, f64::min)
}

/// Mean over sample standard deviation of tick-to-tick equity returns
pub fn sharpe_ratio(equity_curve: &[EquityPoint]) -> f64 {
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| {
            let prev = w[0].equity;
            if prev.abs() > 1e-12 {
                (w[1].equity - prev) / prev
            } else {
                0.0
            }
        })
        .collect();

    if returns.len() < 2 {
        return 0.0;
    }

    let data = Data::new(returns);
    let mean = data.mean().unwrap_or(0.0);
    let std_dev = data.std_dev().unwrap_or(0.0);
    if std_dev < 1e-12 {
        return 0.0;
    }
    mean / std_dev
}

fn exit_reason_breakdown(trades: &[TradeRecord]) -> Vec<ExitBucket> {
    let mut map: BTreeMap<ExitReason, (usize, f64, usize)> = BTreeMap::new();

    for trade in trades {
        let entry = map.entry(trade.reason).or_insert((0, 0.0, 0));
        entry.0 += 1;
        entry.1 += trade.pnl.to_f64();
        if trade.is_win() {
            entry.2 += 1;
        }
    }

    map.into_iter()
        .map(|(reason, (count, pnl, wins))| ExitBucket {
            reason,
            trades: count,
            pnl,
            win_rate: wins as f64 / count as f64 * 100.0,
        })
        .collect()
}
