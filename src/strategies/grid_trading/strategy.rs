//! Grid Trading Strategy Implementation
//!
//! Per tick, in order:
//! 1. place the grid on the first full window, or re-center it once price has
//!    drifted past the rebalance threshold (no entry on a placement tick)
//! 2. skip trending regimes
//! 3. derive a trend bias from the close's deviation from its EMA; the bias
//!    only suppresses entries against it
//! 4. skip quiet markets (ATR% below the floor) and a full book
//! 5. long below the middle level, short above it, aiming one level toward
//!    the center

use chrono::Duration;
use serde::Serialize;

use crate::events::{BacktestEvent, FilterReason, RebalanceEvent};
use crate::indicators::{compute_atr_percent, ema_deviation_pct};
use crate::regime::RegimeDetector;
use crate::strategies::{Strategy, TickContext};
use crate::{Candle, Side, Signal, SignalKind, SignalMetadata};

use super::config::GridTradingConfig;
use super::grid::{GridState, LevelReservation};

/// Stop loss used with `tight_sl`: ATR% x 1.0, clamped to [1, 2]
const TIGHT_SL_MULTIPLIER: f64 = 1.0;
const TIGHT_SL_BOUNDS: (f64, f64) = (1.0, 2.0);
/// Stop loss used otherwise: ATR% x 1.5, clamped to [2, 3.5]
const WIDE_SL_MULTIPLIER: f64 = 1.5;
const WIDE_SL_BOUNDS: (f64, f64) = (2.0, 3.5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrendBias {
    Up,
    Down,
}

/// Diagnostics for the current grid
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GridStatistics {
    /// Grid placements, including the first one
    pub rebalances: u64,
    pub signals_emitted: u64,
    pub occupied_levels: usize,
    pub level_hits: Vec<u32>,
    pub most_hit_level: Option<usize>,
}

pub struct GridTradingStrategy {
    config: GridTradingConfig,
    regime: RegimeDetector,
    grid: Option<GridState>,
    rebalances: u64,
    signals_emitted: u64,
}

impl GridTradingStrategy {
    pub fn new(config: GridTradingConfig) -> Self {
        let regime = if config.use_regime_filter {
            RegimeDetector::new(config.adx_period, config.adx_threshold)
                .with_strong_threshold(config.adx_strong_threshold)
        } else {
            RegimeDetector::disabled()
        };

        Self {
            config,
            regime,
            grid: None,
            rebalances: 0,
            signals_emitted: 0,
        }
    }

    pub fn config(&self) -> &GridTradingConfig {
        &self.config
    }

    /// Current grid, `None` until the first full window has been seen
    pub fn grid(&self) -> Option<&GridState> {
        self.grid.as_ref()
    }

    pub fn statistics(&self) -> GridStatistics {
        let Some(grid) = &self.grid else {
            return GridStatistics {
                rebalances: self.rebalances,
                signals_emitted: self.signals_emitted,
                ..GridStatistics::default()
            };
        };

        let level_hits: Vec<u32> = grid.levels().iter().map(|l| l.hits).collect();
        let most_hit_level = level_hits
            .iter()
            .enumerate()
            .filter(|(_, hits)| **hits > 0)
            .max_by_key(|(_, hits)| **hits)
            .map(|(index, _)| index);

        GridStatistics {
            rebalances: self.rebalances,
            signals_emitted: self.signals_emitted,
            occupied_levels: grid.occupied_count(),
            level_hits,
            most_hit_level,
        }
    }

    /// Stop loss distance in percent for the given volatility
    pub fn stop_loss_pct(&self, atr_pct: f64) -> f64 {
        if !self.config.dynamic_sl {
            return self.config.rebalance_threshold_pct * 0.5;
        }
        if self.config.tight_sl {
            (atr_pct * TIGHT_SL_MULTIPLIER).clamp(TIGHT_SL_BOUNDS.0, TIGHT_SL_BOUNDS.1)
        } else {
            (atr_pct * WIDE_SL_MULTIPLIER).clamp(WIDE_SL_BOUNDS.0, WIDE_SL_BOUNDS.1)
        }
    }

    fn place_grid(&mut self, price: f64, ctx: &mut TickContext<'_>) {
        let previous_center = self.grid.as_ref().map(|g| g.center_price);
        let drift_pct = self.grid.as_ref().map(|g| g.drift_pct(price));

        self.rebalances += 1;
        let grid = GridState::new(
            price,
            self.config.num_grids,
            self.config.range_pct,
            self.rebalances,
            ctx.now,
        );

        tracing::debug!(
            time = %ctx.now,
            center = price,
            lower = format!("{:.4}", grid.lower_price()),
            upper = format!("{:.4}", grid.upper_price()),
            generation = grid.generation,
            "Grid placed"
        );

        ctx.emit(BacktestEvent::Rebalance(RebalanceEvent {
            time: ctx.now,
            generation: grid.generation,
            center_price: price,
            lower_price: grid.lower_price(),
            upper_price: grid.upper_price(),
            previous_center,
            drift_pct,
        }));

        self.grid = Some(grid);
    }

    fn needs_placement(&self, price: f64, ctx: &TickContext<'_>) -> bool {
        match &self.grid {
            None => true,
            Some(grid) => grid.should_rebalance(
                price,
                ctx.now,
                self.config.rebalance_threshold_pct,
                Duration::try_seconds(self.config.min_rebalance_interval_secs)
                    .unwrap_or(Duration::MAX),
            ),
        }
    }

    /// Deviation of the close from its EMA when it exceeds the threshold
    fn trend_bias(&self, window: &[Candle]) -> Option<(TrendBias, f64)> {
        if !self.config.use_trend_filter {
            return None;
        }
        let deviation_pct = ema_deviation_pct(window, self.config.trend_period);
        if deviation_pct > self.config.trend_threshold_pct {
            Some((TrendBias::Up, deviation_pct))
        } else if deviation_pct < -self.config.trend_threshold_pct {
            Some((TrendBias::Down, deviation_pct))
        } else {
            None
        }
    }
}

impl Strategy for GridTradingStrategy {
    fn name(&self) -> &'static str {
        super::NAME
    }

    fn min_period(&self) -> usize {
        self.config.min_period
    }

    /// Drop any grid left over from a previous run
    fn init(&mut self) {
        self.grid = None;
        self.rebalances = 0;
        self.signals_emitted = 0;
    }

    fn diagnostics(&self) -> Option<serde_json::Value> {
        serde_json::to_value(self.statistics()).ok()
    }

    fn analyze(&mut self, window: &[Candle], ctx: &mut TickContext<'_>) -> Option<Signal> {
        let latest = window.last()?;
        if window.len() < self.config.min_period {
            ctx.filtered(FilterReason::WarmUp {
                bars: window.len(),
                required: self.config.min_period,
            });
            return None;
        }

        let price = latest.close;
        if self.needs_placement(price, ctx) {
            self.place_grid(price, ctx);
            return None;
        }

        let reading = self.regime.classify(window);
        if reading.regime.is_trending() {
            ctx.filtered(FilterReason::Regime {
                regime: reading.regime,
                adx: reading.index.adx,
            });
            return None;
        }

        let bias = self.trend_bias(window);

        let atr_pct = compute_atr_percent(window, self.config.atr_period);
        if atr_pct < self.config.min_atr_pct {
            ctx.filtered(FilterReason::LowVolatility { atr_pct });
            return None;
        }

        let stop_loss_pct = self.stop_loss_pct(atr_pct);
        let max_positions = self.config.max_positions;
        let grid = self.grid.as_mut()?;

        let occupied = grid.occupied_count();
        if occupied >= max_positions {
            ctx.filtered(FilterReason::Capacity { occupied });
            return None;
        }

        let level = grid.find_level(price);
        let middle = grid.len() / 2;

        let (side, target_level) = if level < middle {
            if let Some((TrendBias::Down, deviation_pct)) = bias {
                ctx.filtered(FilterReason::TrendDown { deviation_pct });
                return None;
            }
            (Side::Long, (level + 1).min(grid.len() - 1))
        } else if level > middle {
            if let Some((TrendBias::Up, deviation_pct)) = bias {
                ctx.filtered(FilterReason::TrendUp { deviation_pct });
                return None;
            }
            (Side::Short, level.saturating_sub(1))
        } else {
            ctx.filtered(FilterReason::MidGrid { level });
            return None;
        };

        if grid.is_occupied(level) {
            ctx.filtered(FilterReason::LevelOccupied { level });
            return None;
        }

        let target_price = grid.level(target_level)?.price;
        let take_profit_pct = match side {
            Side::Long => (target_price - price) / price * 100.0,
            Side::Short => (price - target_price) / price * 100.0,
        };

        grid.reserve(
            level,
            LevelReservation {
                side,
                entry_price: price,
                target_level,
            },
        );
        let generation = grid.generation;
        self.signals_emitted += 1;

        tracing::debug!(
            time = %ctx.now,
            %side,
            price,
            level,
            target_level,
            tp = format!("{:.3}%", take_profit_pct),
            sl = format!("{:.3}%", stop_loss_pct),
            "Grid signal"
        );

        let kind = match side {
            Side::Long => SignalKind::Long,
            Side::Short => SignalKind::Short,
        };
        Some(Signal {
            kind,
            take_profit_pct: Some(take_profit_pct),
            stop_loss_pct: Some(stop_loss_pct),
            metadata: Some(SignalMetadata {
                grid_level: Some(level),
                grid_generation: Some(generation),
                regime: Some(reading.regime),
            }),
        })
    }
}
