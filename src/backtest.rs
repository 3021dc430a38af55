//! Backtesting engine
//!
//! Single-position, leveraged simulation driven bar by bar. On every tick the
//! strategy sees the trailing `lookback` bars; the engine then applies its
//! signal, checks take-profit/stop-loss against return on margin and marks
//! equity to the close. Fees are charged on notional at entry and exit.
//!
//! The cash ledger is kept in [`Money`], so a finished run always satisfies
//! `final_capital == initial_capital + sum(trade.pnl)`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::events::{BacktestEvent, EntryEvent, EventSink, ExitEvent, NullSink};
use crate::report::BacktestReport;
use crate::strategies::{Strategy, TickContext};
use crate::{Candle, EquityPoint, ExitReason, Money, Side, Signal, SignalKind, TradeRecord};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BacktestError {
    #[error("capital fraction must be within [0, 1], got {0}")]
    InvalidCapitalFraction(f64),

    #[error("leverage must be positive, got {0}")]
    InvalidLeverage(f64),

    #[error("initial capital must be positive, got {0}")]
    InvalidCapital(f64),

    #[error("lookback must be at least 1 bar")]
    InvalidLookback,

    #[error("candle {index} is not strictly after its predecessor")]
    UnorderedSeries { index: usize },
}

/// Where a position's exit thresholds came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdSource {
    Signal,
    /// One threshold from the signal, the other from engine defaults
    Partial,
    EngineDefault,
}

impl ThresholdSource {
    pub fn defaults_applied(self) -> bool {
        !matches!(self, ThresholdSource::Signal)
    }
}

/// The single open position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionState {
    pub side: Side,
    pub entry_price: f64,
    pub size: f64,
    pub margin: f64,
    pub entry_fee: Money,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub thresholds: ThresholdSource,
    pub open_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_level: Option<usize>,
}

impl PositionState {
    /// Price PnL before fees
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.size * self.side.direction()
    }

    /// Unrealized PnL as a percentage of margin
    pub fn return_on_margin_pct(&self, price: f64) -> f64 {
        if self.margin <= 0.0 {
            return 0.0;
        }
        self.unrealized_pnl(price) / self.margin * 100.0
    }

    /// Stop-loss is checked before take-profit
    pub fn exit_trigger(&self, price: f64) -> Option<ExitReason> {
        let roe = self.return_on_margin_pct(price);
        if roe <= -self.stop_loss_pct {
            Some(ExitReason::StopLoss)
        } else if roe >= self.take_profit_pct {
            Some(ExitReason::TakeProfit)
        } else {
            None
        }
    }
}

/// Backtest engine
#[derive(Debug, Clone)]
pub struct Backtester {
    config: EngineConfig,
}

impl Backtester {
    pub fn new(config: EngineConfig) -> Result<Self, BacktestError> {
        if !(config.leverage.is_finite() && config.leverage > 0.0) {
            return Err(BacktestError::InvalidLeverage(config.leverage));
        }
        if !(config.initial_capital.is_finite() && config.initial_capital > 0.0) {
            return Err(BacktestError::InvalidCapital(config.initial_capital));
        }
        if config.lookback == 0 {
            return Err(BacktestError::InvalidLookback);
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the whole series and return the report
    pub fn run(
        &self,
        series: &[Candle],
        strategy: &mut dyn Strategy,
        capital_fraction: f64,
        allow_reversal: bool,
    ) -> Result<BacktestReport, BacktestError> {
        let mut sink = NullSink;
        self.run_with_events(series, strategy, capital_fraction, allow_reversal, &mut sink)
    }

    /// Same as [`Backtester::run`], recording events into `sink`
    pub fn run_with_events(
        &self,
        series: &[Candle],
        strategy: &mut dyn Strategy,
        capital_fraction: f64,
        allow_reversal: bool,
        sink: &mut dyn EventSink,
    ) -> Result<BacktestReport, BacktestError> {
        let mut session = self.session(series, strategy, capital_fraction, allow_reversal, sink)?;
        while session.step().is_some() {}
        Ok(session.finish())
    }

    /// Start a step-wise run over `series`
    pub fn session<'a>(
        &self,
        series: &'a [Candle],
        strategy: &'a mut dyn Strategy,
        capital_fraction: f64,
        allow_reversal: bool,
        sink: &'a mut dyn EventSink,
    ) -> Result<BacktestSession<'a>, BacktestError> {
        if !(0.0..=1.0).contains(&capital_fraction) {
            return Err(BacktestError::InvalidCapitalFraction(capital_fraction));
        }
        validate_order(series)?;

        strategy.init();

        tracing::debug!(
            strategy = strategy.name(),
            bars = series.len(),
            capital = self.config.initial_capital,
            leverage = self.config.leverage,
            capital_fraction,
            allow_reversal,
            "Backtest session started"
        );

        Ok(BacktestSession {
            config: self.config.clone(),
            series,
            strategy,
            sink,
            capital_fraction,
            allow_reversal,
            cursor: 0,
            initial_capital: Money::from_f64(self.config.initial_capital),
            cash: Money::from_f64(self.config.initial_capital),
            position: None,
            trades: Vec::new(),
            equity_curve: Vec::with_capacity(series.len()),
            defaults_applied: 0,
        })
    }
}

fn validate_order(series: &[Candle]) -> Result<(), BacktestError> {
    match series
        .windows(2)
        .position(|pair| pair[1].datetime <= pair[0].datetime)
    {
        Some(i) => Err(BacktestError::UnorderedSeries { index: i + 1 }),
        None => Ok(()),
    }
}

/// In-progress backtest that can be advanced one bar at a time.
///
/// [`BacktestSession::finish`] may be called at any point; it closes any open
/// position at the last processed close and builds a consistent report over
/// the ticks seen so far.
pub struct BacktestSession<'a> {
    config: EngineConfig,
    series: &'a [Candle],
    strategy: &'a mut dyn Strategy,
    sink: &'a mut dyn EventSink,
    capital_fraction: f64,
    allow_reversal: bool,
    cursor: usize,
    initial_capital: Money,
    cash: Money,
    position: Option<PositionState>,
    trades: Vec<TradeRecord>,
    equity_curve: Vec<EquityPoint>,
    defaults_applied: usize,
}

impl<'a> BacktestSession<'a> {
    /// Ticks processed so far
    pub fn ticks(&self) -> usize {
        self.cursor
    }

    pub fn is_done(&self) -> bool {
        self.cursor >= self.series.len()
    }

    pub fn cash(&self) -> Money {
        self.cash
    }

    pub fn position(&self) -> Option<&PositionState> {
        self.position.as_ref()
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    /// Process the next bar. Returns the equity point recorded for it, or
    /// `None` once the series is exhausted.
    pub fn step(&mut self) -> Option<EquityPoint> {
        let series = self.series;
        let index = self.cursor;
        let candle = series.get(index)?;
        self.cursor += 1;

        let start = (index + 1).saturating_sub(self.config.lookback);
        let window = &series[start..=index];

        let signal = if window.len() >= self.strategy.min_period() {
            let mut ctx = TickContext::new(candle.datetime, &mut *self.sink);
            self.strategy.analyze(window, &mut ctx)
        } else {
            None
        };

        let opened_this_tick = match signal {
            Some(signal) => self.apply_signal(&signal, candle),
            None => false,
        };

        if !opened_this_tick {
            let trigger = self
                .position
                .as_ref()
                .and_then(|pos| pos.exit_trigger(candle.close));
            if let Some(reason) = trigger {
                self.close_position(candle.close, candle.datetime, reason);
            }
        }

        let unrealized = self
            .position
            .as_ref()
            .map_or(0.0, |pos| pos.unrealized_pnl(candle.close));
        let point = EquityPoint {
            time: candle.datetime,
            equity: self.cash.to_f64() + unrealized,
            price: candle.close,
        };
        self.equity_curve.push(point);
        Some(point)
    }

    /// Close any open position at the last processed bar and build the report
    pub fn finish(mut self) -> BacktestReport {
        let series = self.series;
        if let Some(last) = self.cursor.checked_sub(1).and_then(|i| series.get(i)) {
            if self.position.is_some() {
                self.close_position(last.close, last.datetime, ExitReason::BacktestEnd);
            }
        }

        let report = BacktestReport::new(
            self.initial_capital,
            self.cash,
            self.trades,
            self.equity_curve,
            self.cursor,
            self.defaults_applied,
        );

        tracing::debug!(
            strategy = self.strategy.name(),
            trades = report.metrics.total_trades,
            final_capital = %report.final_capital.round_dp(2),
            return_pct = format!("{:.2}%", report.total_return_pct),
            "Backtest session finished"
        );

        report
    }

    /// Returns true when a new position was opened
    fn apply_signal(&mut self, signal: &Signal, candle: &Candle) -> bool {
        let open_side = self.position.as_ref().map(|pos| pos.side);

        match (signal.kind, open_side) {
            (SignalKind::Close, Some(_)) => {
                self.close_position(candle.close, candle.datetime, ExitReason::Signal);
                false
            }
            (SignalKind::Close, None) => false,
            (_, None) => self.open_position(signal, candle),
            (kind, Some(current)) => {
                let reverses = kind.side().is_some_and(|side| side != current);
                if reverses && self.allow_reversal {
                    self.close_position(candle.close, candle.datetime, ExitReason::Reverse);
                    self.open_position(signal, candle)
                } else {
                    false
                }
            }
        }
    }

    fn open_position(&mut self, signal: &Signal, candle: &Candle) -> bool {
        let Some(side) = signal.side() else {
            return false;
        };

        let price = candle.close;
        let capital = self.cash.to_f64();
        let notional = capital * self.capital_fraction;
        if notional <= 0.0 || price <= 0.0 {
            tracing::debug!(
                time = %candle.datetime,
                capital,
                "Skipping entry: no capital to commit"
            );
            return false;
        }

        let size = notional / price;
        let margin = notional / self.config.leverage;
        let entry_fee = Money::from_f64(notional * self.config.taker_fee);

        let thresholds = match (signal.take_profit_pct, signal.stop_loss_pct) {
            (Some(_), Some(_)) => ThresholdSource::Signal,
            (None, None) => ThresholdSource::EngineDefault,
            _ => ThresholdSource::Partial,
        };
        let take_profit_pct = signal
            .take_profit_pct
            .unwrap_or(self.config.default_take_profit_pct);
        let stop_loss_pct = signal
            .stop_loss_pct
            .unwrap_or(self.config.default_stop_loss_pct);
        if thresholds.defaults_applied() {
            self.defaults_applied += 1;
        }

        let grid_level = signal.metadata.as_ref().and_then(|m| m.grid_level);
        self.cash -= entry_fee;

        self.sink.record(BacktestEvent::Entry(EntryEvent {
            time: candle.datetime,
            side,
            price,
            size,
            margin,
            fee: entry_fee.to_f64(),
            take_profit_pct,
            stop_loss_pct,
            defaults_applied: thresholds.defaults_applied(),
            grid_level,
        }));

        self.position = Some(PositionState {
            side,
            entry_price: price,
            size,
            margin,
            entry_fee,
            take_profit_pct,
            stop_loss_pct,
            thresholds,
            open_time: candle.datetime,
            grid_level,
        });
        true
    }

    fn close_position(&mut self, price: f64, time: DateTime<Utc>, reason: ExitReason) {
        let Some(pos) = self.position.take() else {
            return;
        };

        let gross = Money::from_f64(pos.unrealized_pnl(price));
        let exit_fee = Money::from_f64(pos.size * price * self.config.taker_fee);
        let pnl = gross - pos.entry_fee - exit_fee;
        self.cash += gross - exit_fee;

        let pnl_percent = if pos.margin > 0.0 {
            pnl.to_f64() / pos.margin * 100.0
        } else {
            0.0
        };

        self.sink.record(BacktestEvent::Exit(ExitEvent {
            time,
            side: pos.side,
            entry_price: pos.entry_price,
            exit_price: price,
            pnl: pnl.to_f64(),
            pnl_percent,
            reason,
        }));

        self.trades.push(TradeRecord {
            entry_time: pos.open_time,
            exit_time: time,
            side: pos.side,
            entry_price: pos.entry_price,
            exit_price: price,
            size: pos.size,
            pnl,
            pnl_percent,
            fees: pos.entry_fee + exit_fee,
            reason,
        });
    }
}
