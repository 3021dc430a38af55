//! Grid Backtester
//!
//! A regime-filtered grid trading strategy and the leveraged, single-position
//! backtest engine that replays it over historical OHLCV candles, with
//! parameter sweeps and parallel optimization on top.

pub mod backtest;
pub mod config;
pub mod data;
pub mod events;
pub mod indicators;
pub mod optimizer;
pub mod regime;
pub mod report;
pub mod strategies;
pub mod sweep;
pub mod types;

pub use backtest::{BacktestError, BacktestSession, Backtester, PositionState, ThresholdSource};
pub use config::{BacktestConfig, Config, EngineConfig};
pub use events::{BacktestEvent, EventLog, EventSink, FilterReason, NullSink, TracingSink};
pub use regime::{MarketRegime, RegimeDetector, TrendStrength};
pub use report::BacktestReport;
pub use strategies::{Strategy, TickContext};
pub use types::*;
