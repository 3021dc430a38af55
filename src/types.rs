//! Core data types used across the backtesting system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::regime::MarketRegime;

/// Validation errors for candle data
#[derive(Debug, Error, PartialEq)]
pub enum CandleValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive and finite: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// OHLCV candlestick data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Create a new candle with validation
    pub fn new(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        let candle = Self::new_unchecked(datetime, open, high, low, close, volume);
        candle.validate()?;
        Ok(candle)
    }

    /// Create a candle without validation (for trusted sources or synthetic series)
    pub fn new_unchecked(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn validate(&self) -> Result<(), CandleValidationError> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(CandleValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(CandleValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume(self.volume));
        }

        if self.open < self.low || self.open > self.high {
            return Err(CandleValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(CandleValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// +1 for long, -1 for short
    pub fn direction(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// What a strategy asks the engine to do on this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Long,
    Short,
    Close,
}

impl SignalKind {
    /// Entry side requested by the signal; `None` for `Close`
    pub fn side(self) -> Option<Side> {
        match self {
            SignalKind::Long => Some(Side::Long),
            SignalKind::Short => Some(Side::Short),
            SignalKind::Close => None,
        }
    }
}

/// Strategy-specific context carried back to the engine alongside a signal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_level: Option<usize>,
    /// Grid generation the level index belongs to; indices from an older
    /// generation are stale after a rebalance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_generation: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regime: Option<MarketRegime>,
}

/// Trading signal
///
/// Take-profit and stop-loss are percentages of margin. A `None` threshold is
/// filled in by the engine's defaults, and the substitution is recorded on the
/// opened position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub take_profit_pct: Option<f64>,
    pub stop_loss_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SignalMetadata>,
}

impl Signal {
    pub fn long(take_profit_pct: f64, stop_loss_pct: f64) -> Self {
        Self::entry(SignalKind::Long, take_profit_pct, stop_loss_pct)
    }

    pub fn short(take_profit_pct: f64, stop_loss_pct: f64) -> Self {
        Self::entry(SignalKind::Short, take_profit_pct, stop_loss_pct)
    }

    pub fn close() -> Self {
        Signal {
            kind: SignalKind::Close,
            take_profit_pct: None,
            stop_loss_pct: None,
            metadata: None,
        }
    }

    /// Entry signal without explicit exit thresholds
    pub fn bare(kind: SignalKind) -> Self {
        Signal {
            kind,
            take_profit_pct: None,
            stop_loss_pct: None,
            metadata: None,
        }
    }

    fn entry(kind: SignalKind, take_profit_pct: f64, stop_loss_pct: f64) -> Self {
        Signal {
            kind,
            take_profit_pct: Some(take_profit_pct),
            stop_loss_pct: Some(stop_loss_pct),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: SignalMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn side(&self) -> Option<Side> {
        self.kind.side()
    }
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Reverse,
    Signal,
    BacktestEnd,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Reverse => "reverse",
            ExitReason::Signal => "signal",
            ExitReason::BacktestEnd => "backtest_end",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completed open→close cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    /// Net of entry and exit fees
    pub pnl: Money,
    /// Net PnL relative to margin
    pub pnl_percent: f64,
    pub fees: Money,
    pub reason: ExitReason,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        self.pnl.is_positive()
    }

    /// Unleveraged price move in the trade's favour, in percent
    pub fn price_return_pct(&self) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        (self.exit_price - self.entry_price) / self.entry_price * 100.0 * self.side.direction()
    }
}

/// Mark-to-market equity sample, one per simulated tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    pub equity: f64,
    pub price: f64,
}

/// Portfolio statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    /// Most negative peak-to-trough decline in percent (always <= 0)
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    /// Mean over standard deviation of per-tick equity returns (not annualized)
    pub sharpe_ratio: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub avg_win: f64,
    /// Mean PnL of losing trades (negative or zero)
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub avg_trade_pnl: f64,
    pub total_fees: f64,
}

// ============================================================================
// Money Type - Precise Decimal Arithmetic for Monetary Values
// ============================================================================

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// Decimal amount used for the engine's cash ledger, PnL and fees.
///
/// Prices and sizes stay `f64` for indicator math; every amount that is summed
/// into the account goes through `Money` so that the final balance equals the
/// initial balance plus the sum of trade PnL exactly.
#[derive(Debug, Clone, Copy, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(#[serde(with = "rust_decimal::serde::str")] Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Decimal places kept when converting from `f64`. Quantizing keeps every
    /// ledger sum exact.
    pub const SCALE: u32 = 10;

    /// Non-finite inputs map to zero
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() {
            return Money::ZERO;
        }
        let decimal = Decimal::try_from(value)
            .or_else(|_| Decimal::from_f64_retain(value).ok_or(()))
            .unwrap_or(Decimal::ZERO);
        Money(decimal.round_dp(Self::SCALE))
    }

    pub fn from_decimal(value: Decimal) -> Self {
        Money(value)
    }

    pub fn to_f64(self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }

    pub fn abs(self) -> Self {
        Money(self.0.abs())
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    pub fn is_negative(self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn round_dp(self, dp: u32) -> Self {
        Money(self.0.round_dp(dp))
    }

    pub fn inner(self) -> Decimal {
        self.0
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq for Money {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl PartialOrd for Money {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Money {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Self;
    fn neg(self) -> Self::Output {
        Money(-self.0)
    }
}

impl From<f64> for Money {
    fn from(value: f64) -> Self {
        Money::from_f64(value)
    }
}

impl From<Money> for f64 {
    fn from(value: Money) -> Self {
        value.to_f64()
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, x| acc + x)
    }
}

impl<'a> std::iter::Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, x| acc + *x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_candle_validation_accepts_consistent_bar() {
        assert!(Candle::new(ts(), 100.0, 101.0, 99.0, 100.5, 10.0).is_ok());
    }

    #[test]
    fn test_candle_validation_rejects_inverted_range() {
        let err = Candle::new(ts(), 100.0, 99.0, 101.0, 100.0, 1.0).unwrap_err();
        assert!(matches!(err, CandleValidationError::HighLessThanLow { .. }));
    }

    #[test]
    fn test_candle_validation_rejects_close_outside_range() {
        let err = Candle::new(ts(), 100.0, 101.0, 99.0, 102.0, 1.0).unwrap_err();
        assert!(matches!(err, CandleValidationError::CloseOutOfRange { .. }));
    }

    #[test]
    fn test_candle_validation_rejects_nan_price() {
        let err = Candle::new(ts(), f64::NAN, 101.0, 99.0, 100.0, 1.0).unwrap_err();
        assert!(matches!(err, CandleValidationError::NonPositivePrice { .. }));
    }

    #[test]
    fn test_signal_kind_sides() {
        assert_eq!(SignalKind::Long.side(), Some(Side::Long));
        assert_eq!(SignalKind::Short.side(), Some(Side::Short));
        assert_eq!(SignalKind::Close.side(), None);
        assert_eq!(Side::Long.opposite(), Side::Short);
    }

    #[test]
    fn test_bare_signal_has_no_thresholds() {
        let signal = Signal::bare(SignalKind::Short);
        assert!(signal.take_profit_pct.is_none());
        assert!(signal.stop_loss_pct.is_none());
    }

    #[test]
    fn test_exit_reason_labels() {
        assert_eq!(ExitReason::BacktestEnd.to_string(), "backtest_end");
        assert_eq!(
            serde_json::to_string(&ExitReason::TakeProfit).unwrap(),
            "\"take_profit\""
        );
    }

    #[test]
    fn test_money_precision() {
        let a = Money::from_f64(0.1);
        let b = Money::from_f64(0.2);
        assert_eq!(a + b, Money::from_decimal(dec!(0.3)));
    }

    #[test]
    fn test_money_non_finite_is_zero() {
        assert_eq!(Money::from_f64(f64::INFINITY), Money::ZERO);
        assert_eq!(Money::from_f64(f64::NAN), Money::ZERO);
    }

    #[test]
    fn test_money_sign_helpers() {
        assert!(Money::from_f64(1.5).is_positive());
        assert!(Money::from_f64(-1.5).is_negative());
        assert!(!Money::ZERO.is_positive());
        assert!(!Money::ZERO.is_negative());
    }

    #[test]
    fn test_money_sum_and_serde() {
        let total: Money = [10.0, 20.0, 30.5].iter().map(|&v| Money::from_f64(v)).sum();
        assert_eq!(total.to_f64(), 60.5);

        let json = serde_json::to_string(&total).unwrap();
        let parsed: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(total, parsed);
    }
}
