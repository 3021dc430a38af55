//! Technical indicators
//!
//! Window-based indicators used by the grid strategy and the regime detector.
//! Every `compute_*` function looks only at the trailing bars it needs and
//! returns zero on a cold start (fewer than `period + 1` bars), so callers
//! never have to special-case short histories.

use serde::{Deserialize, Serialize};

use crate::Candle;

/// Calculate Exponential Moving Average
///
/// Seeded with the simple mean of the first `period` values, then updated
/// recursively with multiplier `2 / (period + 1)`.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());

    if values.is_empty() || period == 0 {
        return result;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema_value: Option<f64> = None;

    for (i, &value) in values.iter().enumerate() {
        if i + 1 < period {
            result.push(None);
        } else if i + 1 == period {
            let sum: f64 = values[..period].iter().sum();
            ema_value = Some(sum / period as f64);
            result.push(ema_value);
        } else if let Some(prev_ema) = ema_value {
            let next = (value - prev_ema) * multiplier + prev_ema;
            ema_value = Some(next);
            result.push(ema_value);
        }
    }

    result
}

/// True range of a bar given the previous bar's close
pub fn true_range(high: f64, low: f64, prev_close: f64) -> f64 {
    let hl = high - low;
    let hc = (high - prev_close).abs();
    let lc = (low - prev_close).abs();
    hl.max(hc).max(lc)
}

/// Directional movement reading over a trailing window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectionalIndex {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

impl DirectionalIndex {
    /// Positive when upward movement dominates
    pub fn spread(&self) -> f64 {
        self.plus_di - self.minus_di
    }
}

fn has_history(window: &[Candle], period: usize) -> bool {
    period > 0 && window.len() > period
}

/// Trailing `period + 1` bars, i.e. `period` consecutive pairs
fn trailing(window: &[Candle], period: usize) -> &[Candle] {
    &window[window.len() - (period + 1)..]
}

/// Average directional index with its +DI and -DI components.
///
/// Uses the last `period + 1` bars. True range and directional movement are
/// smoothed with a plain arithmetic mean over the `period` bar pairs, and the
/// returned ADX is the directional index of that single window.
pub fn compute_adx(window: &[Candle], period: usize) -> DirectionalIndex {
    if !has_history(window, period) {
        return DirectionalIndex::default();
    }

    let bars = trailing(window, period);
    let mut tr_sum = 0.0;
    let mut plus_dm_sum = 0.0;
    let mut minus_dm_sum = 0.0;

    for pair in bars.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        tr_sum += true_range(cur.high, cur.low, prev.close);

        let up_move = cur.high - prev.high;
        let down_move = prev.low - cur.low;

        if up_move > down_move && up_move > 0.0 {
            plus_dm_sum += up_move;
        }
        if down_move > up_move && down_move > 0.0 {
            minus_dm_sum += down_move;
        }
    }

    let n = period as f64;
    let atr = tr_sum / n;
    if atr <= 0.0 {
        return DirectionalIndex::default();
    }

    let plus_di = plus_dm_sum / n / atr * 100.0;
    let minus_di = minus_dm_sum / n / atr * 100.0;
    let di_sum = plus_di + minus_di;
    let adx = if di_sum > 0.0 {
        100.0 * (plus_di - minus_di).abs() / di_sum
    } else {
        0.0
    };

    DirectionalIndex {
        adx,
        plus_di,
        minus_di,
    }
}

/// Mean true range over the last `period + 1` bars
pub fn compute_atr(window: &[Candle], period: usize) -> f64 {
    if !has_history(window, period) {
        return 0.0;
    }

    let total: f64 = trailing(window, period)
        .windows(2)
        .map(|pair| true_range(pair[1].high, pair[1].low, pair[0].close))
        .sum();

    total / period as f64
}

/// ATR expressed as a percentage of the latest close
pub fn compute_atr_percent(window: &[Candle], period: usize) -> f64 {
    let Some(last) = window.last() else {
        return 0.0;
    };
    if last.close <= 0.0 {
        return 0.0;
    }
    compute_atr(window, period) / last.close * 100.0
}

/// Latest EMA of closes across the whole window
pub fn compute_ema(window: &[Candle], period: usize) -> f64 {
    if !has_history(window, period) {
        return 0.0;
    }

    let closes: Vec<f64> = window.iter().map(|c| c.close).collect();
    ema(&closes, period).last().copied().flatten().unwrap_or(0.0)
}

/// Deviation of the latest close from its EMA, in percent
pub fn ema_deviation_pct(window: &[Candle], period: usize) -> f64 {
    let ema_value = compute_ema(window, period);
    match window.last() {
        Some(last) if ema_value > 0.0 => (last.close - ema_value) / ema_value * 100.0,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(i: i64, high: f64, low: f64, close: f64) -> Candle {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Candle::new_unchecked(start + Duration::hours(i), close, high, low, close, 1.0)
    }

    fn rising(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let c = 100.0 + i as f64;
                bar(i as i64, c + 0.5, c - 0.5, c)
            })
            .collect()
    }

    #[test]
    fn test_ema_seeded_with_sma() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = ema(&values, 3);
        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        assert_relative_eq!(result[2].unwrap(), 2.0);
        // multiplier = 0.5
        assert_relative_eq!(result[3].unwrap(), 3.0);
        assert_relative_eq!(result[4].unwrap(), 4.0);
    }

    #[test]
    fn test_true_range_uses_gap() {
        assert_relative_eq!(true_range(105.0, 103.0, 100.0), 5.0);
        assert_relative_eq!(true_range(101.0, 99.0, 100.0), 2.0);
    }

    #[test]
    fn test_cold_start_returns_zero() {
        let window = rising(14);
        assert_eq!(compute_adx(&window, 14), DirectionalIndex::default());
        assert_eq!(compute_atr_percent(&window, 14), 0.0);
        assert_eq!(compute_ema(&window, 14), 0.0);
        assert_eq!(compute_adx(&[], 14), DirectionalIndex::default());
    }

    #[test]
    fn test_adx_pure_uptrend() {
        let window = rising(30);
        let reading = compute_adx(&window, 14);
        // every pair: up_move 1, down_move -1, TR 1.5
        assert_relative_eq!(reading.plus_di, 100.0 / 1.5, epsilon = 1e-9);
        assert_relative_eq!(reading.minus_di, 0.0);
        assert_relative_eq!(reading.adx, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_adx_flat_market_is_zero() {
        let window: Vec<Candle> = (0..20).map(|i| bar(i, 100.0, 100.0, 100.0)).collect();
        let reading = compute_adx(&window, 14);
        assert_eq!(reading, DirectionalIndex::default());
    }

    #[test]
    fn test_adx_alternating_market_is_low() {
        let window: Vec<Candle> = (0..30)
            .map(|i| {
                let c = if i % 2 == 0 { 100.0 } else { 101.0 };
                bar(i, c + 0.5, c - 0.5, c)
            })
            .collect();
        let reading = compute_adx(&window, 14);
        assert!(reading.adx < 20.0, "adx = {}", reading.adx);
    }

    #[test]
    fn test_atr_percent_matches_range() {
        let window: Vec<Candle> = (0..20).map(|i| bar(i, 101.0, 99.0, 100.0)).collect();
        assert_relative_eq!(compute_atr(&window, 14), 2.0);
        assert_relative_eq!(compute_atr_percent(&window, 14), 2.0);
    }

    #[test]
    fn test_ema_deviation_sign() {
        let window = rising(40);
        assert!(ema_deviation_pct(&window, 20) > 0.0);
        assert_eq!(ema_deviation_pct(&window[..5], 20), 0.0);
    }
}
