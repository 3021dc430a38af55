//! Market regime classification
//!
//! Splits the market into ranging and trending states from the directional
//! index. Grid entries are only taken while the market is ranging.

use serde::{Deserialize, Serialize};

use crate::indicators::{compute_adx, DirectionalIndex};
use crate::Candle;

/// Market regime classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    Ranging,
    TrendingUp,
    TrendingDown,
}

impl MarketRegime {
    pub fn is_trending(self) -> bool {
        !matches!(self, MarketRegime::Ranging)
    }
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MarketRegime::Ranging => "ranging",
            MarketRegime::TrendingUp => "trending_up",
            MarketRegime::TrendingDown => "trending_down",
        };
        f.write_str(label)
    }
}

/// Strength qualifier attached to trending readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendStrength {
    Weak,
    Strong,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeReading {
    pub regime: MarketRegime,
    /// Only set for trending regimes when a strong threshold is configured
    pub strength: Option<TrendStrength>,
    pub index: DirectionalIndex,
}

impl RegimeReading {
    fn ranging(index: DirectionalIndex) -> Self {
        Self {
            regime: MarketRegime::Ranging,
            strength: None,
            index,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegimeDetector {
    enabled: bool,
    adx_period: usize,
    adx_threshold: f64,
    strong_threshold: Option<f64>,
}

impl RegimeDetector {
    pub fn new(adx_period: usize, adx_threshold: f64) -> Self {
        Self {
            enabled: true,
            adx_period,
            adx_threshold,
            strong_threshold: None,
        }
    }

    /// Detector that reports every window as ranging
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(0, 0.0)
        }
    }

    pub fn with_strong_threshold(mut self, threshold: Option<f64>) -> Self {
        self.strong_threshold = threshold;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Classify the regime of the trailing window.
    ///
    /// ADX below the threshold is ranging. Otherwise the dominant directional
    /// indicator picks the trend; a +DI/-DI tie counts as trending down.
    pub fn classify(&self, window: &[Candle]) -> RegimeReading {
        if !self.enabled {
            return RegimeReading::ranging(DirectionalIndex::default());
        }

        let index = compute_adx(window, self.adx_period);
        if index.adx < self.adx_threshold {
            return RegimeReading::ranging(index);
        }

        let regime = if index.plus_di > index.minus_di {
            MarketRegime::TrendingUp
        } else {
            MarketRegime::TrendingDown
        };

        let strength = self.strong_threshold.map(|strong| {
            if index.adx >= strong {
                TrendStrength::Strong
            } else {
                TrendStrength::Weak
            }
        });

        RegimeReading {
            regime,
            strength,
            index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn series(closes: impl Iterator<Item = f64>) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .enumerate()
            .map(|(i, c)| {
                Candle::new_unchecked(start + Duration::hours(i as i64), c, c + 0.5, c - 0.5, c, 1.0)
            })
            .collect()
    }

    #[test]
    fn test_uptrend_classified_trending_up() {
        let window = series((0..30).map(|i| 100.0 + i as f64));
        let reading = RegimeDetector::new(14, 25.0).classify(&window);
        assert_eq!(reading.regime, MarketRegime::TrendingUp);
        assert!(reading.strength.is_none());
    }

    #[test]
    fn test_downtrend_classified_trending_down() {
        let window = series((0..30).map(|i| 200.0 - i as f64));
        let reading = RegimeDetector::new(14, 25.0)
            .with_strong_threshold(Some(45.0))
            .classify(&window);
        assert_eq!(reading.regime, MarketRegime::TrendingDown);
        assert_eq!(reading.strength, Some(TrendStrength::Strong));
    }

    #[test]
    fn test_choppy_market_is_ranging() {
        let window = series((0..30).map(|i| if i % 2 == 0 { 100.0 } else { 101.0 }));
        let reading = RegimeDetector::new(14, 25.0).classify(&window);
        assert_eq!(reading.regime, MarketRegime::Ranging);
        assert!(!reading.regime.is_trending());
    }

    #[test]
    fn test_cold_start_is_ranging() {
        let window = series((0..5).map(|i| 100.0 + i as f64));
        let reading = RegimeDetector::new(14, 25.0).classify(&window);
        assert_eq!(reading.regime, MarketRegime::Ranging);
    }

    #[test]
    fn test_flat_market_ties_resolve_down_when_threshold_zero() {
        let window = series((0..20).map(|_| 100.0));
        let reading = RegimeDetector::new(14, 0.0).classify(&window);
        assert_eq!(reading.regime, MarketRegime::TrendingDown);
    }

    #[test]
    fn test_disabled_detector_always_ranging() {
        let window = series((0..30).map(|i| 100.0 + i as f64));
        let reading = RegimeDetector::disabled().classify(&window);
        assert_eq!(reading.regime, MarketRegime::Ranging);
    }
}
