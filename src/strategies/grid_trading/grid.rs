//! Grid geometry and level occupancy

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::Side;

/// Entry reserved on a grid level. Reservations live until the grid is
/// rebuilt; closing the position does not free the level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelReservation {
    pub side: Side,
    pub entry_price: f64,
    pub target_level: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridLevel {
    pub index: usize,
    pub price: f64,
    /// Signed offset from the center, in percent
    pub pct_from_center: f64,
    pub hits: u32,
    pub reservation: Option<LevelReservation>,
}

impl GridLevel {
    pub fn is_occupied(&self) -> bool {
        self.reservation.is_some()
    }
}

/// One generation of the grid: `num_grids + 1` ascending levels spread
/// evenly over `center ± range_pct`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridState {
    pub center_price: f64,
    pub generation: u64,
    pub placed_at: DateTime<Utc>,
    levels: Vec<GridLevel>,
}

impl GridState {
    pub fn new(
        center_price: f64,
        num_grids: usize,
        range_pct: f64,
        generation: u64,
        placed_at: DateTime<Utc>,
    ) -> Self {
        let step = 2.0 * range_pct / num_grids as f64;
        let levels = (0..=num_grids)
            .map(|index| {
                let pct_from_center = -range_pct + index as f64 * step;
                GridLevel {
                    index,
                    price: center_price * (1.0 + pct_from_center / 100.0),
                    pct_from_center,
                    hits: 0,
                    reservation: None,
                }
            })
            .collect();

        Self {
            center_price,
            generation,
            placed_at,
            levels,
        }
    }

    pub fn levels(&self) -> &[GridLevel] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&GridLevel> {
        self.levels.get(index)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn lower_price(&self) -> f64 {
        self.levels.first().map_or(self.center_price, |l| l.price)
    }

    pub fn upper_price(&self) -> f64 {
        self.levels.last().map_or(self.center_price, |l| l.price)
    }

    /// Index of the level interval `[level_i, level_i+1)` containing `price`.
    /// Prices below the grid map to 0, prices at or above the top map to the
    /// last index.
    pub fn find_level(&self, price: f64) -> usize {
        let above = self.levels.partition_point(|l| l.price <= price);
        above.saturating_sub(1)
    }

    /// Absolute distance of `price` from the center, in percent
    pub fn drift_pct(&self, price: f64) -> f64 {
        if self.center_price <= 0.0 {
            return 0.0;
        }
        ((price - self.center_price) / self.center_price).abs() * 100.0
    }

    /// Both conditions must hold: drift beyond the threshold, and at least
    /// `min_interval` elapsed on the candle clock since placement.
    pub fn should_rebalance(
        &self,
        price: f64,
        now: DateTime<Utc>,
        threshold_pct: f64,
        min_interval: Duration,
    ) -> bool {
        self.drift_pct(price) > threshold_pct && now - self.placed_at >= min_interval
    }

    pub fn occupied_count(&self) -> usize {
        self.levels.iter().filter(|l| l.is_occupied()).count()
    }

    pub fn is_occupied(&self, index: usize) -> bool {
        self.levels.get(index).is_some_and(GridLevel::is_occupied)
    }

    /// Reserve a level and count the hit. Returns false for an out-of-range
    /// or already occupied index.
    pub fn reserve(&mut self, index: usize, reservation: LevelReservation) -> bool {
        match self.levels.get_mut(index) {
            Some(level) if !level.is_occupied() => {
                level.reservation = Some(reservation);
                level.hits += 1;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn grid() -> GridState {
        GridState::new(100.0, 10, 10.0, 1, t0())
    }

    #[test]
    fn test_levels_span_range_evenly() {
        let g = grid();
        assert_eq!(g.len(), 11);
        assert_relative_eq!(g.lower_price(), 90.0, epsilon = 1e-9);
        assert_relative_eq!(g.upper_price(), 110.0, epsilon = 1e-9);
        for pair in g.levels().windows(2) {
            assert_relative_eq!(pair[1].price - pair[0].price, 2.0, epsilon = 1e-9);
        }
        assert_relative_eq!(g.levels()[5].price, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_find_level_half_open_and_clamped() {
        let g = grid();
        assert_eq!(g.find_level(93.0), 1);
        assert_eq!(g.find_level(g.levels()[1].price), 1);
        assert_eq!(g.find_level(50.0), 0);
        assert_eq!(g.find_level(200.0), 10);
        assert_eq!(g.find_level(g.upper_price()), 10);
    }

    #[test]
    fn test_find_level_monotonic() {
        let g = grid();
        let mut last = 0;
        for step in 0..400 {
            let price = 80.0 + step as f64 * 0.1;
            let level = g.find_level(price);
            assert!(level >= last);
            assert!(level < g.len());
            last = level;
        }
    }

    #[test]
    fn test_rebalance_needs_drift_and_interval() {
        let g = grid();
        let interval = Duration::seconds(3600);
        assert!(!g.should_rebalance(106.0, t0() + Duration::hours(2), 7.0, interval));
        assert!(!g.should_rebalance(110.0, t0() + Duration::minutes(30), 7.0, interval));
        assert!(g.should_rebalance(110.0, t0() + Duration::hours(1), 7.0, interval));
        assert!(g.should_rebalance(90.0, t0() + Duration::hours(1), 7.0, interval));
    }

    #[test]
    fn test_reserve_marks_level_once() {
        let mut g = grid();
        let reservation = LevelReservation {
            side: Side::Long,
            entry_price: 91.0,
            target_level: 1,
        };
        assert!(g.reserve(0, reservation));
        assert!(!g.reserve(0, reservation));
        assert!(!g.reserve(99, reservation));
        assert!(g.is_occupied(0));
        assert_eq!(g.occupied_count(), 1);
        assert_eq!(g.levels()[0].hits, 1);
    }
}
