//! Trading Strategies Module
//!
//! Strategy framework with:
//! - A small trait the backtest engine drives once per tick
//! - A per-tick context carrying the logical clock and the event sink
//! - A dynamic registry keyed by the config's `strategy_name`

pub mod grid_trading;

use crate::events::{BacktestEvent, EventSink, FilterEvent, FilterReason};
use crate::{Candle, Config, Signal};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

// =============================================================================
// Tick Context - What the engine hands a strategy alongside the window
// =============================================================================

/// Per-tick context.
///
/// `now` is the timestamp of the candle being processed, never the wall
/// clock, so replaying the same series always yields the same decisions.
pub struct TickContext<'a> {
    pub now: DateTime<Utc>,
    events: &'a mut dyn EventSink,
}

impl<'a> TickContext<'a> {
    pub fn new(now: DateTime<Utc>, events: &'a mut dyn EventSink) -> Self {
        Self { now, events }
    }

    pub fn emit(&mut self, event: BacktestEvent) {
        self.events.record(event);
    }

    /// Record why this tick produced no entry
    pub fn filtered(&mut self, reason: FilterReason) {
        let time = self.now;
        self.emit(BacktestEvent::Filtered(FilterEvent { time, reason }));
    }
}

// =============================================================================
// Strategy Trait - The contract all strategies must implement
// =============================================================================

/// Trading strategy driven by the backtest engine.
pub trait Strategy: Send {
    /// Strategy identifier (must match config's strategy_name)
    fn name(&self) -> &'static str;

    /// Minimum number of bars the engine must supply before calling `analyze`
    fn min_period(&self) -> usize;

    /// Inspect the trailing window (oldest first, latest bar last) and
    /// optionally emit a signal. Strategies may keep internal state across
    /// calls; the engine calls this at most once per tick, in time order.
    fn analyze(&mut self, window: &[Candle], ctx: &mut TickContext<'_>) -> Option<Signal>;

    /// Reset to a fresh state at the start of a backtest session.
    ///
    /// The engine calls this exactly once per session, before the first
    /// tick, so one instance can be replayed over several series without
    /// leaking grid or counter state between runs. Within a session all
    /// state changes happen inside `analyze`.
    fn init(&mut self) {}

    /// Strategy-specific state for reporting (default: none)
    fn diagnostics(&self) -> Option<serde_json::Value> {
        None
    }
}

// =============================================================================
// Strategy Factory - Type alias for strategy constructor functions
// =============================================================================

/// Factory function type for creating strategies from config
pub type StrategyFactory = fn(&Config) -> Result<Box<dyn Strategy>>;

// =============================================================================
// Strategy Registry - Dynamic registration without hardcoding
// =============================================================================

static REGISTRY: OnceLock<RwLock<HashMap<&'static str, StrategyFactory>>> = OnceLock::new();

fn get_registry() -> &'static RwLock<HashMap<&'static str, StrategyFactory>> {
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        map.insert(grid_trading::NAME, grid_trading::create as StrategyFactory);
        RwLock::new(map)
    })
}

/// Create a strategy from configuration
pub fn create_strategy(config: &Config) -> Result<Box<dyn Strategy>> {
    let registry = get_registry()
        .read()
        .map_err(|_| anyhow::anyhow!("Strategy registry lock poisoned"))?;

    let strategy_name = config.strategy_name.as_str();
    let factory = registry.get(strategy_name).ok_or_else(|| {
        let mut available: Vec<_> = registry.keys().copied().collect();
        available.sort_unstable();
        anyhow::anyhow!(
            "Unknown strategy: '{}'. Available: {}",
            strategy_name,
            available.join(", ")
        )
    })?;

    factory(config)
}

/// Get list of available strategy names
pub fn available_strategies() -> Vec<&'static str> {
    let registry = get_registry()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut names: Vec<_> = registry.keys().copied().collect();
    names.sort_unstable();
    names
}

/// Register a new strategy (for plugins or testing)
pub fn register_strategy(name: &'static str, factory: StrategyFactory) {
    get_registry()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(name, factory);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Idle;

    impl Strategy for Idle {
        fn name(&self) -> &'static str {
            "idle"
        }

        fn min_period(&self) -> usize {
            1
        }

        fn analyze(&mut self, _window: &[Candle], _ctx: &mut TickContext<'_>) -> Option<Signal> {
            None
        }
    }

    fn create_idle(_config: &Config) -> Result<Box<dyn Strategy>> {
        Ok(Box::new(Idle))
    }

    #[test]
    fn test_grid_trading_is_registered() {
        assert!(available_strategies().contains(&"grid_trading"));
        let strategy = create_strategy(&Config::default()).unwrap();
        assert_eq!(strategy.name(), "grid_trading");
    }

    #[test]
    fn test_unknown_strategy_lists_available() {
        let config = Config {
            strategy_name: "does_not_exist".to_string(),
            ..Config::default()
        };
        let err = create_strategy(&config).err().unwrap().to_string();
        assert!(err.contains("does_not_exist"));
        assert!(err.contains("grid_trading"));
    }

    #[test]
    fn test_register_custom_strategy() {
        register_strategy("idle", create_idle);
        let config = Config {
            strategy_name: "idle".to_string(),
            ..Config::default()
        };
        assert_eq!(create_strategy(&config).unwrap().name(), "idle");
    }
}
