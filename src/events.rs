//! Typed backtest events
//!
//! Entries, exits, grid rebalances and filtered ticks are pushed to an
//! [`EventSink`] instead of being printed. Callers choose whether to keep
//! them ([`EventLog`]), forward them to `tracing` ([`TracingSink`]) or drop
//! them ([`NullSink`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::regime::MarketRegime;
use crate::{ExitReason, Side};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BacktestEvent {
    Entry(EntryEvent),
    Exit(ExitEvent),
    Rebalance(RebalanceEvent),
    Filtered(FilterEvent),
}

impl BacktestEvent {
    pub fn time(&self) -> DateTime<Utc> {
        match self {
            BacktestEvent::Entry(e) => e.time,
            BacktestEvent::Exit(e) => e.time,
            BacktestEvent::Rebalance(e) => e.time,
            BacktestEvent::Filtered(e) => e.time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryEvent {
    pub time: DateTime<Utc>,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub margin: f64,
    pub fee: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    /// True when at least one threshold came from the engine defaults
    pub defaults_applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_level: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitEvent {
    pub time: DateTime<Utc>,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
    pub pnl_percent: f64,
    pub reason: ExitReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceEvent {
    pub time: DateTime<Utc>,
    pub generation: u64,
    pub center_price: f64,
    pub lower_price: f64,
    pub upper_price: f64,
    /// `None` on the initial placement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_center: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterEvent {
    pub time: DateTime<Utc>,
    pub reason: FilterReason,
}

/// Why a tick produced no entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter", rename_all = "snake_case")]
pub enum FilterReason {
    WarmUp { bars: usize, required: usize },
    Regime { regime: MarketRegime, adx: f64 },
    /// Price stretched above its EMA; shorts suppressed
    TrendUp { deviation_pct: f64 },
    /// Price stretched below its EMA; longs suppressed
    TrendDown { deviation_pct: f64 },
    LowVolatility { atr_pct: f64 },
    Capacity { occupied: usize },
    LevelOccupied { level: usize },
    MidGrid { level: usize },
}

/// Receiver for engine and strategy events
pub trait EventSink {
    fn record(&mut self, event: BacktestEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn record(&mut self, _event: BacktestEvent) {}
}

impl EventSink for Vec<BacktestEvent> {
    fn record(&mut self, event: BacktestEvent) {
        self.push(event);
    }
}

/// In-memory event log
#[derive(Debug, Default, Clone, Serialize)]
pub struct EventLog {
    events: Vec<BacktestEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[BacktestEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &EntryEvent> {
        self.events.iter().filter_map(|e| match e {
            BacktestEvent::Entry(entry) => Some(entry),
            _ => None,
        })
    }

    pub fn exits(&self) -> impl Iterator<Item = &ExitEvent> {
        self.events.iter().filter_map(|e| match e {
            BacktestEvent::Exit(exit) => Some(exit),
            _ => None,
        })
    }

    pub fn rebalances(&self) -> impl Iterator<Item = &RebalanceEvent> {
        self.events.iter().filter_map(|e| match e {
            BacktestEvent::Rebalance(rebalance) => Some(rebalance),
            _ => None,
        })
    }

    pub fn filtered(&self) -> impl Iterator<Item = &FilterEvent> {
        self.events.iter().filter_map(|e| match e {
            BacktestEvent::Filtered(filtered) => Some(filtered),
            _ => None,
        })
    }

    pub fn into_inner(self) -> Vec<BacktestEvent> {
        self.events
    }
}

impl EventSink for EventLog {
    fn record(&mut self, event: BacktestEvent) {
        self.events.push(event);
    }
}

/// Forwards events to `tracing`; filtered ticks go to trace level
#[derive(Debug, Default, Clone)]
pub struct TracingSink {
    symbol: Option<String>,
}

impl TracingSink {
    pub fn for_symbol(symbol: impl Into<String>) -> Self {
        Self {
            symbol: Some(symbol.into()),
        }
    }
}

impl EventSink for TracingSink {
    fn record(&mut self, event: BacktestEvent) {
        let symbol = self.symbol.as_deref().unwrap_or("-");
        match event {
            BacktestEvent::Entry(e) => tracing::debug!(
                symbol,
                time = %e.time,
                side = %e.side,
                price = e.price,
                size = e.size,
                tp = e.take_profit_pct,
                sl = e.stop_loss_pct,
                defaults = e.defaults_applied,
                "Position opened"
            ),
            BacktestEvent::Exit(e) => tracing::debug!(
                symbol,
                time = %e.time,
                side = %e.side,
                exit_price = e.exit_price,
                pnl = format!("{:.2}", e.pnl),
                pnl_pct = format!("{:.2}%", e.pnl_percent),
                reason = %e.reason,
                "Position closed"
            ),
            BacktestEvent::Rebalance(e) => tracing::info!(
                symbol,
                time = %e.time,
                generation = e.generation,
                center = e.center_price,
                lower = e.lower_price,
                upper = e.upper_price,
                "Grid placed"
            ),
            BacktestEvent::Filtered(e) => {
                tracing::trace!(symbol, time = %e.time, reason = ?e.reason, "Tick filtered")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_event_log_partitions_by_kind() {
        let mut log = EventLog::new();
        log.record(BacktestEvent::Filtered(FilterEvent {
            time: ts(),
            reason: FilterReason::MidGrid { level: 5 },
        }));
        log.record(BacktestEvent::Rebalance(RebalanceEvent {
            time: ts(),
            generation: 1,
            center_price: 100.0,
            lower_price: 95.0,
            upper_price: 105.0,
            previous_center: None,
            drift_pct: None,
        }));

        assert_eq!(log.len(), 2);
        assert_eq!(log.rebalances().count(), 1);
        assert_eq!(log.filtered().count(), 1);
        assert_eq!(log.entries().count(), 0);
        assert_eq!(log.events()[0].time(), ts());
    }

    #[test]
    fn test_null_sink_discards() {
        let mut sink = NullSink;
        sink.record(BacktestEvent::Filtered(FilterEvent {
            time: ts(),
            reason: FilterReason::LowVolatility { atr_pct: 0.1 },
        }));
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = BacktestEvent::Filtered(FilterEvent {
            time: ts(),
            reason: FilterReason::Capacity { occupied: 5 },
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "filtered");
        assert_eq!(json["reason"]["filter"], "capacity");
    }
}
