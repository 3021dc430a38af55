//! Data loading and export
//!
//! Loads OHLCV series from CSV files named `{symbol}_{timeframe}.csv` and
//! writes backtest results (summary JSON and trade CSV) to the results
//! directory.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::report::BacktestReport;
use crate::{Candle, TradeRecord};

// =============================================================================
// CSV Data Loading
// =============================================================================

/// Parse a timestamp as RFC 3339, `%Y-%m-%d %H:%M:%S` (UTC) or epoch millis
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = raw.parse::<DateTime<Utc>>() {
        return Ok(dt);
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc));
    }
    let millis: i64 = raw
        .parse()
        .with_context(|| format!("Failed to parse datetime: {}", raw))?;
    DateTime::<Utc>::from_timestamp_millis(millis)
        .with_context(|| format!("Timestamp out of range: {}", raw))
}

fn parse_field(record: &csv::StringRecord, idx: usize, name: &str) -> Result<f64> {
    record
        .get(idx)
        .with_context(|| format!("Missing {} column", name))?
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse {}", name))
}

/// Load OHLCV data from CSV file.
///
/// Expects a header row followed by `datetime,open,high,low,close,volume`.
/// Rows are validated, sorted by time and de-duplicated (the last row for a
/// repeated timestamp wins).
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut candles = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let row = row_idx + 1;
        let record = result.with_context(|| format!("Failed to read row {}", row))?;

        let dt_str = record.get(0).context("Missing datetime column")?;
        let datetime = parse_timestamp(dt_str).with_context(|| format!("Row {}", row))?;

        let candle = Candle::new(
            datetime,
            parse_field(&record, 1, "open").with_context(|| format!("Row {}", row))?,
            parse_field(&record, 2, "high").with_context(|| format!("Row {}", row))?,
            parse_field(&record, 3, "low").with_context(|| format!("Row {}", row))?,
            parse_field(&record, 4, "close").with_context(|| format!("Row {}", row))?,
            parse_field(&record, 5, "volume").with_context(|| format!("Row {}", row))?,
        )
        .with_context(|| format!("Row {}: invalid candle", row))?;

        candles.push(candle);
    }

    Ok(prepare_series(candles))
}

/// Sort by time and drop repeated timestamps, keeping the last occurrence
pub fn prepare_series(mut candles: Vec<Candle>) -> Vec<Candle> {
    let before = candles.len();
    let already_sorted = candles.windows(2).all(|w| w[0].datetime <= w[1].datetime);
    if !already_sorted {
        candles.sort_by_key(|c| c.datetime);
        warn!("Candles were out of order; sorted {} rows", before);
    }

    let mut deduped: Vec<Candle> = Vec::with_capacity(candles.len());
    for candle in candles {
        match deduped.last_mut() {
            Some(last) if last.datetime == candle.datetime => *last = candle,
            _ => deduped.push(candle),
        }
    }

    if deduped.len() < before {
        warn!("Dropped {} duplicate timestamps", before - deduped.len());
    }
    deduped
}

/// Path of a symbol's candle file
pub fn symbol_path(data_dir: impl AsRef<Path>, symbol: &str, timeframe: &str) -> PathBuf {
    data_dir
        .as_ref()
        .join(format!("{}_{}.csv", symbol, timeframe))
}

/// Load the candle file for one symbol
pub fn load_symbol(data_dir: impl AsRef<Path>, symbol: &str, timeframe: &str) -> Result<Vec<Candle>> {
    let path = symbol_path(data_dir, symbol, timeframe);
    if !path.exists() {
        anyhow::bail!("Data file not found: {}", path.display());
    }

    let candles = load_csv(&path).with_context(|| format!("Failed to load data for {}", symbol))?;
    info!("Loaded {} candles for {}", candles.len(), symbol);
    Ok(candles)
}

/// Save candles to CSV in the format `load_csv` reads
pub fn save_csv(candles: &[Candle], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writer.write_record(["datetime", "open", "high", "low", "close", "volume"])?;
    for candle in candles {
        writer.write_record([
            candle.datetime.format("%Y-%m-%d %H:%M:%S").to_string(),
            candle.open.to_string(),
            candle.high.to_string(),
            candle.low.to_string(),
            candle.close.to_string(),
            candle.volume.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

// =============================================================================
// Result Export
// =============================================================================

/// Write the trade list as CSV
pub fn write_trades_csv(trades: &[TradeRecord], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for trade in trades {
        writer.serialize(trade)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write `{symbol}_report.json` and `{symbol}_trades.csv` into `results_dir`
pub fn export_results(
    report: &BacktestReport,
    results_dir: impl AsRef<Path>,
    symbol: &str,
) -> Result<(PathBuf, PathBuf)> {
    let dir = results_dir.as_ref();
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create results directory {}", dir.display()))?;

    let report_path = dir.join(format!("{}_report.json", symbol));
    let json = serde_json::to_string_pretty(&report.summary())?;
    fs::write(&report_path, json)
        .with_context(|| format!("Failed to write {}", report_path.display()))?;

    let trades_path = dir.join(format!("{}_trades.csv", symbol));
    write_trades_csv(&report.trades, &trades_path)?;

    info!(
        "Saved results for {} to {}",
        symbol,
        dir.display()
    );
    Ok((report_path, trades_path))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "grid_backtester_{}_{}",
            name,
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn candle(hour: i64, close: f64) -> Candle {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Candle::new(start + Duration::hours(hour), close, close + 1.0, close - 1.0, close, 10.0)
            .unwrap()
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-01T12:00:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-01 12:00:00").unwrap(), expected);
        assert_eq!(
            parse_timestamp(&expected.timestamp_millis().to_string()).unwrap(),
            expected
        );
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_prepare_series_sorts_and_dedupes() {
        let series = prepare_series(vec![
            candle(2, 102.0),
            candle(0, 100.0),
            candle(1, 101.0),
            candle(1, 111.0),
        ]);
        assert_eq!(series.len(), 3);
        assert!(series.windows(2).all(|w| w[0].datetime < w[1].datetime));
        assert_eq!(series[1].close, 111.0);
    }

    #[test]
    fn test_csv_round_trip_through_symbol_path() {
        let dir = scratch_dir("load_symbol");
        let candles = vec![candle(0, 100.0), candle(1, 101.0), candle(2, 99.5)];
        save_csv(&candles, symbol_path(&dir, "BTCUSDT", "1h")).unwrap();

        let loaded = load_symbol(&dir, "BTCUSDT", "1h").unwrap();
        assert_eq!(loaded, candles);
        assert!(load_symbol(&dir, "ETHUSDT", "1h").is_err());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_csv_rejects_invalid_row() {
        let dir = scratch_dir("invalid_row");
        let path = dir.join("bad.csv");
        fs::write(
            &path,
            "datetime,open,high,low,close,volume\n2024-01-01 00:00:00,100,99,101,100,1\n",
        )
        .unwrap();

        let err = load_csv(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Row 1"));
        fs::remove_dir_all(&dir).ok();
    }
}
