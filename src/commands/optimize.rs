//! Optimize command implementation with progress tracking

use anyhow::{Context, Result};
use grid_backtester::optimizer::{Optimizer, SortMetric};
use grid_backtester::sweep::{apply_overrides, format_params, generate_configs, total_combinations};
use grid_backtester::{data, Config};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use tracing::{info, warn};

use super::parse_symbols;

pub fn run(
    config_path: String,
    sort_by: String,
    top: usize,
    symbols: Option<String>,
    params: Vec<String>,
) -> Result<()> {
    info!("Starting optimization");

    let metric: SortMetric = sort_by.parse()?;

    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);
    if let Some(symbols) = symbols {
        config.backtest.symbols = parse_symbols(&symbols);
    }
    apply_overrides(&mut config, &params);

    let mut dataset = Vec::new();
    for symbol in config.symbols() {
        match data::load_symbol(&config.backtest.data_dir, symbol, &config.backtest.timeframe) {
            Ok(candles) => dataset.push((symbol.clone(), candles)),
            Err(e) => warn!("Skipping {}: {:#}", symbol, e),
        }
    }
    if dataset.is_empty() {
        anyhow::bail!("No data loaded for any symbol");
    }

    let configs = generate_configs(&config);
    let total = total_combinations(&config);

    println!("\n{}", "=".repeat(70));
    println!("OPTIMIZATION SUMMARY");
    println!("{}", "=".repeat(70));
    println!("  Strategy:      {}", config.strategy_name);
    println!("  Symbols:       {}", dataset.len());
    println!("  Parameters:    {} combinations", total);
    println!("  Sort by:       {}", sort_by);
    println!("{}\n", "=".repeat(70));

    let pb = ProgressBar::new(configs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("⚡ {percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}, {per_sec:.2}] {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("█░ "),
    );

    let optimizer = Optimizer::new(&dataset);
    let mut results = optimizer.optimize(&configs, Some(&pb))?;
    pb.finish_with_message("done");
    println!();

    if results.is_empty() {
        info!("No results to rank.");
        return Ok(());
    }

    Optimizer::sort_results(&mut results, metric);
    info!("Total results: {}, sorted by: {}", results.len(), sort_by);

    let display_count = top.min(results.len());
    println!("\n{}", "=".repeat(110));
    println!("TOP {} OPTIMIZATION RESULTS (sorted by {})", display_count, sort_by);
    println!("{}", "=".repeat(110));
    println!(
        "{:<4} {:>7} {:>9} {:>8} {:>8} {:>7} {:>6} | Parameters",
        "Rank", "Sharpe", "Return%", "MaxDD%", "WinR%", "PF", "Trades"
    );
    println!("{}", "-".repeat(110));

    for (i, result) in results.iter().take(top).enumerate() {
        println!(
            "{:<4} {:>7.3} {:>9.2} {:>8.2} {:>8.2} {:>7.2} {:>6} | {}",
            i + 1,
            result.sharpe_ratio,
            result.total_return,
            result.max_drawdown,
            result.win_rate,
            result.profit_factor,
            result.total_trades,
            format_params(&result.params)
        );
    }
    println!("{}", "=".repeat(110));

    let results_dir = &config.backtest.results_dir;
    fs::create_dir_all(results_dir)
        .with_context(|| format!("Failed to create {}", results_dir.display()))?;
    let output = results_dir.join("optimization_results.json");
    fs::write(&output, serde_json::to_string_pretty(&results)?)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!("Saved {} results to {}", results.len(), output.display());

    info!("Optimization completed successfully");
    Ok(())
}
