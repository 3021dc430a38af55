//! Backtest command implementation

use anyhow::{Context, Result};
use grid_backtester::strategies::{available_strategies, create_strategy};
use grid_backtester::{data, BacktestReport, Backtester, Config, TracingSink};
use rayon::prelude::*;
use tracing::{info, warn};

use super::parse_symbols;

/// Per-run overrides from the command line
#[derive(Debug, Default)]
pub struct Overrides {
    pub strategy: Option<String>,
    pub capital: Option<f64>,
    pub leverage: Option<f64>,
    pub fraction: Option<f64>,
    pub allow_reversal: bool,
    pub symbols: Option<String>,
}

pub fn apply(config: &mut Config, overrides: Overrides) {
    if let Some(strategy) = overrides.strategy {
        info!("Overriding strategy to: {}", strategy);
        config.strategy_name = strategy;
    }
    if let Some(capital) = overrides.capital {
        info!("Overriding initial capital to: {:.2}", capital);
        config.engine.initial_capital = capital;
    }
    if let Some(leverage) = overrides.leverage {
        info!("Overriding leverage to: {}x", leverage);
        config.engine.leverage = leverage;
    }
    if let Some(fraction) = overrides.fraction {
        info!("Overriding capital fraction to: {}", fraction);
        config.backtest.capital_fraction = fraction;
    }
    if overrides.allow_reversal {
        config.backtest.allow_reversal = true;
    }
    if let Some(symbols) = overrides.symbols {
        config.backtest.symbols = parse_symbols(&symbols);
    }
}

struct SymbolRun {
    symbol: String,
    report: BacktestReport,
    diagnostics: Option<serde_json::Value>,
}

fn run_symbol(config: &Config, symbol: &str) -> Result<SymbolRun> {
    let candles = data::load_symbol(&config.backtest.data_dir, symbol, &config.backtest.timeframe)?;
    let mut strategy = create_strategy(config)?;
    let backtester = Backtester::new(config.engine.clone())?;

    let mut sink = TracingSink::for_symbol(symbol);
    let report = backtester
        .run_with_events(
            &candles,
            strategy.as_mut(),
            config.backtest.capital_fraction,
            config.backtest.allow_reversal,
            &mut sink,
        )
        .with_context(|| format!("Backtest failed for {}", symbol))?;

    Ok(SymbolRun {
        symbol: symbol.to_string(),
        report,
        diagnostics: strategy.diagnostics(),
    })
}

fn print_report(run: &SymbolRun) {
    let report = &run.report;
    let m = &report.metrics;

    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS: {}", run.symbol);
    println!("{}", "=".repeat(60));
    println!("Initial Capital:    {:.2}", report.initial_capital.to_f64());
    println!("Final Capital:      {:.2}", report.final_capital.to_f64());
    println!("Total Return:       {:.2}%", report.total_return_pct);
    println!("Sharpe (per tick):  {:.3}", m.sharpe_ratio);
    println!("Max Drawdown:       {:.2}%", m.max_drawdown);
    println!("Win Rate:           {:.2}%", m.win_rate);
    println!("Profit Factor:      {:.2}", m.profit_factor);
    println!("Total Trades:       {}", m.total_trades);
    println!("Winning Trades:     {}", m.winning_trades);
    println!("Losing Trades:      {}", m.losing_trades);
    println!("Average Win:        {:.2}", m.avg_win);
    println!("Average Loss:       {:.2}", m.avg_loss);
    println!("Largest Win:        {:.2}", m.largest_win);
    println!("Largest Loss:       {:.2}", m.largest_loss);
    println!("Total Fees:         {:.2}", m.total_fees);
    println!("Bars Processed:     {}", report.ticks);
    if report.defaults_applied > 0 {
        println!("Default TP/SL Used: {}", report.defaults_applied);
    }
    for bucket in &report.by_exit_reason {
        println!(
            "  {:<16} {:>5} trades  pnl {:>10.2}  win {:>6.2}%",
            bucket.reason.as_str(),
            bucket.trades,
            bucket.pnl,
            bucket.win_rate
        );
    }
    if let Some(stats) = &run.diagnostics {
        println!("Strategy State:     {}", stats);
    }
    println!("{}", "=".repeat(60));
}

pub fn run(config_path: String, overrides: Overrides, export: bool) -> Result<()> {
    info!("Starting backtest");

    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);
    apply(&mut config, overrides);

    if config.symbols().is_empty() {
        anyhow::bail!("No symbols configured; set backtest.symbols or pass --symbols");
    }

    // Fail fast on an unknown strategy or bad parameters before loading data
    create_strategy(&config).with_context(|| {
        format!("Available strategies: {}", available_strategies().join(", "))
    })?;

    info!(
        "Running {} on {} symbols ({}), leverage {}x, fraction {}",
        config.strategy_name,
        config.symbols().len(),
        config.backtest.timeframe,
        config.engine.leverage,
        config.backtest.capital_fraction
    );

    let outcomes: Vec<(String, Result<SymbolRun>)> = config
        .symbols()
        .par_iter()
        .map(|symbol| (symbol.clone(), run_symbol(&config, symbol)))
        .collect();

    let mut completed = 0;
    for (symbol, outcome) in outcomes {
        match outcome {
            Ok(run) => {
                print_report(&run);
                if export {
                    data::export_results(&run.report, &config.backtest.results_dir, &run.symbol)?;
                }
                completed += 1;
            }
            Err(e) => warn!("Skipping {}: {:#}", symbol, e),
        }
    }

    if completed == 0 {
        anyhow::bail!("No symbol could be backtested");
    }

    info!("Backtest completed for {} symbols", completed);
    Ok(())
}
