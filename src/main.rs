//! Grid backtester - main entry point
//!
//! This binary provides three subcommands:
//! - backtest: Run the configured strategy over each symbol
//! - optimize: Sweep strategy parameters in parallel
//! - strategies: List registered strategies

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "grid-backtester")]
#[command(about = "Regime-filtered grid trading backtests and parameter optimization", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run strategy backtest
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/grid_1h.json")]
        config: String,

        /// Strategy name (overrides config file)
        #[arg(short, long)]
        strategy: Option<String>,

        /// Initial capital
        #[arg(long)]
        capital: Option<f64>,

        /// Leverage multiplier
        #[arg(long)]
        leverage: Option<f64>,

        /// Share of capital committed per position (0-1)
        #[arg(long)]
        fraction: Option<f64>,

        /// Close and flip on an opposite signal
        #[arg(long)]
        allow_reversal: bool,

        /// Symbols to test (comma-separated). E.g., "BTCUSDT,ETHUSDT"
        #[arg(long)]
        symbols: Option<String>,

        /// Skip writing report and trade files
        #[arg(long)]
        no_export: bool,
    },

    /// Optimize strategy parameters
    Optimize {
        /// Path to base configuration file
        #[arg(short, long, default_value = "configs/grid_1h.json")]
        config: String,

        /// Sort results by metric (sharpe, return, drawdown, win_rate, profit_factor)
        #[arg(long, default_value = "sharpe")]
        sort_by: String,

        /// Number of top results to show
        #[arg(short, long, default_value = "10")]
        top: usize,

        /// Symbols to test (comma-separated)
        #[arg(long)]
        symbols: Option<String>,

        /// Sweep override, repeatable. E.g., --param num_grids=8,10,12
        #[arg(short, long = "param")]
        params: Vec<String>,
    },

    /// List available strategies
    Strategies,
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // Keep the console clean for the progress bar
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        // Same format as the console, without colors
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Backtest { .. } => ("backtest", false),
        Commands::Optimize { .. } => ("optimize", true),
        Commands::Strategies => {
            for name in grid_backtester::strategies::available_strategies() {
                println!("{}", name);
            }
            return Ok(());
        }
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Backtest {
            config,
            strategy,
            capital,
            leverage,
            fraction,
            allow_reversal,
            symbols,
            no_export,
        } => commands::backtest::run(
            config,
            commands::backtest::Overrides {
                strategy,
                capital,
                leverage,
                fraction,
                allow_reversal,
                symbols,
            },
            !no_export,
        ),

        Commands::Optimize {
            config,
            sort_by,
            top,
            symbols,
            params,
        } => commands::optimize::run(config, sort_by, top, symbols, params),

        Commands::Strategies => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_optimize_params_repeatable() {
        let cli = Cli::parse_from([
            "grid-backtester",
            "optimize",
            "--param",
            "num_grids=8,10",
            "-p",
            "range_pct=3,5",
        ]);
        match cli.command {
            Commands::Optimize { params, sort_by, .. } => {
                assert_eq!(params, vec!["num_grids=8,10", "range_pct=3,5"]);
                assert_eq!(sort_by, "sharpe");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_setup_logging_with_console_and_file() {
        // Installs the global subscriber; only this test may call it
        assert!(setup_logging(false, "test", false).is_ok());
        assert!(tracing::dispatcher::has_been_set());
    }
}
