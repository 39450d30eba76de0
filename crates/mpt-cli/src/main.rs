mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use commands::frontier::FrontierArgs;
use commands::metrics::MetricsArgs;
use commands::optimize::{CompareArgs, OptimizeArgs};
use commands::rebalance::RebalanceArgs;
use commands::simulate::{ScenariosArgs, SimulateArgs};
use commands::stats::StatsArgs;

/// Modern Portfolio Theory toolkit
#[derive(Parser)]
#[command(
    name = "mpt",
    version,
    about = "Portfolio optimisation, efficient frontier, risk metrics, simulation and rebalancing",
    long_about = "Estimate market statistics from price history, optimise portfolio weights \
                  under five objectives (max Sharpe, min volatility, max return, risk parity, \
                  equal weight), trace the efficient frontier, report risk metrics, project \
                  value with Monte Carlo and generate drift-band rebalancing trades."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log diagnostics to stderr (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate annualised mean returns and covariance from prices or returns
    Stats(StatsArgs),
    /// Optimise weights for one objective
    Optimize(OptimizeArgs),
    /// Trace the efficient frontier
    Frontier(FrontierArgs),
    /// Risk and performance report for a weight vector
    Metrics(MetricsArgs),
    /// Monte Carlo projection of portfolio value
    Simulate(SimulateArgs),
    /// Compare horizon, contribution and goal scenarios under one seed
    Scenarios(ScenariosArgs),
    /// Drift check and rebalancing trades
    Rebalance(RebalanceArgs),
    /// Run several objectives side by side
    Compare(CompareArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Stats(args) => commands::stats::run_stats(args),
        Commands::Optimize(args) => commands::optimize::run_optimize(args),
        Commands::Frontier(args) => commands::frontier::run_frontier(args),
        Commands::Metrics(args) => commands::metrics::run_metrics(args),
        Commands::Simulate(args) => commands::simulate::run_simulate(args),
        Commands::Scenarios(args) => commands::simulate::run_scenarios(args),
        Commands::Rebalance(args) => commands::rebalance::run_rebalance(args),
        Commands::Compare(args) => commands::optimize::run_compare(args),
        Commands::Version => {
            println!("mpt {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            debug!(format = ?cli.output, "rendering output");
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
