//! Joint Simulator CLI
//!
//! Drives the joint model from TOML scenario files: replay scripted steps,
//! inspect the resulting state, quote hedges and run a keeper against a
//! simulated clock.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

mod config;
mod keeper;
mod scenario;
mod status;

use config::ScenarioConfig;

#[derive(Parser)]
#[command(name = "joint-sim")]
#[command(about = "Joint Simulator CLI - hedged two-sided LP strategies", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an example scenario file
    Init {
        /// Where to write the scenario
        #[arg(short, long, default_value = "scenario.toml")]
        output: PathBuf,
    },

    /// Replay a scenario and report every epoch
    Simulate {
        /// Scenario file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Stop at the first failing step
        #[arg(long)]
        strict: bool,
    },

    /// Replay a scenario and show the final state
    Status {
        /// Scenario file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Show per-epoch results
        #[arg(short, long)]
        detailed: bool,
    },

    /// Quote premium and payout for one hedge
    HedgeQuote {
        /// Amount of A protected
        #[arg(long)]
        notional: u64,

        /// Strike price in B per A
        #[arg(long)]
        strike: f64,

        /// Price to settle at
        #[arg(long)]
        price: f64,

        /// Half-width of the band without payout (basis points)
        #[arg(long, default_value = "1000")]
        range_bps: u64,

        /// Hedge length in seconds
        #[arg(long, default_value = "604800")]
        period: u64,

        /// Annual premium rate (basis points)
        #[arg(long, default_value = "1000")]
        annual_bps: u64,
    },

    /// Run a keeper over a scenario's final state
    Keeper {
        /// Scenario file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Number of ticks to run
        #[arg(long, default_value = "24")]
        ticks: u64,

        /// Simulated seconds per tick
        #[arg(long, default_value = "3600")]
        tick_secs: u64,

        /// Wall-clock pause between ticks (milliseconds)
        #[arg(long, default_value = "0")]
        interval_ms: u64,

        /// Report due harvests without sending them
        #[arg(long)]
        monitor_only: bool,
    },
}

fn load(path: &Path, verbose: bool) -> anyhow::Result<ScenarioConfig> {
    let config = ScenarioConfig::load(path)?;
    scenario::ensure_steps(&config)?;
    if verbose {
        println!("{} {}", "Scenario File:".bright_cyan(), path.display());
        println!("{} {}", "Steps:".bright_cyan(), config.steps.len());
        println!("{} {}", "Start Time:".bright_cyan(), config.start_time);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { output } => {
            let path = ScenarioConfig::example().save(&output)?;
            println!("{} {}", "✓".green(), format!("Scenario written to {}", path.display()).bright_green());
        }
        Commands::Simulate { scenario, json, strict } => {
            let config = load(&scenario, cli.verbose && !json)?;
            scenario::simulate(config, json, strict)?;
        }
        Commands::Status { scenario, detailed } => {
            let config = load(&scenario, cli.verbose)?;
            status::show_status(config, detailed)?;
        }
        Commands::HedgeQuote { notional, strike, price, range_bps, period, annual_bps } => {
            status::hedge_quote(notional, strike, price, range_bps, period, annual_bps)?;
        }
        Commands::Keeper { scenario, ticks, tick_secs, interval_ms, monitor_only } => {
            let config = load(&scenario, cli.verbose)?;
            let settings = keeper::KeeperSettings {
                ticks,
                tick_secs,
                interval_ms,
                monitor_only,
            };
            keeper::run_keeper(config, settings).await?;
        }
    }

    Ok(())
}
