//! goflow command-line tool
//!
//! Inspects the runtime configuration and runs runtime micro-benchmarks.

mod commands;
mod output;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "goflow")]
#[command(about = "Inspect and benchmark the goflow concurrency runtime", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// When to use colors
    #[arg(long, global = true, value_parser = ["auto", "always", "never"])]
    color: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version, platform and the effective scheduler configuration
    Info,

    /// Run runtime micro-benchmarks
    Bench {
        /// Only run benchmarks whose name contains this pattern
        pattern: Option<String>,
        /// Worker threads for the benchmark scheduler (0 = one per CPU)
        #[arg(short, long, default_value_t = 0)]
        workers: usize,
        /// Timed iterations per benchmark
        #[arg(short, long, default_value_t = 5)]
        iterations: usize,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logger(verbose: u8) {
    let env = env_logger::Env::default().filter_or("GOFLOW_LOG", "warn");
    let mut builder = env_logger::Builder::from_env(env);
    match verbose {
        0 => {}
        1 => {
            builder.filter_level(log::LevelFilter::Info);
        }
        2 => {
            builder.filter_level(log::LevelFilter::Debug);
        }
        _ => {
            builder.filter_level(log::LevelFilter::Trace);
        }
    }
    builder.target(env_logger::Target::Stderr).init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose);
    let color = output::resolve_color_choice(cli.color.as_deref());

    match cli.command {
        Commands::Info => commands::info::execute(color),
        Commands::Bench {
            pattern,
            workers,
            iterations,
            json,
        } => commands::bench::execute(pattern, workers, iterations, json, color),
    }
}
