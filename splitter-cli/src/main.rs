//! Splitter: split deployments across clusters with a level-triggered
//! controller.
//!
//! # Usage
//!
//! ```text
//! splitter plan --manifest <file> [--json]
//! splitter run  --manifest <file> [--config <file>] [--workers N]
//!               [--duration-ms MS] [--simulate-ready] [--json]
//! splitter --log-format json ...
//! ```
//!
//! Logs go to stderr (filter with `RUST_LOG`); results go to stdout.

mod commands;
mod simulate;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

use commands::{plan::PlanArgs, run::RunArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "splitter",
    version,
    about = "Split deployments across registered clusters",
    long_about = None,
)]
struct Cli {
    /// Log output format on stderr.
    #[arg(long, value_enum, global = true, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller against an in-memory store seeded from a manifest.
    Run(RunArgs),

    /// Show how each root deployment would be split, without running anything.
    Plan(PlanArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Plan(args) => args.run(),
    }
}

fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
