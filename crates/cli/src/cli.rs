//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// tq-push - push dispatch layer for time-series stream consumers
#[derive(Parser, Debug)]
#[command(
    name = "tq-push",
    author,
    version,
    about = "Push dispatch layer for long-polling stream consumers",
    long_about = "Validates push-layer configuration and runs a self-contained simulation.\n\n\
                  The simulation drives writers and long-polling consumers through the \n\
                  real dispatch pipeline with an in-memory WAL and execution engine."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "TQ_PUSH_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "TQ_PUSH_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default log level derived from -v / -q
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration file
    Validate(ValidateArgs),

    /// Display the effective configuration
    Info(InfoArgs),

    /// Run writers and long-polling consumers against an in-memory node
    Simulate(SimulateArgs),
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "push.toml", env = "TQ_PUSH_CONFIG")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file (defaults are shown when omitted)
    #[arg(short, long, env = "TQ_PUSH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `simulate` command
#[derive(Parser, Debug, Clone)]
pub struct SimulateArgs {
    /// Path to configuration file (TOML or JSON); defaults when omitted
    #[arg(short, long, env = "TQ_PUSH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of long-polling consumers
    #[arg(long, default_value = "4", value_parser = clap::value_parser!(u32).range(1..))]
    pub consumers: u32,

    /// Number of submit batches to write
    #[arg(long, default_value = "100")]
    pub writes: u64,

    /// The engine produces rows for every K-th version
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(i64).range(1..))]
    pub blocks_every: i64,

    /// Delay between writes in milliseconds
    #[arg(long, default_value = "2")]
    pub write_interval_ms: u64,

    /// Simulated engine latency per batch in milliseconds
    #[arg(long, default_value = "0")]
    pub exec_delay_ms: u64,

    /// Topic the consumers subscribe to
    #[arg(long, default_value = "meters")]
    pub topic: String,

    /// Give up waiting for consumers to catch up after this many seconds
    #[arg(long, default_value = "10")]
    pub settle_timeout: u64,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "TQ_PUSH_METRICS_PORT")]
    pub metrics_port: u16,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulate_args_parse() {
        let cli = Cli::parse_from([
            "tq-push",
            "-v",
            "simulate",
            "--consumers",
            "3",
            "--writes",
            "20",
            "--blocks-every",
            "2",
        ]);
        assert_eq!(cli.log_level(), "debug");
        match cli.command {
            Commands::Simulate(args) => {
                assert_eq!(args.consumers, 3);
                assert_eq!(args.writes, 20);
                assert_eq!(args.blocks_every, 2);
                assert!(args.config.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_zero_consumers_rejected() {
        assert!(Cli::try_parse_from(["tq-push", "simulate", "--consumers", "0"]).is_err());
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["tq-push", "-q", "-v", "info"]).is_err());
        let cli = Cli::parse_from(["tq-push", "-q", "info"]);
        assert_eq!(cli.log_level(), "warn");
    }

    #[test]
    fn test_log_format_maps_to_observability() {
        let cli = Cli::parse_from(["tq-push", "--log-format", "compact", "info"]);
        let format: observability::LogFormat = cli.log_format.into();
        assert_eq!(format, observability::LogFormat::Compact);
    }
}
