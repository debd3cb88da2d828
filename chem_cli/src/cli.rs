//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "chemctl", version, about = "Pool chemistry controller")]
pub struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE", default_value = "etc/chemctl.toml")]
    pub config: PathBuf,

    /// Log and print as JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Log level (error|warn|info|debug|trace); overrides `logging.level`
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every configured controller until interrupted
    Run {
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long, value_name = "SECS")]
        for_secs: Option<u64>,
        /// Runtime state file used to resume doses after a restart
        #[arg(long, value_name = "FILE", default_value = "chemctl-state.json")]
        state: PathBuf,
        /// Start with service mode on (monitor only, no dosing)
        #[arg(long, action = ArgAction::SetTrue)]
        service: bool,
    },
    /// Run a manual dose and wait for it to finish
    Dose {
        #[arg(long, default_value_t = 1)]
        controller: u8,
        /// ph | orp | generic
        #[arg(long)]
        chemical: String,
        /// Volume in mL
        #[arg(long)]
        volume: String,
    },
    /// Run a pump for a fixed time to measure its output
    Calibrate {
        #[arg(long, default_value_t = 1)]
        controller: u8,
        #[arg(long)]
        chemical: String,
        /// Run time in seconds
        #[arg(long)]
        secs: String,
    },
    /// Show the dose a reading would trigger, without running it
    DosePlan {
        #[arg(long, default_value_t = 1)]
        controller: u8,
        #[arg(long)]
        chemical: String,
        /// Probe reading (pH units or mV)
        #[arg(long, allow_negative_numbers = true)]
        level: f64,
    },
    /// Validate the config and print a summary
    Check,
    /// Quick health check of every configured device binding
    SelfCheck,
}
