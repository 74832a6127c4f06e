//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "afc", version, about = "Adaptive charge controller replay tool")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/afc_config.toml")]
    pub config: PathBuf,

    /// Optional OCV curve CSV (strict header `soc_cpct,ocv_mv`)
    #[arg(long, value_name = "FILE")]
    pub ocv: Option<PathBuf>,

    /// Print JSON lines instead of pretty output
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Feed a CSV trace of cycle inputs through a charge session
    Replay {
        /// Trace CSV, one control cycle per row
        #[arg(long, value_name = "FILE")]
        trace: PathBuf,
        /// NVM image file; overrides `[nvm] path` from the config
        #[arg(long, value_name = "FILE")]
        nvm: Option<PathBuf>,
        /// Print only every Nth cycle record (the last cycle is always printed)
        #[arg(long, value_name = "N", default_value_t = 1)]
        every: usize,
        /// Do not write the NVM image back at the end of the trace
        #[arg(long = "no-save", action = ArgAction::SetTrue)]
        no_save: bool,
    },
    /// Validate the config (and OCV curve, if given) without running anything
    Check,
    /// Decode and print a persisted NVM image
    InspectNvm {
        /// NVM image file; overrides `[nvm] path` from the config
        #[arg(long, value_name = "FILE")]
        nvm: Option<PathBuf>,
    },
}
