//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured result output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "titrator", version, about = "Alkalinity titrator CLI")]
pub struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE", default_value = "etc/titrator.toml")]
    pub config: PathBuf,

    /// Optional pH calibration CSV (strict header: raw,ph)
    #[arg(long, value_name = "FILE")]
    pub calibration: Option<PathBuf>,

    /// Print results as JSON instead of pretty text
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
    /// Run one full alkalinity measurement
    Measure {
        /// Title recorded with the reading (trimmed, max 10 chars kept)
        #[arg(long, default_value = "")]
        title: String,
        /// Override pacing between state-machine steps (ms)
        #[arg(long, value_name = "MS")]
        step_interval_ms: Option<u64>,
        /// Step manually: perform exactly this many steps, then stop
        #[arg(long, value_name = "N")]
        max_steps: Option<u64>,
    },
    /// Move a volume through one pump
    Dose {
        /// Pump role: fill, drain or reagent
        #[arg(long)]
        role: String,
        /// Volume in ml; negative reverses
        #[arg(long)]
        ml: f32,
    },
    /// Rotate one pump by raw degrees (calibration aid)
    Rotate {
        /// Pump role: fill, drain or reagent
        #[arg(long)]
        role: String,
        /// Degrees; negative reverses
        #[arg(long)]
        degrees: i32,
    },
    /// Sample the pH probe
    Ph {
        /// Number of samples to take
        #[arg(long, default_value_t = 10)]
        samples: u32,
    },
    /// List stored measurement readings, newest first
    Readings,
    /// Validate config and exercise the hardware stack without dosing
    SelfCheck,
}
