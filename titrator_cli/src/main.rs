//! Entry point: config loading, tracing setup, signal handling, dispatch.

mod cli;
mod hw;
mod run;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::WrapErr;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};

fn init_tracing(json_console: bool, level: &str, logging: &titrator_config::Logging) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = logging.file.as_ref().map(|file| {
        let path = std::path::Path::new(file);
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        let name = path
            .file_name()
            .map_or_else(|| std::ffi::OsString::from("titrator.log"), Into::into);
        let appender = match logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(&dir, &name),
            Some("hourly") => tracing_appender::rolling::hourly(&dir, &name),
            _ => tracing_appender::rolling::never(&dir, &name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        // file logs are always JSON lines
        fmt::layer().json().with_ansi(false).with_writer(writer)
    });

    // console logs go to stderr; stdout is reserved for command results
    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if json_console {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();
    let _ = JSON_MODE.set(args.json);

    let cfg = if args.config.exists() {
        let text = std::fs::read_to_string(&args.config)
            .wrap_err_with(|| format!("reading config {}", args.config.display()))?;
        titrator_config::load_toml(&text)
            .wrap_err_with(|| format!("parsing config {}", args.config.display()))?
    } else {
        titrator_config::Config::default()
    };
    cfg.validate().wrap_err("invalid configuration")?;

    init_tracing(args.json, &args.log_level, &cfg.logging);
    if !args.config.exists() {
        tracing::info!(config = %args.config.display(), "config file not found; using defaults");
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
        .wrap_err("installing signal handler")?;
    }

    let calibration_csv = args.calibration.as_deref();
    match args.cmd {
        Commands::Measure {
            title,
            step_interval_ms,
            max_steps,
        } => {
            let instrument = hw::build_instrument(&cfg, calibration_csv)?;
            run::run_measure(
                &cfg,
                instrument,
                &title,
                step_interval_ms,
                max_steps,
                &shutdown,
                args.json,
            )
        }
        Commands::Dose { role, ml } => {
            let instrument = hw::build_instrument(&cfg, calibration_csv)?;
            run::run_dose(instrument, &role, ml)
        }
        Commands::Rotate { role, degrees } => {
            let instrument = hw::build_instrument(&cfg, calibration_csv)?;
            run::run_rotate(instrument, &role, degrees)
        }
        Commands::Ph { samples } => {
            let instrument = hw::build_instrument(&cfg, calibration_csv)?;
            run::run_ph(&cfg, instrument, samples, args.json)
        }
        Commands::Readings => run::run_readings(&cfg, args.json),
        Commands::SelfCheck => {
            let instrument = hw::build_instrument(&cfg, calibration_csv)?;
            run::run_self_check(&cfg, instrument, args.json)
        }
    }
}
