mod cli;
mod error_fmt;
mod region;
mod replay;
mod trace;

use std::path::Path;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::replay::ReplayOpts;

fn console_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the console layer and, if configured, a non-blocking JSON file layer.
fn init_tracing(cli: &Cli, logging: Option<&afc_config::Logging>) {
    // Console output goes to stderr so stdout stays machine-readable.
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::with_capacity(2);
    layers.push(if cli.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter(&cli.log_level))
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(console_filter(&cli.log_level))
            .boxed()
    });

    let file_layer = logging.and_then(|l| {
        let file = Path::new(l.file.as_deref()?);
        let dir = file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let name = file.file_name()?;
        let appender = match l.rotation.as_deref().unwrap_or("never") {
            "daily" => tracing_appender::rolling::daily(dir, name),
            "hourly" => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        Some(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new(l.level.as_deref().unwrap_or("info")))
                .boxed(),
        )
    });

    layers.extend(file_layer);

    let _ = tracing_subscriber::registry().with(layers).try_init();
}

fn run(cli: &Cli) -> eyre::Result<()> {
    let cfg = match replay::load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            init_tracing(cli, None);
            return Err(e);
        }
    };
    init_tracing(cli, Some(&cfg.logging));
    tracing::debug!(config = %cli.config.display(), "config loaded");

    match &cli.cmd {
        Commands::Replay {
            trace,
            nvm,
            every,
            no_save,
        } => replay::run_replay(
            &cfg,
            &ReplayOpts {
                trace,
                ocv: cli.ocv.as_deref(),
                nvm: nvm.as_deref(),
                every: *every,
                save: !*no_save,
                json: cli.json,
            },
        ),
        Commands::Check => replay::run_check(&cfg, cli.ocv.as_deref(), cli.json),
        Commands::InspectNvm { nvm } => replay::run_inspect_nvm(&cfg, nvm.as_deref(), cli.json),
    }
}

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(e) = run(&cli) {
        tracing::error!(error = %e, "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}
