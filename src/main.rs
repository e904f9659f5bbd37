//! casync-pull - Main entry point
//!
//! Clears the staging directory, copies the device's casync tree into it and
//! runs the release upload program. The first failing step decides the exit
//! status.

use std::process::ExitCode;

use anyhow::Context;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use casync_pull::cli::Cli;
use casync_pull::config::{ConfigFile, PullConfig};
use casync_pull::error::{PullError, EXIT_FAILURE};
use casync_pull::pipeline::ReleasePull;
use casync_pull::{process_guard, sanity};

/// Initialize the logger; `RUST_LOG` overrides the `-v` level
fn init_logger(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logger(&cli);
    debug!("CLI arguments parsed: {:?}", cli);

    // Terminate running children if we are interrupted mid-copy
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = exit_code_for(&err);
            error!("{:#}", err);
            eprintln!("casync-pull: {:#}", err);
            ExitCode::from(u8::try_from(code).unwrap_or(EXIT_FAILURE as u8))
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let file_layer = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            ConfigFile::load_from_file(path).map_err(PullError::from)?
        }
        None => ConfigFile::default(),
    };

    let mut config = PullConfig::resolve(&cli.device, file_layer.overlay(cli.overrides()))
        .map_err(PullError::from)?;
    config.dry_run = cli.dry_run;

    if !cli.dry_run && !cli.skip_preflight {
        sanity::run_preflight_checks(&config)?;
    }

    let pull = ReleasePull::new(config);
    let mut report = pull.new_report();
    let outcome = pull.execute(&mut report);

    if outcome.is_ok() && report.dry_run {
        for record in &report.steps {
            println!(
                "[dry run] {}: {}",
                record.step,
                record.command.as_deref().unwrap_or("-")
            );
        }
    }

    if let Some(path) = &cli.report {
        let written = report
            .write_json(path)
            .with_context(|| format!("Failed to write report to {}", path.display()));
        match written {
            Ok(()) => info!("Report written to {}", path.display()),
            // The pull error decides the exit status
            Err(e) if outcome.is_err() => warn!("{:#}", e),
            Err(e) => return Err(e),
        }
    }

    outcome?;
    Ok(())
}

/// Exit code for an error coming out of `run`
fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<PullError>()
        .map(PullError::exit_code)
        .unwrap_or(EXIT_FAILURE)
}
