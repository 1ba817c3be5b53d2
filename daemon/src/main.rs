mod cli;
mod config;
mod decision;
mod device;
mod dispatcher;
mod event;
mod logging;
mod notification;
mod parser;
mod paths;
mod reader;
mod record;
mod runner;
mod status;
mod supervisor;

use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::event::{DaemonEvent, CONTROL_CHANNEL_CAPACITY, EVENT_CHANNEL_CAPACITY};

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::Args::parse();
    logging::init(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: cli::Args) -> Result<()> {
    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = args.config.clone().or_else(paths::config_file_path);
    let initial_config = match &config_path {
        Some(path) => config::load_or_default(path)?,
        None => config::Config::default(),
    };

    if args.print_config {
        print!(
            "{}",
            toml::to_string_pretty(&initial_config).context("Failed to serialize config")?
        );
        return Ok(());
    }

    // ── Status ────────────────────────────────────────────────────────────────
    let status_path = if args.no_status {
        None
    } else {
        args.status_file.clone().or_else(paths::status_file_path)
    };
    let mut reporter = status::StatusReporter::new(status_path);

    // ── Channels ──────────────────────────────────────────────────────────────
    let (event_tx, event_rx) = event::event_channels(EVENT_CHANNEL_CAPACITY);
    let (control_tx, control_rx) = mpsc::channel::<DaemonEvent>(CONTROL_CHANNEL_CAPACITY);

    // ── Background tasks ──────────────────────────────────────────────────────
    if let Some(path) = config_path {
        tokio::spawn(config::watch_config(
            path,
            initial_config.clone(),
            control_tx.clone(),
        ));
    }
    let signals = supervisor::spawn_signal_listener(control_tx.clone())?;

    let backend = match supervisor::Backend::spawn(
        &initial_config.backend.program,
        event_tx,
        control_tx,
    ) {
        Ok(backend) => backend,
        Err(e) => {
            reporter.set_error(format!("{e:#}"));
            reporter.set_state(status::DaemonState::Stopped);
            return Err(e);
        }
    };

    info!("usbgate v{} started", env!("CARGO_PKG_VERSION"));

    // ── Event loop ────────────────────────────────────────────────────────────
    let mut dispatcher = dispatcher::Dispatcher::new(initial_config, runner::SystemRunner, reporter);
    let reason = dispatcher.run(event_rx, control_rx).await;

    backend.stop().await;
    signals.abort();

    if reason.is_fatal() {
        bail!("{reason}");
    }
    info!("shut down: {reason}");
    Ok(())
}
