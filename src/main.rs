//! volsnap - snapshot-backed working directories for CI runners
//!
//! CLI entry point that dispatches to the restore or save phase.

use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use volsnap::cancel::{CancelHandle, Cancellation};
use volsnap::cli::{Cli, Phase};
use volsnap::config::ConfigManager;
use volsnap::error::VolsnapResult;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> VolsnapResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    // 0/1 = info, 2+ = debug
    let level = match cli.verbose {
        0 | 1 => "volsnap=info",
        _ => "volsnap=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if config.general.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    info!("Using config {}", config_manager.path().display());

    let (handle, cancel) = Cancellation::new();
    tokio::spawn(forward_shutdown_signal(handle));

    let (phase, args) = cli.into_phase();
    match phase {
        Phase::Restore => volsnap::cli::commands::restore(args, &config, cancel).await,
        Phase::Save => volsnap::cli::commands::save(args, &config, cancel).await,
    }
}

/// Fire cancellation on SIGINT or SIGTERM
async fn forward_shutdown_signal(handle: CancelHandle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("Received SIGINT, cancelling"),
        _ = terminate => warn!("Received SIGTERM, cancelling"),
    }
    handle.cancel();
}
