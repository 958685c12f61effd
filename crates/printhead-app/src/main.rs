// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printhead: thermal print head service host.
//
// Entry point.  Initialises logging, loads the config, opens the device
// arbiter, starts the enabled front ends, and runs until Ctrl-C.

mod services;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use printhead_core::AppConfig;
use printhead_core::config::config_path;
use printhead_core::error::Result;
use tracing::{error, info, warn};

/// Printhead - one thermal print head behind IPP, raw TCP, and a management API
#[derive(Parser, Debug)]
#[command(name = "printhead")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: $PRINTHEAD_CONFIG, then the data directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Record device output in memory instead of writing to the device
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "printhead exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let path = config_path(cli.config);
    let config = AppConfig::load(&path)?;
    info!(
        config = %path.display(),
        printer = %config.printer_name,
        device = %config.device_path.display(),
        dry_run = cli.dry_run,
        "Printhead starting"
    );
    if config.is_default_password() {
        warn!("management API still uses the factory password");
    }

    let mut manager = services::build_manager(&config, Some(path), cli.dry_run);
    let running = manager.start_all().await;
    if running == 0 {
        warn!("no front end is running");
    } else {
        info!(running, "front ends started");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    manager.stop_all().await;
    Ok(())
}
