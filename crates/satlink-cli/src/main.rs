//! satlink binary
//!
//! Replays a directory of visibility snapshots against the emulated
//! constellation, one reconciliation cycle per snapshot.
//!
//! Usage:
//!   satlink run --input-dir ./snapshots
//!   satlink scan --matrix snapshots/tsn_vis_12.csv
//!   satlink teardown --matrix snapshots/tsn_vis_12.csv
//!   satlink domain-tables --matrix snapshots/tsn_vis_12.csv --output tables.json
//!   satlink status --matrix snapshots/tsn_vis_12.csv

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod commands;

use cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    match commands::dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
