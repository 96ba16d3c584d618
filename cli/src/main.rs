//! Leasedrop command-line front end.
//!
//! Thin binary over the workspace crates: parses arguments, sets up logging
//! and hands off to [`commands::run`].

mod commands;

use clap::Parser;
use std::process::ExitCode;
use tracing::info;

/// Initialize tracing subscriber for logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let default_filter = if verbose {
        "debug,leasedrop=trace"
    } else {
        "info,leasedrop=debug"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = commands::Cli::parse();
    init_tracing(cli.verbose);

    info!("Starting Leasedrop v{}", env!("CARGO_PKG_VERSION"));

    commands::run(cli).await
}
