//! ttycast entry point.

mod args;
mod config;
mod listener;
mod observer;
mod pty;
mod relay;
mod terminal;

use std::io;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::args::Cli;
use crate::config::RelayConfig;
use crate::relay::SessionEnd;
use crate::terminal::CrlfWriter;

fn main() {
    // Logs go to stderr so they never mix with the relayed session on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(|| CrlfWriter::new(io::stderr()))
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();
    let config = RelayConfig::from_cli(cli);

    match run(config) {
        Ok(SessionEnd::ChildExited(status)) => {
            info!(code = status.exit_code(), "session ended");
        }
        Ok(SessionEnd::Terminated) => {
            info!("session terminated");
        }
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(config: RelayConfig) -> Result<SessionEnd> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    let result = runtime.block_on(relay::run(config));
    // The PTY reader may still be parked in a blocking read; don't wait for it.
    runtime.shutdown_background();
    result
}
