//! CLI argument parsing with clap derive macros.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::config::DEFAULT_PORT;

/// Broadcast a terminal session to WebSocket observers.
///
/// Runs COMMAND in a pseudo-terminal attached to this terminal, mirrors its
/// output to a file, and streams it live to every client connected to
/// ws://<host>:<port>/ws.
#[derive(Debug, Parser)]
#[command(
    name = "ttycast",
    version,
    after_help = "\
Examples:
  ttycast bash                          # Share an interactive shell
  ttycast -p 9000 htop                  # Listen on another port
  ttycast -o session.log vim notes.md   # Mirror output to session.log
  ttycast bash -c 'make test'           # Command with its own flags"
)]
pub struct Cli {
    /// TCP port observers connect to
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0", value_name = "ADDR")]
    pub bind: IpAddr,

    /// File the session output is appended to [default: $TTYCAST_OUTPUT or out.txt]
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Command and arguments to run (e.g., bash, htop, vim file.txt)
    #[arg(
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}
