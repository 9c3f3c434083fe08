//! Relay configuration: CLI values plus fixed protocol limits.
//!
//! Output file priority:
//! 1. `--output` flag
//! 2. `TTYCAST_OUTPUT` (ignored when empty)
//! 3. `out.txt` in the working directory

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use ttycast_core::queue::QUEUE_CAPACITY;
use ttycast_core::sink::DEFAULT_OUTPUT_FILE;

use crate::args::Cli;

/// Port observers connect to unless `--port` says otherwise.
pub const DEFAULT_PORT: u16 = 8080;

/// Path that accepts WebSocket upgrades. Every other path gets the hello page.
pub const UPGRADE_PATH: &str = "/ws";

/// Read and write deadline for the HTTP upgrade negotiation.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum size of an HTTP request head (1 MiB).
pub const MAX_HEADER_BYTES: usize = 1 << 20;

/// Maximum number of connections negotiating at the same time.
pub const MAX_PENDING_HANDSHAKES: usize = 100;

/// Settings for the observer listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub upgrade_path: String,
    pub handshake_timeout: Duration,
    pub max_header_bytes: usize,
    pub max_pending_handshakes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            upgrade_path: UPGRADE_PATH.to_string(),
            handshake_timeout: HANDSHAKE_TIMEOUT,
            max_header_bytes: MAX_HEADER_BYTES,
            max_pending_handshakes: MAX_PENDING_HANDSHAKES,
        }
    }
}

/// Everything a relay session needs to start.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub command: Vec<String>,
    pub listen_addr: SocketAddr,
    pub output_path: PathBuf,
    pub queue_capacity: usize,
    pub listener: ListenerConfig,
}

impl RelayConfig {
    pub fn from_cli(cli: Cli) -> Self {
        Self {
            command: cli.command,
            listen_addr: SocketAddr::new(cli.bind, cli.port),
            output_path: resolve_output_path(cli.output),
            queue_capacity: QUEUE_CAPACITY,
            listener: ListenerConfig::default(),
        }
    }
}

/// Pick the output mirror path by priority (see module docs).
pub fn resolve_output_path(flag: Option<PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path;
    }

    if let Ok(path) = env::var("TTYCAST_OUTPUT") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    PathBuf::from(DEFAULT_OUTPUT_FILE)
}
