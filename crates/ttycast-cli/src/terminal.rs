//! Host terminal: raw mode, size, and raw-mode-safe log output.
//!
//! Wraps crossterm's terminal operations and provides a RAII guard that
//! automatically restores the terminal state on drop.

use std::io::{self, Write};

use anyhow::{Context, Result};
use crossterm::terminal;
use ttycast_core::geometry::{GeometrySource, TermSize};

/// RAII guard that restores the terminal to its original mode on drop.
///
/// Every exit path out of the session (normal completion, termination
/// signal, fatal error) drops the guard before the process exits.
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    /// Enter raw terminal mode.
    pub fn enter() -> Result<Self> {
        terminal::enable_raw_mode().context("Failed to enable raw terminal mode")?;
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        // Best-effort: nothing sensible can be done about a failure here.
        let _ = terminal::disable_raw_mode();
    }
}

/// The terminal this process was started from.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostTerminal;

impl GeometrySource for HostTerminal {
    fn size(&self) -> io::Result<TermSize> {
        let (cols, rows) = terminal::size()?;
        Ok(TermSize { cols, rows })
    }
}

/// Writer that turns bare `\n` into `\r\n`.
///
/// In raw mode the terminal no longer does this translation, so log lines
/// written to stderr would otherwise staircase across the screen.
pub struct CrlfWriter<W> {
    inner: W,
    last_was_cr: bool,
}

impl<W: Write> CrlfWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            last_was_cr: false,
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CrlfWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut translated = Vec::with_capacity(buf.len() + 8);
        for &byte in buf {
            if byte == b'\n' && !self.last_was_cr {
                translated.push(b'\r');
            }
            translated.push(byte);
            self.last_was_cr = byte == b'\r';
        }
        self.inner.write_all(&translated)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
