//! Terminal geometry and the seams used to read and apply it.

use std::io;

/// Terminal size in columns and rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TermSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Source of the host terminal's current size.
pub trait GeometrySource: Send {
    fn size(&self) -> io::Result<TermSize>;
}

/// Something whose window size can be changed, i.e. the PTY the child runs in.
pub trait PtyResize: Send {
    fn resize(&self, size: TermSize) -> io::Result<()>;
}
