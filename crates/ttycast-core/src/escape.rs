//! Escape sequences sent to observers so their emulators follow the host.

use crate::geometry::TermSize;

/// Home the cursor, clear the screen and scrollback, reset attributes.
pub const CLEAR_SCREEN: &str = "\x1b[H\x1b[2J\x1b[3J\x1b[;H\x1b[0m";

/// XTWINOPS "resize text area" request: `CSI 8 ; rows ; cols t`.
pub fn resize_sequence(size: TermSize) -> String {
    format!("\x1b[8;{};{}t", size.rows, size.cols)
}
