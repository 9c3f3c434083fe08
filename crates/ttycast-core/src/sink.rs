//! Append-only mirror of the child's output on local storage.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Default file name for the output mirror, relative to the working directory.
pub const DEFAULT_OUTPUT_FILE: &str = "out.txt";

/// Appends every write to a file, opening and closing it each time.
///
/// The file is created on first write. Nothing is buffered between writes and
/// no handle outlives a single call, so the on-disk content always matches
/// what has been written so far.
#[derive(Debug, Clone)]
pub struct AppendFile {
    path: PathBuf,
}

impl AppendFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `chunk` in full.
    pub fn append(&self, chunk: &[u8]) -> io::Result<()> {
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }

        let mut file = options.open(&self.path).map_err(|e| self.annotate(e))?;
        file.write_all(chunk).map_err(|e| self.annotate(e))
    }

    fn annotate(&self, e: io::Error) -> io::Error {
        io::Error::new(e.kind(), format!("{}: {}", self.path.display(), e))
    }
}

impl Write for AppendFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
