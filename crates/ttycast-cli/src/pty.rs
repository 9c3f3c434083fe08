//! PTY session management using portable-pty.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, Child, CommandBuilder, ExitStatus, MasterPty, PtySize};
use tracing::{debug, warn};
use ttycast_core::geometry::{PtyResize, TermSize};
use ttycast_core::tap::OutputTap;

/// Buffer size for reading from PTY.
const READ_BUFFER_SIZE: usize = 4096;

fn pty_size(size: TermSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// A freshly spawned child attached to the slave side of a new PTY.
pub struct PtySession {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtySession {
    /// Spawn a command in a new PTY session.
    ///
    /// The child inherits this process's working directory and environment.
    pub fn spawn(command: &[String], size: TermSize) -> Result<Self> {
        if command.is_empty() {
            anyhow::bail!("Command cannot be empty");
        }

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(pty_size(size))
            .context("Failed to open PTY")?;

        let mut cmd = CommandBuilder::new(&command[0]);
        if command.len() > 1 {
            cmd.args(&command[1..]);
        }
        // portable-pty would otherwise start the child in $HOME.
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        cmd.cwd(cwd);

        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn '{}'", command.join(" ")))?;

        // The slave end is dropped here so the master sees EOF once the
        // child exits.
        Ok(Self {
            master: pair.master,
            child,
        })
    }
}

/// Shared handle to the PTY master used for resizing.
///
/// Becomes inert once the driver closes the PTY.
#[derive(Clone)]
pub struct PtyResizer {
    master: Arc<Mutex<Option<Box<dyn MasterPty + Send>>>>,
}

impl PtyResize for PtyResizer {
    fn resize(&self, size: TermSize) -> io::Result<()> {
        let guard = self
            .master
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "Master PTY mutex poisoned"))?;
        let master = guard
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "PTY already closed"))?;
        master
            .resize(pty_size(size))
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }
}

/// Owns the child process and both directions of PTY I/O.
pub struct PtyDriver {
    master: Arc<Mutex<Option<Box<dyn MasterPty + Send>>>>,
    child: Box<dyn Child + Send + Sync>,
    reader: Option<Box<dyn Read + Send>>,
    writer: Option<Box<dyn Write + Send>>,
}

impl PtyDriver {
    pub fn new(session: PtySession) -> Result<Self> {
        let reader = session
            .master
            .try_clone_reader()
            .context("Failed to clone PTY reader")?;
        let writer = session
            .master
            .take_writer()
            .context("Failed to take PTY writer")?;

        Ok(Self {
            master: Arc::new(Mutex::new(Some(session.master))),
            child: session.child,
            reader: Some(reader),
            writer: Some(writer),
        })
    }

    pub fn resizer(&self) -> PtyResizer {
        PtyResizer {
            master: self.master.clone(),
        }
    }

    /// Take the PTY output stream. Can only be done once.
    pub fn take_reader(&mut self) -> Result<Box<dyn Read + Send>> {
        self.reader.take().context("PTY reader already taken")
    }

    /// Copy `input` into the PTY on a background thread until either side
    /// closes.
    ///
    /// The thread is detached: a read from the local terminal cannot be
    /// interrupted, and it ends with the process.
    pub fn spawn_input_copy<R>(&mut self, input: R) -> Result<JoinHandle<()>>
    where
        R: Read + Send + 'static,
    {
        let writer = self.writer.take().context("PTY writer already taken")?;
        std::thread::Builder::new()
            .name("pty-input".into())
            .spawn(move || input_loop(input, writer))
            .context("Failed to spawn PTY input thread")
    }

    /// Close the PTY master. Later resizes fail with `BrokenPipe`.
    pub fn close(&self) {
        if let Ok(mut master) = self.master.lock() {
            master.take();
        }
    }

    /// Close the PTY and wait for the child to exit.
    pub fn wait(mut self) -> Result<ExitStatus> {
        self.close();
        drop(self.writer.take());
        self.child
            .wait()
            .context("Failed to wait for child process")
    }
}

fn input_loop<R: Read>(mut input: R, mut writer: Box<dyn Write + Send>) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => {
                debug!("local input EOF");
                break;
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("local input read error: {}", e);
                break;
            }
        };
        if let Err(e) = writer.write_all(&buf[..n]).and_then(|()| writer.flush()) {
            debug!("PTY write error: {}", e);
            break;
        }
    }
}

/// Copy PTY output through the tap until the child side closes.
///
/// Runs on a blocking thread: the tap writes synchronously and blocks when the
/// broadcast queue is full. Returns the number of bytes copied. Sink failures
/// are returned as errors; read errors end the copy like EOF does, since Linux
/// reports a closed slave as `EIO`.
pub fn pump_output<R, P, T>(mut reader: R, tap: &mut OutputTap<P, T>) -> Result<u64>
where
    R: Read,
    P: Write,
    T: Write,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                debug!("PTY reader EOF");
                break;
            }
            Ok(n) => {
                tap.tap(&buf[..n]).context("Failed to relay PTY output")?;
                total += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(std::time::Duration::from_millis(10));
            }
            Err(e) => {
                // The master reports EIO once the slave side is gone.
                if e.raw_os_error() != Some(libc::EIO) {
                    warn!("PTY read error: {}", e);
                }
                debug!("PTY closed");
                break;
            }
        }
    }

    Ok(total)
}
