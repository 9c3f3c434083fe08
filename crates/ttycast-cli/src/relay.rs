//! One relay session: child process, observers, and teardown.
//!
//! Startup order matters. The host size is read before the child spawns so the
//! PTY starts at the right geometry, the listener is bound before raw mode so a
//! bind failure leaves the terminal untouched, and the initial resize is queued
//! before the output copy starts so early observers start from a clean screen.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use portable_pty::ExitStatus;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};
use ttycast_core::coordinator::{CoordinatorState, SessionEvent, SignalCoordinator};
use ttycast_core::deliverer;
use ttycast_core::error::CoordinatorError;
use ttycast_core::geometry::{GeometrySource, PtyResize};
use ttycast_core::observer::Observer;
use ttycast_core::queue;
use ttycast_core::registry::ObserverRegistry;
use ttycast_core::sink::AppendFile;
use ttycast_core::tap::OutputTap;

use crate::config::RelayConfig;
use crate::listener::ObserverListener;
use crate::observer::WsObserver;
use crate::pty::{pump_output, PtyDriver, PtySession};
use crate::terminal::{HostTerminal, RawModeGuard};

/// How long queued output may take to reach observers after the child exits.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Capacity of the session event channel.
const EVENT_BUFFER: usize = 16;

/// How a session ended. Both are successful outcomes.
#[derive(Debug)]
pub enum SessionEnd {
    /// The child exited on its own (with any status).
    ChildExited(ExitStatus),
    /// SIGINT or SIGTERM arrived first.
    Terminated,
}

/// Run `config.command` and relay it until the child exits or a termination
/// signal arrives.
///
/// Observers are always closed before this returns, on success and on error.
pub async fn run(config: RelayConfig) -> Result<SessionEnd> {
    let host = HostTerminal;
    let size = host.size().context("Failed to read host terminal size")?;

    let session = PtySession::spawn(&config.command, size)?;
    let mut driver = PtyDriver::new(session)?;
    let reader = driver.take_reader()?;
    info!(
        command = %config.command.join(" "),
        cols = size.cols,
        rows = size.rows,
        "child started"
    );

    let registry = Arc::new(ObserverRegistry::<WsObserver>::new());
    let (queue_tx, queue_rx) = queue::channel(config.queue_capacity);

    let listener = ObserverListener::bind(config.listen_addr, config.listener.clone()).await?;
    info!(
        "Observers can connect to ws://{}{}",
        listener.local_addr()?,
        config.listener.upgrade_path
    );
    let server = tokio::spawn(listener.serve(registry.clone()));
    let delivery = tokio::spawn(deliverer::run(queue_rx, registry.clone()));

    let signals = SignalForwarder::register()?;
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let forwarder = tokio::spawn(signals.run(events_tx));

    let mut coordinator =
        SignalCoordinator::new(host, driver.resizer(), queue_tx.clone(), registry.clone());

    let mut raw_mode = None;
    let result = async {
        raw_mode = Some(RawModeGuard::enter()?);
        driver.spawn_input_copy(io::stdin())?;

        let output = AppendFile::new(&config.output_path);
        let tap = OutputTap::new(output, io::stdout(), queue_tx);
        let pump = start_output(&mut coordinator, reader, tap).await?;

        supervise(coordinator.run(events_rx), pump, driver, delivery).await
    }
    .await;

    let closed = teardown(&registry, raw_mode).await;
    debug!(observers = closed, "observers closed");
    server.abort();
    forwarder.abort();

    result
}

/// Queue the initial resize, then start copying PTY output on a blocking
/// thread.
async fn start_output<G, R, C, Rd, P, T>(
    coordinator: &mut SignalCoordinator<G, R, C>,
    reader: Rd,
    mut tap: OutputTap<P, T>,
) -> Result<JoinHandle<Result<u64>>>
where
    G: GeometrySource,
    R: PtyResize,
    C: Observer,
    Rd: io::Read + Send + 'static,
    P: io::Write + Send + 'static,
    T: io::Write + Send + 'static,
{
    coordinator
        .handle(SessionEvent::Resize)
        .await
        .context("Failed to apply initial terminal size")?;
    Ok(tokio::task::spawn_blocking(move || pump_output(reader, &mut tap)))
}

/// Close every observer, then restore the host terminal.
async fn teardown<C: Observer, G>(registry: &ObserverRegistry<C>, terminal: G) -> usize {
    let closed = registry.remove_all().await;
    drop(terminal);
    closed
}

enum Outcome {
    Signal(std::result::Result<CoordinatorState, CoordinatorError>),
    Output(std::result::Result<Result<u64>, JoinError>),
}

/// Wait for whichever ends the session first: the coordinator (terminate
/// event) or the output copy (child closed its side of the PTY).
async fn supervise<F>(
    coordinator: F,
    mut pump: JoinHandle<Result<u64>>,
    driver: PtyDriver,
    delivery: JoinHandle<()>,
) -> Result<SessionEnd>
where
    F: std::future::Future<Output = std::result::Result<CoordinatorState, CoordinatorError>>,
{
    let outcome = tokio::select! {
        state = coordinator => Outcome::Signal(state),
        copied = &mut pump => Outcome::Output(copied),
    };

    match outcome {
        Outcome::Signal(state) => match state.context("Failed to handle terminal event")? {
            CoordinatorState::Terminated => return Ok(SessionEnd::Terminated),
            // No more signals will arrive; the child decides when we stop.
            CoordinatorState::Running => finish_output(pump.await)?,
        },
        Outcome::Output(copied) => finish_output(copied)?,
    }

    let status = wait_for_child(driver).await?;

    // Every producer is gone now, so the deliverer stops once the queue drains.
    if tokio::time::timeout(DRAIN_TIMEOUT, delivery).await.is_err() {
        warn!("Timed out flushing output to observers");
    }

    Ok(SessionEnd::ChildExited(status))
}

fn finish_output(copied: std::result::Result<Result<u64>, JoinError>) -> Result<()> {
    let bytes = copied.context("PTY output task failed")??;
    debug!(bytes, "PTY output copy finished");
    Ok(())
}

/// Close the PTY and reap the child, logging its exit status.
async fn wait_for_child(driver: PtyDriver) -> Result<ExitStatus> {
    let status = tokio::task::spawn_blocking(move || driver.wait())
        .await
        .context("Child wait task failed")??;

    if status.success() {
        info!("child exited successfully");
    } else {
        warn!(code = status.exit_code(), "child exited with non-zero status");
    }
    Ok(status)
}

/// Maps process signals onto [`SessionEvent`]s.
///
/// Handlers are installed up front so a registration failure is reported
/// before the terminal enters raw mode.
#[cfg(unix)]
struct SignalForwarder {
    window_change: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalForwarder {
    fn register() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            window_change: signal(SignalKind::window_change())
                .context("Failed to register SIGWINCH handler")?,
            interrupt: signal(SignalKind::interrupt())
                .context("Failed to register SIGINT handler")?,
            terminate: signal(SignalKind::terminate())
                .context("Failed to register SIGTERM handler")?,
        })
    }

    async fn run(mut self, events: mpsc::Sender<SessionEvent>) {
        loop {
            let event = tokio::select! {
                Some(()) = self.window_change.recv() => SessionEvent::Resize,
                Some(()) = self.interrupt.recv() => {
                    info!("Received SIGINT, shutting down");
                    SessionEvent::Terminate
                }
                Some(()) = self.terminate.recv() => {
                    info!("Received SIGTERM, shutting down");
                    SessionEvent::Terminate
                }
                else => break,
            };
            if events.send(event).await.is_err() {
                break;
            }
        }
    }
}

/// Only Ctrl-C is available off Unix; there is no resize notification.
#[cfg(not(unix))]
struct SignalForwarder;

#[cfg(not(unix))]
impl SignalForwarder {
    fn register() -> Result<Self> {
        Ok(Self)
    }

    async fn run(self, events: mpsc::Sender<SessionEvent>) {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            let _ = events.send(SessionEvent::Terminate).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;
    use futures_util::Sink;
    use std::pin::Pin;
    use std::sync::Mutex;
    use ttycast_core::geometry::TermSize;
    use ttycast_core::message::BroadcastMessage;

    fn spawn(command: &[&str]) -> PtyDriver {
        let command: Vec<String> = command.iter().map(|s| s.to_string()).collect();
        let session = PtySession::spawn(&command, TermSize::default()).expect("spawn");
        PtyDriver::new(session).expect("driver")
    }

    async fn never_signalled() -> std::result::Result<CoordinatorState, CoordinatorError> {
        std::future::pending().await
    }

    #[tokio::test]
    async fn test_wait_for_child_reports_exit_code() {
        let status = wait_for_child(spawn(&["sh", "-c", "exit 4"])).await.unwrap();
        assert!(!status.success());
        assert_eq!(status.exit_code(), 4);
    }

    #[tokio::test]
    async fn test_terminate_ends_session_without_waiting_for_child() {
        let driver = spawn(&["sleep", "30"]);
        let pump = tokio::spawn(std::future::pending::<Result<u64>>());
        let delivery = tokio::spawn(async {});

        let end = tokio::time::timeout(
            Duration::from_secs(2),
            supervise(
                async { Ok::<_, CoordinatorError>(CoordinatorState::Terminated) },
                pump,
                driver,
                delivery,
            ),
        )
        .await
        .expect("termination should not wait for the child")
        .unwrap();

        assert!(matches!(end, SessionEnd::Terminated));
    }

    #[tokio::test]
    async fn test_child_exit_ends_session() {
        let driver = spawn(&["true"]);
        let pump = tokio::spawn(async { Ok(0u64) });
        let delivery = tokio::spawn(async {});

        let end = supervise(never_signalled(), pump, driver, delivery)
            .await
            .unwrap();

        match end {
            SessionEnd::ChildExited(status) => assert!(status.success()),
            other => panic!("expected child exit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_output_failure_is_fatal() {
        let driver = spawn(&["true"]);
        let pump = tokio::spawn(async { Err::<u64, _>(anyhow::anyhow!("disk full")) });
        let delivery = tokio::spawn(async {});

        let err = supervise(never_signalled(), pump, driver, delivery)
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("disk full"));
    }

    struct FixedSize(TermSize);

    impl GeometrySource for FixedSize {
        fn size(&self) -> io::Result<TermSize> {
            Ok(self.0)
        }
    }

    struct NoResize;

    impl PtyResize for NoResize {
        fn resize(&self, _size: TermSize) -> io::Result<()> {
            Ok(())
        }
    }

    type TestSink = Pin<Box<dyn Sink<Message, Error = io::Error> + Send>>;

    fn recording_sink() -> (TestSink, Arc<Mutex<Vec<Message>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink: TestSink = Box::pin(futures_util::sink::unfold(
            sent.clone(),
            |sent, message: Message| async move {
                sent.lock().unwrap().push(message);
                Ok::<_, io::Error>(sent)
            },
        ));
        (sink, sent)
    }

    #[tokio::test]
    async fn test_initial_resync_precedes_child_output() {
        let size = TermSize { cols: 100, rows: 30 };
        let (tx, mut rx) = queue::channel(1024);
        let registry: Arc<ObserverRegistry<WsObserver<TestSink>>> =
            Arc::new(ObserverRegistry::new());
        let mut coordinator =
            SignalCoordinator::new(FixedSize(size), NoResize, tx.clone(), registry);

        let mut driver = spawn(&["echo", "early"]);
        let reader = driver.take_reader().unwrap();
        let tap = OutputTap::new(Vec::new(), Vec::new(), tx);
        let pump = start_output(&mut coordinator, reader, tap).await.unwrap();
        pump.await.unwrap().unwrap();
        driver.wait().unwrap();

        assert_eq!(rx.try_next(), Some(BroadcastMessage::Resync(size)));
        assert!(matches!(rx.try_next(), Some(BroadcastMessage::Output(_))));
    }

    #[tokio::test]
    async fn test_terminal_restored_after_observers_closed() {
        struct TerminalGuard {
            sent: Arc<Mutex<Vec<Message>>>,
            sent_at_restore: Arc<Mutex<Option<usize>>>,
        }

        impl Drop for TerminalGuard {
            fn drop(&mut self) {
                *self.sent_at_restore.lock().unwrap() = Some(self.sent.lock().unwrap().len());
            }
        }

        let registry = ObserverRegistry::new();
        let (sink, sent) = recording_sink();
        registry
            .add(WsObserver::new(sink, "127.0.0.1:4000".parse().unwrap()))
            .await
            .unwrap();
        let sent_at_restore = Arc::new(Mutex::new(None));
        let guard = TerminalGuard {
            sent: sent.clone(),
            sent_at_restore: sent_at_restore.clone(),
        };

        assert_eq!(teardown(&registry, guard).await, 1);

        // The close frame was already written when the terminal came back.
        assert_eq!(*sent_at_restore.lock().unwrap(), Some(1));
        assert!(matches!(sent.lock().unwrap()[0], Message::Close(Some(_))));
    }
}
