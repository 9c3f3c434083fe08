//! HTTP front door for observers.
//!
//! `GET /ws` upgrades to a WebSocket and registers the connection as an
//! observer. Every other path answers with a plain-text hello that echoes the
//! decoded path. The negotiation deadline and header-size limit cover only the
//! HTTP exchange; an upgraded connection is no longer subject to them.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Router};
use futures_util::StreamExt;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use percent_encoding::percent_decode_str;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use ttycast_core::error::RegistrySealed;
use ttycast_core::observer::Observer;
use ttycast_core::registry::ObserverRegistry;

use crate::config::ListenerConfig;
use crate::observer::{watch_for_close, WsObserver};

/// hyper refuses read buffers smaller than this.
const MIN_HEADER_BUFFER: usize = 8192;

type SharedRegistry = Arc<ObserverRegistry<WsObserver>>;

/// Accepts observer connections.
pub struct ObserverListener {
    listener: TcpListener,
    config: ListenerConfig,
    /// Limits concurrent handshakes to prevent resource exhaustion.
    handshakes: Arc<Semaphore>,
}

impl ObserverListener {
    pub async fn bind(addr: SocketAddr, config: ListenerConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to listen on {}", addr))?;
        let handshakes = Arc::new(Semaphore::new(config.max_pending_handshakes));
        Ok(Self {
            listener,
            config,
            handshakes,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    /// Accept connections forever, one task per connection.
    pub async fn serve(self, registry: SharedRegistry) {
        let app = router(&self.config.upgrade_path, registry);

        let mut http = http1::Builder::new();
        http.timer(TokioTimer::new())
            .header_read_timeout(self.config.handshake_timeout)
            .max_buf_size(self.config.max_header_bytes.max(MIN_HEADER_BUFFER));

        loop {
            let (stream, addr) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Accept error: {}", e);
                    continue;
                }
            };

            let permit = match self.handshakes.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(
                        remote = %addr,
                        "Handshake limit ({}) reached, rejecting connection",
                        self.config.max_pending_handshakes
                    );
                    drop(stream);
                    continue;
                }
            };

            let service = TowerToHyperService::new(app.clone().layer(Extension(addr)));
            // Resolves once the response is written, or once the socket has
            // been handed over to the WebSocket.
            let conn = http
                .serve_connection(TokioIo::new(stream), service)
                .with_upgrades();
            let deadline = self.config.handshake_timeout;

            tokio::spawn(async move {
                match timeout(deadline, conn).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(remote = %addr, "HTTP connection error: {}", e),
                    Err(_) => debug!(remote = %addr, "HTTP negotiation timed out"),
                }
                drop(permit);
            });
        }
    }
}

fn router(upgrade_path: &str, registry: SharedRegistry) -> Router {
    Router::new()
        .route(upgrade_path, get(upgrade))
        .fallback(hello)
        .with_state(registry)
}

async fn upgrade(
    ws: WebSocketUpgrade,
    Extension(addr): Extension<SocketAddr>,
    State(registry): State<SharedRegistry>,
) -> Response {
    ws.on_upgrade(move |socket| register(socket, addr, registry))
}

/// Register an upgraded socket and watch it until the client leaves.
async fn register(socket: WebSocket, addr: SocketAddr, registry: SharedRegistry) {
    let (sink, stream) = socket.split();
    let observer = WsObserver::new(sink, addr);
    let peer_closed = observer.peer_closed();

    let id = match registry.add(observer).await {
        Ok(id) => id,
        Err(RegistrySealed(mut observer)) => {
            info!(remote = %addr, "Session is shutting down, turning observer away");
            let _ = observer.close().await;
            return;
        }
    };
    info!(remote = %addr, %id, "observer connected");

    watch_for_close(stream, id, peer_closed, registry).await;
    info!(remote = %addr, %id, "observer disconnected");
}

async fn hello(uri: Uri) -> impl IntoResponse {
    ([(header::CONNECTION, "close")], hello_body(uri.path()))
}

fn hello_body(raw_path: &str) -> String {
    let path = percent_decode_str(raw_path).decode_utf8_lossy();
    format!("Hello, {:?}", path)
}
