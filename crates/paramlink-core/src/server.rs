//! HTTP/WebSocket front end.
//!
//! Routes:
//! - `GET /ws`: control channel. Each socket gets its own
//!   [`ConnectionSession`] driven by [`run_connection`].
//! - `GET /params`: snapshot of every parameter as `{address: {value, min, max}}`.
//! - `GET /health`: liveness probe.
//!
//! No set of live connections is kept; limit notifications only ever go back
//! to the socket that caused them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::config::DEFAULT_HOST;
use crate::emitter::Emitter;
use crate::error::{Error, Result};
use crate::registry::ParameterRegistry;
use crate::session::{ConnectionSession, SessionSettings};
use crate::VERSION;

/// One inbound frame from a control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
    /// Ping/pong or other transport-level frames
    Control,
}

/// Transport seam for the connection loop.
///
/// `recv` must be cancel-safe: the loop drops a pending `recv` whenever a
/// throttle deadline fires first.
#[async_trait]
pub trait ControlChannel: Send {
    /// Next frame, or `None` once the peer has gone away.
    async fn recv(&mut self) -> Option<Inbound>;

    /// Send a text frame back to this peer.
    async fn send_text(&mut self, text: String) -> Result<()>;
}

#[async_trait]
impl ControlChannel for WebSocket {
    async fn recv(&mut self) -> Option<Inbound> {
        match WebSocket::recv(self).await? {
            Ok(Message::Text(text)) => Some(Inbound::Text(text.as_str().to_owned())),
            Ok(Message::Binary(bytes)) => Some(Inbound::Binary(bytes.to_vec())),
            Ok(Message::Ping(_) | Message::Pong(_)) => Some(Inbound::Control),
            Ok(Message::Close(_)) => None,
            Err(err) => {
                debug!(error = %err, "websocket receive failed");
                None
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<()> {
        self.send(Message::Text(text.into()))
            .await
            .map_err(|e| Error::Runtime(format!("websocket send failed: {e}")))
    }
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Drive one session until the peer disconnects.
///
/// Frames and throttle deadlines are handled one at a time on this task, so
/// the session's pending state is never touched concurrently.
pub async fn run_connection<C: ControlChannel>(mut channel: C, mut session: ConnectionSession) {
    let conn_id = session.id();
    loop {
        let deadline = session.next_deadline();
        tokio::select! {
            frame = channel.recv() => {
                let text = match frame {
                    None => break,
                    Some(Inbound::Control) => continue,
                    Some(Inbound::Text(text)) => text,
                    Some(Inbound::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            warn!(conn_id, "dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                };

                match session.handle_message(&text, Instant::now()) {
                    Ok(Some(notification)) => {
                        let reply = match notification.to_json() {
                            Ok(reply) => reply,
                            Err(err) => {
                                warn!(conn_id, error = %err, "failed to encode limit notification");
                                continue;
                            }
                        };
                        if let Err(err) = channel.send_text(reply).await {
                            debug!(conn_id, error = %err, "peer gone while sending limit");
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(Error::UnknownParameter(address)) => {
                        warn!(conn_id, %address, "unknown parameter address");
                    }
                    Err(err) => {
                        warn!(conn_id, error = %err, "dropping control message");
                    }
                }
            }
            () = wait_for_deadline(deadline) => {
                session.poll_due(Instant::now());
            }
        }
    }
    session.close();
}

/// Shared state for every route.
pub struct AppState {
    registry: Arc<ParameterRegistry>,
    emitter: Arc<dyn Emitter>,
    settings: SessionSettings,
    next_conn_id: AtomicU64,
}

impl AppState {
    #[must_use]
    pub fn new(
        registry: Arc<ParameterRegistry>,
        emitter: Arc<dyn Emitter>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            registry,
            emitter,
            settings,
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Create the session for a newly accepted connection.
    #[must_use]
    pub fn open_session(&self) -> ConnectionSession {
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        ConnectionSession::new(
            id,
            self.registry.clone(),
            self.emitter.clone(),
            self.settings,
        )
    }
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
    parameters: usize,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let session = state.open_session();
        run_connection(socket, session).await;
    })
}

async fn params_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.snapshot())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        ok: true,
        version: VERSION,
        parameters: state.registry.len(),
    })
}

/// Build the router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/params", get(params_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    host: String,
    port: u16,
    /// Must be set to `true` to bind on a non-localhost address.
    allow_public_bind: bool,
}

impl ServerConfig {
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port,
            allow_public_bind: false,
        }
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Explicitly opt in to binding on a non-localhost address.
    #[must_use]
    pub fn with_public_bind(mut self, allow: bool) -> Self {
        self.allow_public_bind = allow;
        self
    }

    fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn is_localhost(&self) -> bool {
        matches!(
            self.host.as_str(),
            "127.0.0.1" | "::1" | "localhost" | "[::1]"
        )
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    bound_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    join: tokio::task::JoinHandle<std::io::Result<()>>,
}

impl ServerHandle {
    /// The address the server actually bound to.
    #[must_use]
    pub fn bound_addr(&self) -> SocketAddr {
        self.bound_addr
    }

    /// Trigger graceful shutdown and wait for completion.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        handle_server_exit(self.join.await)
    }
}

fn handle_server_exit(
    result: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(Error::Runtime(format!("server error: {err}"))),
        Err(err) => Err(Error::Runtime(format!("server join error: {err}"))),
    }
}

/// Bind and start serving in the background.
pub async fn start_server(config: ServerConfig, state: Arc<AppState>) -> Result<ServerHandle> {
    if !config.is_localhost() && !config.allow_public_bind {
        return Err(Error::Runtime(format!(
            "refusing to bind on public address '{}'; pass --public to override",
            config.host
        )));
    }
    if !config.is_localhost() {
        warn!(host = %config.host, "binding on non-localhost address; control channel is remotely reachable");
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let bound_addr = listener.local_addr()?;
    let app = build_router(state);

    let (shutdown, shutdown_rx) = oneshot::channel::<()>();
    let join = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    info!(%bound_addr, "server listening");
    info!("control channel at ws://{bound_addr}/ws");

    Ok(ServerHandle {
        bound_addr,
        shutdown,
        join,
    })
}

/// Run until Ctrl+C (or SIGTERM), then shut down gracefully.
pub async fn run_server(config: ServerConfig, state: Arc<AppState>) -> Result<()> {
    let ServerHandle {
        bound_addr,
        shutdown,
        mut join,
    } = start_server(config, state).await?;

    tokio::select! {
        result = &mut join => handle_server_exit(result),
        signal = wait_for_shutdown_signal() => {
            signal?;
            info!(%bound_addr, "shutting down");
            let _ = shutdown.send(());
            handle_server_exit(join.await)
        }
    }
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate())
            .map_err(|e| Error::Runtime(format!("SIGTERM handler failed: {e}")))?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| Error::Runtime(format!("Ctrl+C handler failed: {e}")))?;
        Ok(())
    }
}
