use axum::{
    Router,
    extract::{ConnectInfo, State, ws::WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::status::{self, StatusState};
use super::{MAX_INBOUND_MESSAGE, SessionSignal, connection, ports};
use crate::config::ShareConfig;
use crate::error::Result;
use crate::events::EventSink;
use crate::session::TransferSession;

/// Both listening sockets, bound before the session exists so their ports can
/// be recorded in it
pub struct ListenerSockets {
    control: TcpListener,
    status: TcpListener,
}

impl ListenerSockets {
    pub async fn bind(config: &ShareConfig) -> Result<Self> {
        let (control, status) =
            ports::bind_pair(config.bind_addr, config.control_port, config.status_port).await?;
        Ok(Self { control, status })
    }

    pub fn control_port(&self) -> Result<u16> {
        Ok(self.control.local_addr()?.port())
    }

    pub fn status_port(&self) -> Result<u16> {
        Ok(self.status.local_addr()?.port())
    }
}

/// Shared by every connection task of one listener
pub(crate) struct ListenerState {
    pub session: Arc<TransferSession>,
    pub config: Arc<ShareConfig>,
    pub events: EventSink,
    pub signals: mpsc::Sender<SessionSignal>,
    pub shutdown: CancellationToken,
    connections: watch::Sender<usize>,
}

impl ListenerState {
    pub fn track_connection(self: &Arc<Self>) -> ConnectionGuard {
        self.connections.send_modify(|n| *n += 1);
        ConnectionGuard(self.clone())
    }
}

/// Decrements the live connection count when the connection task ends
pub(crate) struct ConnectionGuard(Arc<ListenerState>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.connections.send_modify(|n| *n = n.saturating_sub(1));
    }
}

pub struct TransportListener {
    control_port: u16,
    status_port: u16,
    shutdown: CancellationToken,
    connections: watch::Receiver<usize>,
    servers: Mutex<Vec<JoinHandle<()>>>,
}

impl TransportListener {
    /// Start serving the control and status ports for `session`.
    ///
    /// The listener shuts down when `parent` is cancelled or on `close_all`.
    pub fn serve(
        sockets: ListenerSockets,
        session: Arc<TransferSession>,
        config: Arc<ShareConfig>,
        events: EventSink,
        signals: mpsc::Sender<SessionSignal>,
        parent: &CancellationToken,
    ) -> Result<Self> {
        let control_port = sockets.control_port()?;
        let status_port = sockets.status_port()?;
        let shutdown = parent.child_token();
        let (connections_tx, connections) = watch::channel(0usize);

        let state = Arc::new(ListenerState {
            session: session.clone(),
            config,
            events,
            signals,
            shutdown: shutdown.clone(),
            connections: connections_tx,
        });

        let control = control_router(state);
        let status = status::router(StatusState::new(session, connections.clone()));

        let servers = vec![
            spawn_server("control", sockets.control, control, shutdown.clone()),
            spawn_server("status", sockets.status, status, shutdown.clone()),
        ];

        tracing::info!(
            "Listening on control port {} and status port {}",
            control_port,
            status_port
        );

        Ok(Self {
            control_port,
            status_port,
            shutdown,
            connections,
            servers: Mutex::new(servers),
        })
    }

    pub fn control_port(&self) -> u16 {
        self.control_port
    }

    pub fn status_port(&self) -> u16 {
        self.status_port
    }

    pub fn connection_count(&self) -> usize {
        *self.connections.borrow()
    }

    /// Observable count of open connections
    pub fn watch_connections(&self) -> watch::Receiver<usize> {
        self.connections.clone()
    }

    /// Close every connection and stop both servers.
    ///
    /// Each connection sends a Close frame on its way out. Whatever is still
    /// running after `timeout` is abandoned. Returns false in that case.
    /// Calling it again is a no-op.
    pub async fn close_all(&self, timeout: Duration) -> bool {
        let mut servers = std::mem::take(&mut *self.servers.lock().unwrap_or_else(|e| e.into_inner()));
        if servers.is_empty() && self.shutdown.is_cancelled() {
            return true;
        }

        self.shutdown.cancel();

        let mut connections = self.connections.clone();
        let drained = tokio::time::timeout(timeout, async {
            let _ = connections.wait_for(|n| *n == 0).await;
            for server in servers.iter_mut() {
                let _ = server.await;
            }
        })
        .await
        .is_ok();

        if !drained {
            tracing::warn!(
                "Listener did not stop within {:?}, abandoning {} connection(s)",
                timeout,
                self.connection_count()
            );
            for server in &servers {
                server.abort();
            }
        }
        drained
    }
}

fn control_router(state: Arc<ListenerState>) -> Router {
    Router::new()
        .route("/", get(ws_upgrade_handler))
        .route("/ws", get(ws_upgrade_handler))
        .fallback(status::not_found_handler)
        .layer(middleware::from_fn(status::add_security_headers))
        .with_state(state)
}

/// WebSocket upgrade handler
async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ListenerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    if state.shutdown.is_cancelled() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    ws.max_message_size(MAX_INBOUND_MESSAGE)
        .on_upgrade(move |socket| connection::handle_socket(socket, peer, state))
}

fn spawn_server(
    name: &'static str,
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::debug!("{} server shutting down", name);
        })
        .await;

        if let Err(e) = result {
            tracing::error!("{} server failed: {}", name, e);
        }
    })
}
