use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::store::{SharedFile, TransferSession};
use crate::ShareContext;
use crate::error::{Result, ShareError};
use crate::events::{EventSink, ShareEvent};
use crate::listener::{ListenerSockets, SessionSignal, TransportListener};
use crate::tunnel::TunnelMode;
use crate::util::preferred_lan_ip;

/// Acknowledgments buffered between connection tasks and the manager
const SIGNAL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub password: Option<String>,
    pub tunnel: TunnelMode,
    /// Cancelling this aborts `start` or, later, tears the session down
    pub shutdown: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Inactivity timer fired
    Expired,
    /// Operator or termination signal
    Cancelled,
    /// `start` failed after the listener was up
    StartFailed,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Expired => write!(f, "session expired"),
            ShutdownReason::Cancelled => write!(f, "cancelled"),
            ShutdownReason::StartFailed => write!(f, "start failed"),
        }
    }
}

/// A shared file being served
pub struct ActiveSession {
    ctx: ShareContext,
    session: Arc<TransferSession>,
    listener: TransportListener,
    events: EventSink,
    signals: mpsc::Receiver<SessionSignal>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

/// Load `path`, open both listeners, register the session and, unless
/// disabled, ask for a public tunnel.
pub async fn start(
    ctx: &ShareContext,
    path: &Path,
    options: SendOptions,
    events: EventSink,
) -> Result<ActiveSession> {
    let file = SharedFile::load(path).await?;
    tracing::info!("Sharing {} ({} bytes)", file.name, file.size);

    let sockets = ListenerSockets::bind(&ctx.config).await?;
    let session = Arc::new(TransferSession::new(
        file,
        options.password.clone(),
        sockets.control_port()?,
        sockets.status_port()?,
        ctx.config.inactivity_timeout(),
    ));

    let cancel = options.shutdown.child_token();
    let (signals_tx, signals) = mpsc::channel(SIGNAL_CAPACITY);
    let listener = TransportListener::serve(
        sockets,
        session.clone(),
        ctx.config.clone(),
        events.clone(),
        signals_tx,
        &cancel,
    )?;
    ctx.sessions.insert(session.clone());

    let active = ActiveSession {
        ctx: ctx.clone(),
        session,
        listener,
        events,
        signals,
        cancel,
        closed: AtomicBool::new(false),
    };

    let attached = tokio::select! {
        result = active.attach_tunnel(options.tunnel) => result,
        _ = active.cancel.cancelled() => Err(ShareError::Cancelled),
    };
    if let Err(e) = attached {
        let reason = match e {
            ShareError::Cancelled => ShutdownReason::Cancelled,
            _ => ShutdownReason::StartFailed,
        };
        active.shutdown(reason).await;
        return Err(e);
    }

    active.events.emit(ShareEvent::SessionReady {
        session_id: active.session.id,
        file_name: active.session.file.name.clone(),
        file_size: active.session.file.size,
        local_url: active.local_url(),
        status_url: active.status_url(),
        public_url: active
            .session
            .public_endpoint()
            .map(|e| e.display_url().to_string()),
        password: options.password,
    });

    Ok(active)
}

impl ActiveSession {
    pub fn session(&self) -> &Arc<TransferSession> {
        &self.session
    }

    pub fn control_port(&self) -> u16 {
        self.listener.control_port()
    }

    pub fn status_port(&self) -> u16 {
        self.listener.status_port()
    }

    /// `ws://<lan-ip>:<port>/` as advertised to receivers on the local network
    pub fn local_url(&self) -> String {
        format!(
            "ws://{}/",
            SocketAddr::new(preferred_lan_ip(), self.control_port())
        )
    }

    pub fn status_url(&self) -> String {
        format!(
            "http://{}/status",
            SocketAddr::new(preferred_lan_ip(), self.status_port())
        )
    }

    pub fn watch_connections(&self) -> watch::Receiver<usize> {
        self.listener.watch_connections()
    }

    /// Cancelling this token tears the session down
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn attach_tunnel(&self, mode: TunnelMode) -> Result<()> {
        if mode == TunnelMode::Disabled {
            tracing::debug!("Tunnel disabled, sharing on the local network only");
            return Ok(());
        }

        let timeout = self.ctx.config.tunnel_timeout();
        match self.ctx.tunnels.request_tunnel(self.control_port(), timeout).await {
            Ok(endpoint) => {
                if self.session.set_public_endpoint(endpoint.clone()) {
                    self.events.emit(ShareEvent::TunnelReady { endpoint });
                } else {
                    // Torn down while the tunnel was being created
                    self.ctx.tunnels.close_tunnel(&endpoint.url).await;
                }
                Ok(())
            }
            Err(e) if mode == TunnelMode::Required => {
                tracing::error!("Tunnel required but unavailable: {}", e);
                Err(ShareError::TunnelRequired(e))
            }
            Err(e) => {
                tracing::warn!("Tunnel unavailable, continuing on the local network: {}", e);
                self.events.emit(ShareEvent::TunnelUnavailable {
                    reason: e.to_string(),
                });
                Ok(())
            }
        }
    }

    /// Serve until the inactivity timer fires or the session is cancelled, then
    /// tear everything down
    pub async fn run(mut self) -> ShutdownReason {
        let ttl = self.ctx.config.inactivity_timeout();

        let reason = loop {
            let remaining = self
                .session
                .expires_at()
                .duration_since(SystemTime::now())
                .unwrap_or_default();
            let deadline = tokio::time::Instant::now() + remaining;

            tokio::select! {
                _ = self.cancel.cancelled() => break ShutdownReason::Cancelled,

                _ = tokio::time::sleep_until(deadline) => break ShutdownReason::Expired,

                Some(signal) = self.signals.recv() => match signal {
                    SessionSignal::TransferComplete { client_name, save_path, bytes } => {
                        let expires_at = self.session.touch(ttl);
                        tracing::info!("Transfer to {} complete, inactivity timer re-armed", client_name);
                        self.events.emit(ShareEvent::TransferCompleted {
                            client_name,
                            save_path,
                            bytes,
                            expires_at,
                        });
                    }
                },
            }
        };

        tracing::info!("Session {} ending: {}", self.session.id, reason);
        self.shutdown(reason).await;
        reason
    }

    /// Close connections, the listener and the tunnel, and drop the session
    /// from the store. Bounded by the configured shutdown timeout; later calls
    /// do nothing.
    pub async fn shutdown(&self, reason: ShutdownReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel.cancel();
        let timeout = self.ctx.config.shutdown_timeout();

        let teardown = async {
            let close_tunnel = async {
                if let Some(endpoint) = self.session.release_endpoint() {
                    let summary = self.ctx.tunnels.close_tunnel(&endpoint.url).await;
                    tracing::debug!("Tunnel close: {:?}", summary);
                }
            };
            tokio::join!(self.listener.close_all(timeout), close_tunnel)
        };

        if tokio::time::timeout(timeout, teardown).await.is_err() {
            tracing::warn!("Teardown exceeded {:?}, abandoning remaining work", timeout);
        }

        self.ctx.sessions.remove(&self.session.id);
        self.events.emit(ShareEvent::SessionClosed { reason });
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        // Dropped without `run`/`shutdown`: stop serving anyway
        self.cancel.cancel();
        self.ctx.sessions.remove(&self.session.id);
    }
}
