//! Events reported from the core to whatever front-end is attached

use std::net::SocketAddr;
use std::time::SystemTime;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::ProtocolViolation;
use crate::session::ShutdownReason;
use crate::tunnel::PublicEndpoint;

#[derive(Debug, Clone)]
pub enum ShareEvent {
    /// Listener is up and the file can be fetched
    SessionReady {
        session_id: Uuid,
        file_name: String,
        file_size: u64,
        local_url: String,
        status_url: String,
        /// Tunnel URL when global sharing is up
        public_url: Option<String>,
        password: Option<String>,
    },

    TunnelReady { endpoint: PublicEndpoint },

    /// Tunnel could not be created; sharing continues on the local network
    TunnelUnavailable { reason: String },

    ClientConnected { peer: SocketAddr },

    ClientAuthenticated { peer: SocketAddr, client_name: String },

    ClientRejected { peer: SocketAddr, client_name: String },

    TransferCompleted {
        client_name: String,
        save_path: String,
        bytes: u64,
        expires_at: SystemTime,
    },

    ProtocolViolation {
        peer: SocketAddr,
        violation: ProtocolViolation,
    },

    ConnectionClosed {
        peer: SocketAddr,
        client_name: Option<String>,
        reason: String,
    },

    SessionClosed { reason: ShutdownReason },
}

/// Non-blocking event sender. A full or missing channel drops the event
/// instead of stalling a connection task.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<ShareEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<ShareEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Convenience: a sink plus the receiving end, with room for `capacity` events
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ShareEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: ShareEvent) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(event) {
                tracing::debug!("Dropping share event: {}", e);
            }
        }
    }
}
