//! Error taxonomy shared by the sender and receiver sides

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::tunnel::TunnelError;

/// Control message text the sender uses to reject a handshake
pub const INVALID_PASSWORD: &str = "Invalid password";

#[derive(Debug, Error)]
pub enum ShareError {
    /// Path given to `send` does not exist
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Path cannot be used (empty, no file name, unreadable metadata)
    #[error("invalid path {}: {reason}", .path.display())]
    PathInvalid { path: PathBuf, reason: String },

    /// Path points at a directory or other non-regular file
    #[error("{} is not a regular file", .0.display())]
    NotAFile(PathBuf),

    #[error("failed to bind {what} listener: {source}")]
    Bind {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    /// Connection could not be established within the deadline
    #[error("server unreachable at {target} after {timeout:?}")]
    Unreachable { target: String, timeout: Duration },

    #[error("connection to {target} failed: {reason}")]
    ConnectFailed { target: String, reason: String },

    #[error("connection closed before the transfer finished")]
    ConnectionLost,

    #[error("invalid password")]
    InvalidPassword,

    /// Stopped by the operator before the operation finished
    #[error("cancelled")]
    Cancelled,

    /// Sender replied with an `error` frame other than a password rejection
    #[error("remote error: {0}")]
    Remote(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("integrity check failed for {file_name}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        file_name: String,
        expected: String,
        actual: String,
    },

    #[error("tunnel required but unavailable: {0}")]
    TunnelRequired(#[source] TunnelError),

    #[error("invalid target url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ShareError {
    /// Whether the failure came from the network path rather than from input or protocol
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ShareError::Unreachable { .. }
                | ShareError::ConnectFailed { .. }
                | ShareError::ConnectionLost
                | ShareError::WebSocket(_)
        )
    }

    /// Operator-facing hint appended to receiver-side transport failures
    pub fn remediation(&self) -> Option<&'static str> {
        if self.is_transport() {
            Some(
                "Check that both devices are on the same network (or that the tunnel URL is \
                 still live), that no firewall blocks the port, and that a shortened URL has \
                 not expired.",
            )
        } else {
            match self {
                ShareError::InvalidPassword => Some("Ask the sender for the current password."),
                ShareError::TunnelRequired(_) => Some(
                    "Set NGROK_AUTHTOKEN and check your internet connection, or share on the \
                     local network without --tunnel.",
                ),
                _ => None,
            }
        }
    }
}

pub type Result<T, E = ShareError> = std::result::Result<T, E>;
