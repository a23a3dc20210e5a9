//! Transport listener
//!
//! Two axum servers per session: the control/data port, where every WebSocket
//! connection gets its own sender state machine, and the status port serving a
//! JSON snapshot of the session.

mod connection;
pub mod ports;
mod server;
pub mod status;

pub use server::{ListenerSockets, TransportListener};

/// Reported by connection tasks to the session manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    /// A receiver acknowledged the full payload
    TransferComplete {
        client_name: String,
        save_path: String,
        bytes: u64,
    },
}

/// Largest inbound WebSocket message the sender accepts. Receivers only ever
/// send small control frames.
pub const MAX_INBOUND_MESSAGE: usize = 64 * 1024;
