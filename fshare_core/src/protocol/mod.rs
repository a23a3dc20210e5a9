//! Transfer protocol: control vocabulary and the per-connection state machines.
//!
//! Both roles are plain `handle(event) -> actions` transition functions with no
//! I/O, so they can be driven by a live socket or by synthetic events in tests.
//! The async drivers live in `listener::connection` (sender) and
//! `receive::client` (receiver).

pub mod messages;
pub mod receiver;
pub mod sender;

pub use messages::{ControlMessage, Frame};
pub use receiver::{ReceiverAction, ReceiverEvent, ReceiverMachine, ReceiverState};
pub use sender::{FileOffer, SenderAction, SenderEvent, SenderMachine, SenderState};

use thiserror::Error;

/// A frame that does not fit the current state. Reported, never fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("acknowledgment before the payload was fully sent ({sent}/{expected} bytes)")]
    EarlyAck { sent: u64, expected: u64 },

    #[error("unexpected `{kind}` message in state {state}")]
    UnexpectedMessage { kind: &'static str, state: &'static str },

    #[error("unexpected binary frame of {len} bytes in state {state}")]
    UnexpectedPayload { len: usize, state: &'static str },

    #[error("malformed control frame: {0}")]
    Malformed(String),
}
