//! Sender-side sessions: the store of live transfers and the manager that owns
//! each one's listener, inactivity clock, tunnel and teardown.

pub mod manager;
pub mod store;

pub use manager::{ActiveSession, SendOptions, ShutdownReason, start};
pub use store::{EndpointSlot, SessionStatus, SessionStore, SharedFile, TransferSession};
