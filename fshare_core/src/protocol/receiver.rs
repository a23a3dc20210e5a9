//! Receiver role: ready, metadata, payload, acknowledgment

use bytes::Bytes;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use super::ProtocolViolation;
use super::messages::ControlMessage;
use crate::error::{INVALID_PASSWORD, ShareError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Connecting,
    Connected,
    AwaitingMetadata,
    Receiving,
    Acknowledging,
    Done,
    Failed,
}

impl ReceiverState {
    pub fn name(self) -> &'static str {
        match self {
            ReceiverState::Connecting => "Connecting",
            ReceiverState::Connected => "Connected",
            ReceiverState::AwaitingMetadata => "AwaitingMetadata",
            ReceiverState::Receiving => "Receiving",
            ReceiverState::Acknowledging => "Acknowledging",
            ReceiverState::Done => "Done",
            ReceiverState::Failed => "Failed",
        }
    }
}

#[derive(Debug)]
pub enum ReceiverEvent {
    /// Transport connection established
    Connected,
    /// The `ready` frame has been written
    ReadySent,
    Control(ControlMessage),
    Payload(Bytes),
    Malformed(String),
    /// Payload verified and written to `path`
    Saved { path: PathBuf },
    SaveFailed(ShareError),
    /// The `received` frame has been written
    AckSent,
    /// Peer closed the connection or the stream ended
    Closed,
}

#[derive(Debug)]
pub enum ReceiverAction {
    Send(ControlMessage),
    /// Metadata accepted; the payload is expected next
    BeginTransfer { file_name: String, file_size: u64 },
    /// Verify `expected_hash` when present, write, then deliver `Saved` or `SaveFailed`
    SavePayload {
        file_name: String,
        payload: Bytes,
        expected_hash: Option<String>,
    },
    /// Password rejected: ask for a new one and reconnect from `Connecting`
    RetryWithPassword,
    Violation(ProtocolViolation),
    Fail(ShareError),
    Finish {
        path: PathBuf,
        bytes: u64,
        elapsed: Duration,
    },
}

#[derive(Debug, Clone)]
struct Announced {
    file_name: String,
    file_size: u64,
    file_hash: Option<String>,
}

/// Receiver-side state for one receive attempt
#[derive(Debug)]
pub struct ReceiverMachine {
    client_name: String,
    password: Option<String>,
    max_payload_bytes: u64,
    state: ReceiverState,
    announced: Option<Announced>,
    bytes_received: u64,
    started: Option<Instant>,
    saved_path: Option<PathBuf>,
}

impl ReceiverMachine {
    pub fn new(client_name: String, password: Option<String>, max_payload_bytes: u64) -> Self {
        Self {
            client_name,
            password,
            max_payload_bytes,
            state: ReceiverState::Connecting,
            announced: None,
            bytes_received: 0,
            started: None,
            saved_path: None,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, ReceiverState::Done | ReceiverState::Failed)
    }

    /// Replace the password and rewind to `Connecting` for the next attempt
    pub fn reset_with_password(&mut self, password: Option<String>) {
        self.password = password;
        self.state = ReceiverState::Connecting;
        self.announced = None;
        self.bytes_received = 0;
        self.started = None;
        self.saved_path = None;
    }

    pub fn handle(&mut self, event: ReceiverEvent) -> Vec<ReceiverAction> {
        if self.is_terminal() {
            return Vec::new();
        }

        match (self.state, event) {
            (ReceiverState::Connecting, ReceiverEvent::Connected) => {
                self.state = ReceiverState::Connected;
                vec![ReceiverAction::Send(ControlMessage::Ready {
                    client_name: self.client_name.clone(),
                    password: self.password.clone(),
                })]
            }
            (ReceiverState::Connected, ReceiverEvent::ReadySent) => {
                self.state = ReceiverState::AwaitingMetadata;
                Vec::new()
            }

            (_, ReceiverEvent::Control(msg)) => self.on_control(msg),

            (ReceiverState::Receiving, ReceiverEvent::Payload(payload)) => {
                self.on_payload(payload)
            }
            (state, ReceiverEvent::Payload(payload)) => {
                vec![ReceiverAction::Violation(
                    ProtocolViolation::UnexpectedPayload {
                        len: payload.len(),
                        state: state.name(),
                    },
                )]
            }
            (_, ReceiverEvent::Malformed(reason)) => {
                vec![ReceiverAction::Violation(ProtocolViolation::Malformed(reason))]
            }

            (ReceiverState::Receiving, ReceiverEvent::Saved { path }) => {
                self.state = ReceiverState::Acknowledging;
                self.saved_path = Some(path.clone());
                vec![ReceiverAction::Send(ControlMessage::Received {
                    client_name: self.client_name.clone(),
                    save_path: path.to_string_lossy().into_owned(),
                })]
            }
            (_, ReceiverEvent::SaveFailed(err)) => self.fail(err),

            (ReceiverState::Acknowledging, ReceiverEvent::AckSent) => {
                self.state = ReceiverState::Done;
                vec![ReceiverAction::Finish {
                    path: self.saved_path.clone().unwrap_or_default(),
                    bytes: self.bytes_received,
                    elapsed: self.started.map(|t| t.elapsed()).unwrap_or_default(),
                }]
            }

            (_, ReceiverEvent::Closed) => self.fail(ShareError::ConnectionLost),

            (state, event) => {
                tracing::debug!("Ignoring {:?} in state {}", event, state.name());
                Vec::new()
            }
        }
    }

    fn on_control(&mut self, msg: ControlMessage) -> Vec<ReceiverAction> {
        match (self.state, msg) {
            (_, ControlMessage::Ping) => vec![ReceiverAction::Send(ControlMessage::Pong)],
            (_, ControlMessage::Pong) => Vec::new(),

            (
                ReceiverState::AwaitingMetadata,
                ControlMessage::Metadata {
                    file_name,
                    file_size,
                    file_hash,
                },
            ) => {
                if file_size > self.max_payload_bytes {
                    return self.fail(ShareError::Protocol(format!(
                        "announced size {} exceeds the {} byte limit",
                        file_size, self.max_payload_bytes
                    )));
                }
                self.state = ReceiverState::Receiving;
                self.started = Some(Instant::now());
                self.announced = Some(Announced {
                    file_name: file_name.clone(),
                    file_size,
                    file_hash,
                });
                vec![ReceiverAction::BeginTransfer {
                    file_name,
                    file_size,
                }]
            }

            (ReceiverState::AwaitingMetadata, ControlMessage::Error { message })
                if message == INVALID_PASSWORD =>
            {
                self.state = ReceiverState::Connecting;
                vec![ReceiverAction::RetryWithPassword]
            }
            (_, ControlMessage::Error { message }) => self.fail(ShareError::Remote(message)),

            (state, other) => vec![ReceiverAction::Violation(
                ProtocolViolation::UnexpectedMessage {
                    kind: other.kind(),
                    state: state.name(),
                },
            )],
        }
    }

    fn on_payload(&mut self, payload: Bytes) -> Vec<ReceiverAction> {
        let Some(announced) = self.announced.clone() else {
            return self.fail(ShareError::Protocol("payload without metadata".to_string()));
        };

        let len = payload.len() as u64;
        if len != announced.file_size {
            return self.fail(ShareError::Protocol(format!(
                "payload is {} bytes but {} were announced",
                len, announced.file_size
            )));
        }

        self.bytes_received = len;
        vec![ReceiverAction::SavePayload {
            file_name: announced.file_name,
            payload,
            expected_hash: announced.file_hash,
        }]
    }

    fn fail(&mut self, err: ShareError) -> Vec<ReceiverAction> {
        self.state = ReceiverState::Failed;
        vec![ReceiverAction::Fail(err)]
    }
}
