//! Sender role: handshake, metadata, payload, acknowledgment

use std::time::Duration;

use super::ProtocolViolation;
use super::messages::ControlMessage;
use crate::error::INVALID_PASSWORD;

/// What a connection is allowed to see about the shared file
#[derive(Debug, Clone)]
pub struct FileOffer {
    pub file_name: String,
    pub file_size: u64,
    pub file_hash: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    AwaitingReady,
    SendingMetadata,
    Streaming,
    AwaitingAck,
    Closed,
    Errored,
}

impl SenderState {
    pub fn name(self) -> &'static str {
        match self {
            SenderState::AwaitingReady => "AwaitingReady",
            SenderState::SendingMetadata => "SendingMetadata",
            SenderState::Streaming => "Streaming",
            SenderState::AwaitingAck => "AwaitingAck",
            SenderState::Closed => "Closed",
            SenderState::Errored => "Errored",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderEvent {
    Control(ControlMessage),
    /// Binary frame arrived from the receiver
    Payload(usize),
    /// Text frame that failed to decode
    Malformed(String),
    /// The `metadata` frame has been written
    MetadataSent,
    /// The pre-stream pause has elapsed
    StreamDelayElapsed,
    /// The binary frame has been written in full
    PayloadSent { bytes: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderAction {
    Send(ControlMessage),
    /// Arm the pre-stream timer; deliver `StreamDelayElapsed` when it fires
    StartStreamAfter(Duration),
    /// Write the whole file as one binary frame; deliver `PayloadSent` after
    SendPayload,
    Authenticated { client_name: String },
    Rejected { client_name: String },
    Completed {
        client_name: String,
        save_path: String,
        bytes: u64,
    },
    Violation(ProtocolViolation),
    /// Close once the grace period has let pending frames flush
    CloseAfter(Duration),
    Close,
}

/// Sender-side state for one client connection
#[derive(Debug)]
pub struct SenderMachine {
    offer: FileOffer,
    state: SenderState,
    client_name: Option<String>,
    bytes_sent: u64,
    stream_delay: Duration,
    reject_grace: Duration,
}

impl SenderMachine {
    pub fn new(offer: FileOffer, stream_delay: Duration, reject_grace: Duration) -> Self {
        Self {
            offer,
            state: SenderState::AwaitingReady,
            client_name: None,
            bytes_sent: 0,
            stream_delay,
            reject_grace,
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn client_name(&self) -> Option<&str> {
        self.client_name.as_deref()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, SenderState::Closed | SenderState::Errored)
    }

    pub fn handle(&mut self, event: SenderEvent) -> Vec<SenderAction> {
        if self.is_terminal() {
            return Vec::new();
        }

        match event {
            SenderEvent::Control(msg) => self.on_control(msg),
            SenderEvent::Payload(len) => vec![SenderAction::Violation(
                ProtocolViolation::UnexpectedPayload {
                    len,
                    state: self.state.name(),
                },
            )],
            SenderEvent::Malformed(reason) => {
                vec![SenderAction::Violation(ProtocolViolation::Malformed(reason))]
            }
            SenderEvent::MetadataSent if self.state == SenderState::SendingMetadata => {
                self.state = SenderState::Streaming;
                vec![SenderAction::StartStreamAfter(self.stream_delay)]
            }
            SenderEvent::StreamDelayElapsed if self.state == SenderState::Streaming => {
                vec![SenderAction::SendPayload]
            }
            SenderEvent::PayloadSent { bytes } if self.state == SenderState::Streaming => {
                self.bytes_sent = bytes;
                self.state = SenderState::AwaitingAck;
                Vec::new()
            }
            SenderEvent::MetadataSent
            | SenderEvent::StreamDelayElapsed
            | SenderEvent::PayloadSent { .. } => {
                tracing::debug!("Ignoring stale driver event in state {}", self.state.name());
                Vec::new()
            }
        }
    }

    fn on_control(&mut self, msg: ControlMessage) -> Vec<SenderAction> {
        match (self.state, msg) {
            (_, ControlMessage::Pong) => Vec::new(),
            (_, ControlMessage::Ping) => vec![SenderAction::Send(ControlMessage::Pong)],

            (
                SenderState::AwaitingReady,
                ControlMessage::Ready {
                    client_name,
                    password,
                },
            ) => {
                self.client_name = Some(client_name.clone());

                if !self.password_matches(password.as_deref()) {
                    self.state = SenderState::Errored;
                    return vec![
                        SenderAction::Rejected { client_name },
                        SenderAction::Send(ControlMessage::error(INVALID_PASSWORD)),
                        SenderAction::CloseAfter(self.reject_grace),
                    ];
                }

                self.state = SenderState::SendingMetadata;
                vec![
                    SenderAction::Authenticated { client_name },
                    SenderAction::Send(ControlMessage::Metadata {
                        file_name: self.offer.file_name.clone(),
                        file_size: self.offer.file_size,
                        file_hash: self.offer.file_hash.clone(),
                    }),
                ]
            }

            (
                SenderState::AwaitingAck,
                ControlMessage::Received {
                    client_name,
                    save_path,
                },
            ) if self.bytes_sent == self.offer.file_size => {
                self.state = SenderState::Closed;
                vec![
                    SenderAction::Completed {
                        client_name,
                        save_path,
                        bytes: self.bytes_sent,
                    },
                    SenderAction::Close,
                ]
            }

            (_, ControlMessage::Received { .. }) => {
                vec![SenderAction::Violation(ProtocolViolation::EarlyAck {
                    sent: self.bytes_sent,
                    expected: self.offer.file_size,
                })]
            }

            (state, other) => vec![SenderAction::Violation(
                ProtocolViolation::UnexpectedMessage {
                    kind: other.kind(),
                    state: state.name(),
                },
            )],
        }
    }

    fn password_matches(&self, supplied: Option<&str>) -> bool {
        match self.offer.password.as_deref() {
            None => true,
            Some(expected) => supplied == Some(expected),
        }
    }
}
