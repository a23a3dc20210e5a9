//! Control message vocabulary and frame tagging

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Control messages exchanged as WebSocket text frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum ControlMessage {
    /// Receiver opens the handshake
    Ready {
        client_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    /// Sender announces the upcoming payload
    Metadata {
        file_name: String,
        file_size: u64,
        /// BLAKE3 hex digest of the payload
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_hash: Option<String>,
    },
    /// Receiver confirms the payload was written
    Received {
        client_name: String,
        save_path: String,
    },
    /// Sender rejects the handshake
    Error { message: String },
    Ping,
    Pong,
}

impl ControlMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ControlMessage::Error {
            message: message.into(),
        }
    }

    /// Wire name of the message type, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Ready { .. } => "ready",
            ControlMessage::Metadata { .. } => "metadata",
            ControlMessage::Received { .. } => "received",
            ControlMessage::Error { .. } => "error",
            ControlMessage::Ping => "ping",
            ControlMessage::Pong => "pong",
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing a plain enum of strings and integers cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// One logical frame on the connection.
///
/// The WebSocket opcode is the tag: text frames are always control messages,
/// binary frames are always payload. A text frame that does not parse is a
/// protocol violation, never payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Control(ControlMessage),
    Payload(Bytes),
}

impl Frame {
    /// Decode the body of a text frame
    pub fn from_text(text: &str) -> Result<Frame, serde_json::Error> {
        serde_json::from_str(text).map(Frame::Control)
    }
}
