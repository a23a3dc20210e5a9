use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use url::Url;

use super::storage::save_payload;
use crate::config::ShareConfig;
use crate::error::{Result, ShareError};
use crate::protocol::{ControlMessage, Frame, ReceiverAction, ReceiverEvent, ReceiverMachine};
use crate::util::format_transfer_speed;

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Upper bound for the closing handshake once the outcome is known
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Headroom on top of the payload limit for frame overhead
const FRAME_SLACK: u64 = 64 * 1024;

/// Where to fetch from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveTarget {
    /// Sender on the local network
    Direct { host: String, port: u16 },
    /// Public (tunnel) URL, `http(s)://` or `ws(s)://`
    Url(String),
}

impl ReceiveTarget {
    /// WebSocket URL to dial. `https` maps to `wss`, `http` to `ws`, and a bare
    /// host is taken as `https`.
    pub fn ws_url(&self) -> Result<String> {
        match self {
            ReceiveTarget::Direct { host, port } => {
                let host = host.trim();
                if host.is_empty() {
                    return Err(ShareError::InvalidUrl {
                        url: host.to_string(),
                        reason: "empty host".to_string(),
                    });
                }
                if host.contains(':') && !host.starts_with('[') {
                    Ok(format!("ws://[{}]:{}/", host, port))
                } else {
                    Ok(format!("ws://{}:{}/", host, port))
                }
            }
            ReceiveTarget::Url(raw) => {
                let raw = raw.trim();
                let invalid = |reason: String| ShareError::InvalidUrl {
                    url: raw.to_string(),
                    reason,
                };

                let mut url = match Url::parse(raw) {
                    Ok(url) => url,
                    Err(url::ParseError::RelativeUrlWithoutBase) => {
                        Url::parse(&format!("https://{}", raw)).map_err(|e| invalid(e.to_string()))?
                    }
                    Err(e) => return Err(invalid(e.to_string())),
                };

                let scheme = match url.scheme() {
                    "http" | "ws" => "ws",
                    "https" | "wss" => "wss",
                    other => return Err(invalid(format!("unsupported scheme `{}`", other))),
                };
                if url.host_str().is_none() {
                    return Err(invalid("missing host".to_string()));
                }
                url.set_scheme(scheme)
                    .map_err(|_| invalid("cannot switch scheme".to_string()))?;
                Ok(url.to_string())
            }
        }
    }
}

/// Asked for a new password after the sender rejected the current one
#[async_trait]
pub trait PasswordPrompt: Send + Sync {
    /// `attempt` counts rejections so far. `None` gives up.
    async fn prompt(&self, attempt: u32) -> Option<String>;
}

/// Never supplies a password; a rejection ends the receive
pub struct NoPrompt;

#[async_trait]
impl PasswordPrompt for NoPrompt {
    async fn prompt(&self, _attempt: u32) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    /// Advisory name sent in `ready` and `received`
    pub client_name: String,
    pub password: Option<String>,
    /// Name the operator expects; only compared against the announced one
    pub expected_file_name: Option<String>,
    pub download_dir: PathBuf,
    pub connect_timeout: Duration,
    pub max_password_attempts: u32,
    pub max_payload_bytes: u64,
}

impl ReceiveOptions {
    pub fn from_config(config: &ShareConfig) -> Self {
        Self {
            client_name: local_client_name(),
            password: None,
            expected_file_name: None,
            download_dir: config.download_dir.clone(),
            connect_timeout: config.connect_timeout(),
            max_password_attempts: config.max_password_attempts.max(1),
            max_payload_bytes: config.max_payload_bytes,
        }
    }
}

fn local_client_name() -> String {
    hostname::get()
        .ok()
        .and_then(|s| s.into_string().ok())
        .unwrap_or_else(|| "fshare-receiver".to_string())
}

#[derive(Debug, Clone)]
pub struct ReceiveOutcome {
    pub path: PathBuf,
    pub file_name: String,
    pub bytes: u64,
    pub elapsed: Duration,
    /// Human-readable, e.g. `12.40 MB/s`
    pub throughput: String,
}

enum Attempt {
    Done(ReceiveOutcome),
    PasswordRejected,
}

/// Fetch the shared file from `target` into `options.download_dir`.
///
/// A password rejection asks `prompt` for a new one and reconnects, up to
/// `max_password_attempts` connections in total. Any other failure ends the
/// receive.
pub async fn receive(
    target: &ReceiveTarget,
    options: &ReceiveOptions,
    prompt: &dyn PasswordPrompt,
) -> Result<ReceiveOutcome> {
    let url = target.ws_url()?;
    let mut machine = ReceiverMachine::new(
        options.client_name.clone(),
        options.password.clone(),
        options.max_payload_bytes,
    );

    let mut rejections = 0;
    loop {
        match attempt(&url, &mut machine, options).await? {
            Attempt::Done(outcome) => return Ok(outcome),
            Attempt::PasswordRejected => {
                rejections += 1;
                tracing::warn!("Sender rejected the password ({} attempt(s))", rejections);
                if rejections >= options.max_password_attempts {
                    return Err(ShareError::InvalidPassword);
                }
                let Some(password) = prompt.prompt(rejections).await else {
                    return Err(ShareError::InvalidPassword);
                };
                machine.reset_with_password(Some(password));
            }
        }
    }
}

async fn connect(url: &str, options: &ReceiveOptions) -> Result<Socket> {
    let limit = usize::try_from(options.max_payload_bytes.saturating_add(FRAME_SLACK))
        .unwrap_or(usize::MAX);
    let config = WebSocketConfig::default()
        .max_message_size(Some(limit))
        .max_frame_size(Some(limit));

    tracing::info!("Connecting to {}", url);
    match tokio::time::timeout(
        options.connect_timeout,
        connect_async_with_config(url, Some(config), false),
    )
    .await
    {
        Ok(Ok((socket, _response))) => Ok(socket),
        Ok(Err(e)) => Err(ShareError::ConnectFailed {
            target: url.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(ShareError::Unreachable {
            target: url.to_string(),
            timeout: options.connect_timeout,
        }),
    }
}

/// One connection: drive the machine until it finishes, fails or asks for a new password
async fn attempt(
    url: &str,
    machine: &mut ReceiverMachine,
    options: &ReceiveOptions,
) -> Result<Attempt> {
    let socket = connect(url, options).await?;
    let (mut sink, mut stream) = socket.split();
    let mut queue: VecDeque<ReceiverAction> = machine.handle(ReceiverEvent::Connected).into();
    let mut file_name = String::new();

    loop {
        while let Some(action) = queue.pop_front() {
            match action {
                ReceiverAction::Send(msg) => {
                    tracing::debug!("-> {}", msg.kind());
                    sink.send(Message::Text(msg.to_json().into())).await?;
                    let written = match msg {
                        ControlMessage::Ready { .. } => Some(ReceiverEvent::ReadySent),
                        ControlMessage::Received { .. } => Some(ReceiverEvent::AckSent),
                        _ => None,
                    };
                    if let Some(event) = written {
                        queue.extend(machine.handle(event));
                    }
                }

                ReceiverAction::BeginTransfer {
                    file_name: announced,
                    file_size,
                } => {
                    tracing::info!("Receiving {} ({} bytes)", announced, file_size);
                    if let Some(expected) = &options.expected_file_name {
                        if expected != &announced {
                            tracing::debug!(
                                "Sender announced {} instead of the expected {}",
                                announced,
                                expected
                            );
                        }
                    }
                    file_name = announced;
                }

                ReceiverAction::SavePayload {
                    file_name: announced,
                    payload,
                    expected_hash,
                } => {
                    let saved = save_payload(
                        &options.download_dir,
                        &announced,
                        &payload,
                        expected_hash.as_deref(),
                    )
                    .await;
                    let event = match saved {
                        Ok(path) => ReceiverEvent::Saved { path },
                        Err(e) => ReceiverEvent::SaveFailed(e),
                    };
                    queue.extend(machine.handle(event));
                }

                ReceiverAction::RetryWithPassword => {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
                    return Ok(Attempt::PasswordRejected);
                }

                ReceiverAction::Violation(violation) => {
                    tracing::warn!("Protocol violation from sender: {}", violation);
                }

                ReceiverAction::Fail(e) => {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
                    return Err(e);
                }

                ReceiverAction::Finish {
                    path,
                    bytes,
                    elapsed,
                } => {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
                    return Ok(Attempt::Done(ReceiveOutcome {
                        path,
                        file_name,
                        bytes,
                        elapsed,
                        throughput: format_transfer_speed(bytes, elapsed),
                    }));
                }
            }
        }

        let event = match stream.next().await {
            None | Some(Ok(Message::Close(_))) => ReceiverEvent::Closed,
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::Text(text))) => frame_event(Frame::from_text(text.as_str())),
            Some(Ok(Message::Binary(payload))) => frame_event(Ok(Frame::Payload(payload))),
            Some(Ok(_)) => continue,
        };
        queue.extend(machine.handle(event));
    }
}

fn frame_event(frame: Result<Frame, serde_json::Error>) -> ReceiverEvent {
    match frame {
        Ok(Frame::Control(msg)) => {
            tracing::debug!("<- {}", msg.kind());
            ReceiverEvent::Control(msg)
        }
        Ok(Frame::Payload(payload)) => {
            tracing::debug!("<- binary frame, {} bytes", payload.len());
            ReceiverEvent::Payload(payload)
        }
        Err(e) => ReceiverEvent::Malformed(e.to_string()),
    }
}
