//! Per-connection driver for the sender state machine

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

use super::SessionSignal;
use super::server::ListenerState;
use crate::events::ShareEvent;
use crate::protocol::{ControlMessage, Frame, SenderAction, SenderEvent, SenderMachine};

/// Upper bound for writing the final Close frame
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

/// Far enough in the future to never fire while unarmed
const IDLE_TIMER: Duration = Duration::from_secs(86_400 * 365);

/// Why a connection ended
#[derive(Debug)]
enum Exit {
    Completed,
    Rejected,
    PeerClosed,
    Shutdown,
    Failed(String),
}

impl Exit {
    fn close_code(&self) -> u16 {
        match self {
            Exit::Completed | Exit::PeerClosed => close_code::NORMAL,
            Exit::Rejected => close_code::POLICY,
            Exit::Shutdown => close_code::AWAY,
            Exit::Failed(_) => close_code::ERROR,
        }
    }

    fn describe(&self) -> String {
        match self {
            Exit::Completed => "transfer complete".to_string(),
            Exit::Rejected => "handshake rejected".to_string(),
            Exit::PeerClosed => "closed by peer".to_string(),
            Exit::Shutdown => "session closed".to_string(),
            Exit::Failed(reason) => reason.clone(),
        }
    }
}

struct Connection {
    peer: SocketAddr,
    state: Arc<ListenerState>,
    machine: SenderMachine,
    sink: SplitSink<WebSocket, Message>,
    stream_armed: bool,
    close_armed: bool,
    stream_at: Instant,
    close_at: Instant,
}

/// Serve one WebSocket connection until it completes, fails or the session shuts down
pub(crate) async fn handle_socket(socket: WebSocket, peer: SocketAddr, state: Arc<ListenerState>) {
    let _guard = state.track_connection();
    let (sink, mut stream) = socket.split();

    tracing::info!("Client connected from {}", peer);
    state.events.emit(ShareEvent::ClientConnected { peer });

    let machine = SenderMachine::new(
        state.session.offer(),
        state.config.stream_delay(),
        state.config.reject_grace(),
    );
    let idle = Instant::now() + IDLE_TIMER;
    let mut conn = Connection {
        peer,
        state: state.clone(),
        machine,
        sink,
        stream_armed: false,
        close_armed: false,
        stream_at: idle,
        close_at: idle,
    };

    let interval = state.config.keepalive_interval();
    let mut keepalive = tokio::time::interval_at(Instant::now() + interval, interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        let event = tokio::select! {
            _ = state.shutdown.cancelled() => break Exit::Shutdown,

            _ = tokio::time::sleep_until(conn.close_at), if conn.close_armed => break Exit::Rejected,

            _ = tokio::time::sleep_until(conn.stream_at), if conn.stream_armed => {
                conn.stream_armed = false;
                SenderEvent::StreamDelayElapsed
            }

            _ = keepalive.tick() => {
                if let Err(e) = conn.send_control(&ControlMessage::Ping).await {
                    break Exit::Failed(format!("keep-alive failed: {}", e));
                }
                continue;
            }

            message = stream.next() => {
                let frame = match message {
                    None | Some(Ok(Message::Close(_))) => break Exit::PeerClosed,
                    Some(Err(e)) => break Exit::Failed(format!("read failed: {}", e)),
                    Some(Ok(Message::Text(text))) => Frame::from_text(text.as_str()),
                    Some(Ok(Message::Binary(data))) => Ok(Frame::Payload(data)),
                    // WebSocket-level ping/pong is answered by the transport
                    Some(Ok(_)) => continue,
                };
                match frame {
                    Ok(Frame::Control(msg)) => {
                        tracing::debug!("<- {} from {}", msg.kind(), peer);
                        SenderEvent::Control(msg)
                    }
                    Ok(Frame::Payload(payload)) => SenderEvent::Payload(payload.len()),
                    Err(e) => SenderEvent::Malformed(e.to_string()),
                }
            }
        };

        let actions = conn.machine.handle(event);
        if let Some(exit) = conn.apply(actions).await {
            break exit;
        }
    };

    conn.finish(exit).await;
}

impl Connection {
    async fn send_control(&mut self, msg: &ControlMessage) -> Result<(), axum::Error> {
        tracing::debug!("-> {} to {}", msg.kind(), self.peer);
        self.sink.send(Message::Text(msg.to_json().into())).await
    }

    /// Run actions, feeding write completions back into the machine, until the
    /// queue is empty or the connection has to end
    async fn apply(&mut self, actions: Vec<SenderAction>) -> Option<Exit> {
        let mut queue: VecDeque<SenderAction> = actions.into();

        while let Some(action) = queue.pop_front() {
            match action {
                SenderAction::Send(msg) => {
                    let is_metadata = matches!(msg, ControlMessage::Metadata { .. });
                    if let Err(e) = self.send_control(&msg).await {
                        return Some(Exit::Failed(format!("send failed: {}", e)));
                    }
                    if is_metadata {
                        queue.extend(self.machine.handle(SenderEvent::MetadataSent));
                    }
                }

                SenderAction::StartStreamAfter(delay) => {
                    self.stream_at = Instant::now() + delay;
                    self.stream_armed = true;
                }

                SenderAction::SendPayload => {
                    let content = self.state.session.file.content.clone();
                    let bytes = content.len() as u64;
                    tracing::info!(
                        "Streaming {} ({} bytes) to {}",
                        self.state.session.file.name,
                        bytes,
                        self.peer
                    );

                    let sent = tokio::select! {
                        result = self.sink.send(Message::Binary(content)) => result,
                        _ = self.state.shutdown.cancelled() => return Some(Exit::Shutdown),
                    };
                    if let Err(e) = sent {
                        return Some(Exit::Failed(format!("payload send failed: {}", e)));
                    }
                    queue.extend(self.machine.handle(SenderEvent::PayloadSent { bytes }));
                }

                SenderAction::Authenticated { client_name } => {
                    tracing::info!("{} ({}) authenticated", client_name, self.peer);
                    self.state.events.emit(ShareEvent::ClientAuthenticated {
                        peer: self.peer,
                        client_name,
                    });
                }

                SenderAction::Rejected { client_name } => {
                    tracing::warn!("Rejected {} ({}): invalid password", client_name, self.peer);
                    self.state.events.emit(ShareEvent::ClientRejected {
                        peer: self.peer,
                        client_name,
                    });
                }

                SenderAction::Completed {
                    client_name,
                    save_path,
                    bytes,
                } => {
                    tracing::info!("{} saved {} bytes to {}", client_name, bytes, save_path);
                    let signal = SessionSignal::TransferComplete {
                        client_name,
                        save_path,
                        bytes,
                    };
                    if self.state.signals.send(signal).await.is_err() {
                        tracing::debug!("Session manager gone, acknowledgment dropped");
                    }
                }

                SenderAction::Violation(violation) => {
                    tracing::warn!("Protocol violation from {}: {}", self.peer, violation);
                    self.state.events.emit(ShareEvent::ProtocolViolation {
                        peer: self.peer,
                        violation,
                    });
                }

                SenderAction::CloseAfter(grace) => {
                    self.close_at = Instant::now() + grace;
                    self.close_armed = true;
                }

                SenderAction::Close => return Some(Exit::Completed),
            }
        }

        None
    }

    async fn finish(mut self, exit: Exit) {
        let reason = exit.describe();
        let frame = CloseFrame {
            code: exit.close_code(),
            reason: reason.clone().into(),
        };

        if !matches!(exit, Exit::PeerClosed | Exit::Failed(_)) {
            let close = self.sink.send(Message::Close(Some(frame)));
            if tokio::time::timeout(CLOSE_FRAME_TIMEOUT, close).await.is_err() {
                tracing::debug!("Close frame to {} timed out", self.peer);
            }
        }

        match &exit {
            Exit::Failed(e) => tracing::warn!("Connection {} dropped: {}", self.peer, e),
            _ => tracing::info!("Connection {} closed: {}", self.peer, reason),
        }

        self.state.events.emit(ShareEvent::ConnectionClosed {
            peer: self.peer,
            client_name: self.machine.client_name().map(str::to_string),
            reason,
        });
    }
}
