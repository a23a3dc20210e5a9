mod common;

use async_trait::async_trait;
use common::{TestEnv, drain, pattern, wait_for_event};
use fshare_core::protocol::{ControlMessage, ProtocolViolation};
use fshare_core::receive::{NoPrompt, PasswordPrompt, ReceiveTarget, receive};
use fshare_core::session::{self, SendOptions, ShutdownReason};
use fshare_core::tunnel::TunnelMode;
use fshare_core::{EventSink, ShareConfig, ShareError, ShareEvent};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn local_only(password: Option<&str>) -> SendOptions {
    SendOptions {
        password: password.map(str::to_string),
        tunnel: TunnelMode::Disabled,
        ..SendOptions::default()
    }
}

fn direct(port: u16) -> ReceiveTarget {
    ReceiveTarget::Direct {
        host: "127.0.0.1".to_string(),
        port,
    }
}

fn text(msg: &ControlMessage) -> Message {
    Message::Text(msg.to_json().into())
}

fn ready(password: Option<&str>) -> Message {
    text(&ControlMessage::Ready {
        client_name: "raw-client".to_string(),
        password: password.map(str::to_string),
    })
}

fn received() -> Message {
    text(&ControlMessage::Received {
        client_name: "raw-client".to_string(),
        save_path: "/tmp/raw-client/file".to_string(),
    })
}

fn control(msg: Message) -> ControlMessage {
    match msg {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected a control frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_round_trip_is_byte_identical() {
    for size in [0usize, 1, 70_000, 1 << 20] {
        let env = TestEnv::new();
        let content = pattern(size);
        let path = env.write_file("payload.bin", &content);

        let (events, mut rx) = EventSink::channel(64);
        let active = session::start(&env.ctx, &path, local_only(None), events)
            .await
            .unwrap();
        let target = direct(active.control_port());
        let cancel = active.cancel_token();
        let run = tokio::spawn(active.run());

        let outcome = receive(&target, &env.receive_options(None), &NoPrompt)
            .await
            .unwrap();

        assert_eq!(outcome.bytes, size as u64);
        assert_eq!(outcome.file_name, "payload.bin");
        assert_eq!(outcome.path, env.download_dir().join("payload.bin"));
        assert_eq!(std::fs::read(&outcome.path).unwrap(), content, "size {}", size);

        let event = wait_for_event(&mut rx, EVENT_TIMEOUT, |e| {
            matches!(e, ShareEvent::TransferCompleted { .. })
        })
        .await;
        match event {
            ShareEvent::TransferCompleted {
                client_name, bytes, ..
            } => {
                assert_eq!(client_name, "test-receiver");
                assert_eq!(bytes, size as u64);
            }
            _ => unreachable!(),
        }

        cancel.cancel();
        assert_eq!(run.await.unwrap(), ShutdownReason::Cancelled);
        assert!(env.ctx.sessions.is_empty());
    }
}

#[tokio::test]
async fn test_second_receive_gets_numbered_copy() {
    let env = TestEnv::new();
    let path = env.write_file("report.pdf", b"%PDF-1.7 fake");

    let active = session::start(&env.ctx, &path, local_only(None), EventSink::disabled())
        .await
        .unwrap();
    let target = direct(active.control_port());
    let options = env.receive_options(None);

    let first = receive(&target, &options, &NoPrompt).await.unwrap();
    let second = receive(&target, &options, &NoPrompt).await.unwrap();

    assert_eq!(first.path, env.download_dir().join("report.pdf"));
    assert_eq!(second.path, env.download_dir().join("report_1.pdf"));
    active.shutdown(ShutdownReason::Cancelled).await;
}

#[tokio::test]
async fn test_wrong_password_never_gets_the_file() {
    let env = TestEnv::new();
    let path = env.write_file("secret.txt", b"top secret");

    let (events, mut rx) = EventSink::channel(64);
    let active = session::start(&env.ctx, &path, local_only(Some("s3cret")), events)
        .await
        .unwrap();
    let target = direct(active.control_port());

    for password in [None, Some("guess")] {
        let err = receive(&target, &env.receive_options(password), &NoPrompt)
            .await
            .unwrap_err();
        assert!(matches!(err, ShareError::InvalidPassword), "got {:?}", err);
    }
    assert!(!env.download_dir().join("secret.txt").exists());

    wait_for_event(&mut rx, EVENT_TIMEOUT, |e| {
        matches!(e, ShareEvent::ClientRejected { client_name, .. } if client_name == "test-receiver")
    })
    .await;

    let ok = receive(&target, &env.receive_options(Some("s3cret")), &NoPrompt)
        .await
        .unwrap();
    assert_eq!(std::fs::read(ok.path).unwrap(), b"top secret");

    active.shutdown(ShutdownReason::Cancelled).await;
}

struct ScriptedPrompt {
    password: &'static str,
    asked: AtomicU32,
}

#[async_trait]
impl PasswordPrompt for ScriptedPrompt {
    async fn prompt(&self, _attempt: u32) -> Option<String> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        Some(self.password.to_string())
    }
}

#[tokio::test]
async fn test_password_retry_reconnects() {
    let env = TestEnv::new();
    let path = env.write_file("notes.txt", b"retry me");

    let active = session::start(&env.ctx, &path, local_only(Some("right")), EventSink::disabled())
        .await
        .unwrap();
    let target = direct(active.control_port());

    let prompt = ScriptedPrompt {
        password: "right",
        asked: AtomicU32::new(0),
    };
    let outcome = receive(&target, &env.receive_options(Some("wrong")), &prompt)
        .await
        .unwrap();
    assert_eq!(prompt.asked.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read(outcome.path).unwrap(), b"retry me");

    // A prompt that keeps answering wrong is cut off after the attempt limit
    let stubborn = ScriptedPrompt {
        password: "still-wrong",
        asked: AtomicU32::new(0),
    };
    let err = receive(&target, &env.receive_options(None), &stubborn)
        .await
        .unwrap_err();
    assert!(matches!(err, ShareError::InvalidPassword));
    assert_eq!(
        stubborn.asked.load(Ordering::SeqCst),
        env.ctx.config.max_password_attempts - 1
    );

    active.shutdown(ShutdownReason::Cancelled).await;
}

#[tokio::test]
async fn test_ten_mebibyte_local_scenario() {
    const SIZE: usize = 10_485_760;

    let env = TestEnv::new();
    let content = pattern(SIZE);
    let path = env.write_file("big.bin", &content);

    let (events, mut rx) = EventSink::channel(64);
    let active = session::start(&env.ctx, &path, local_only(None), events)
        .await
        .unwrap();
    let port = active.control_port();
    let session = active.session().clone();
    let cancel = active.cancel_token();
    let run = tokio::spawn(active.run());
    let armed_at_start = session.expires_at();

    let (ws, _) = connect_async(format!("ws://127.0.0.1:{}/", port)).await.unwrap();
    let (mut write, mut read) = ws.split();

    let started = Instant::now();
    write.send(ready(None)).await.unwrap();
    let metadata = control(read.next().await.unwrap().unwrap());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(
        metadata,
        ControlMessage::Metadata {
            file_name: "big.bin".to_string(),
            file_size: SIZE as u64,
            file_hash: Some(blake3::hash(&content).to_hex().to_string()),
        }
    );

    // Exactly one binary frame carrying the whole file
    let payload = match read.next().await.unwrap().unwrap() {
        Message::Binary(data) => data,
        other => panic!("expected the payload frame, got {:?}", other),
    };
    assert_eq!(payload.len(), SIZE);
    assert!(payload.as_ref() == content.as_slice());

    write.send(received()).await.unwrap();
    wait_for_event(&mut rx, EVENT_TIMEOUT, |e| {
        matches!(e, ShareEvent::TransferCompleted { .. })
    })
    .await;
    assert!(session.expires_at() > armed_at_start);

    // Sender closes normally after the acknowledgment
    match tokio::time::timeout(EVENT_TIMEOUT, read.next()).await.unwrap() {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(frame.code, CloseCode::Normal),
        other => panic!("expected a close frame, got {:?}", other),
    }

    cancel.cancel();
    run.await.unwrap();
}

#[tokio::test]
async fn test_early_ack_is_flagged_and_not_counted() {
    let env = TestEnv::new();
    let path = env.write_file("early.bin", &pattern(1000));

    let (events, mut rx) = EventSink::channel(64);
    let active = session::start(&env.ctx, &path, local_only(None), events)
        .await
        .unwrap();
    let port = active.control_port();
    let session = active.session().clone();
    let cancel = active.cancel_token();
    let run = tokio::spawn(active.run());
    let armed_at_start = session.expires_at();

    let (ws, _) = connect_async(format!("ws://127.0.0.1:{}/ws", port)).await.unwrap();
    let (mut write, mut read) = ws.split();

    write.send(ready(None)).await.unwrap();
    assert!(matches!(
        control(read.next().await.unwrap().unwrap()),
        ControlMessage::Metadata { .. }
    ));

    // Acknowledge before the payload has been sent
    write.send(received()).await.unwrap();
    let violation = wait_for_event(&mut rx, EVENT_TIMEOUT, |e| {
        matches!(e, ShareEvent::ProtocolViolation { .. })
    })
    .await;
    assert!(matches!(
        violation,
        ShareEvent::ProtocolViolation {
            violation: ProtocolViolation::EarlyAck { sent: 0, expected: 1000 },
            ..
        }
    ));
    assert_eq!(session.expires_at(), armed_at_start);

    // The connection survives and the real acknowledgment still counts
    assert!(matches!(read.next().await.unwrap().unwrap(), Message::Binary(_)));
    write.send(received()).await.unwrap();
    wait_for_event(&mut rx, EVENT_TIMEOUT, |e| {
        matches!(e, ShareEvent::TransferCompleted { .. })
    })
    .await;

    cancel.cancel();
    run.await.unwrap();
    let completed = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, ShareEvent::TransferCompleted { .. }))
        .count();
    assert_eq!(completed, 0);
}

#[tokio::test]
async fn test_malformed_and_binary_frames_are_violations() {
    let env = TestEnv::new();
    let path = env.write_file("f.txt", b"abc");

    let (events, mut rx) = EventSink::channel(64);
    let active = session::start(&env.ctx, &path, local_only(None), events)
        .await
        .unwrap();

    let (ws, _) = connect_async(format!("ws://127.0.0.1:{}/", active.control_port()))
        .await
        .unwrap();
    let (mut write, mut read) = ws.split();

    write.send(Message::Text("{not json".into())).await.unwrap();
    wait_for_event(&mut rx, EVENT_TIMEOUT, |e| {
        matches!(e, ShareEvent::ProtocolViolation { violation: ProtocolViolation::Malformed(_), .. })
    })
    .await;

    write.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();
    wait_for_event(&mut rx, EVENT_TIMEOUT, |e| {
        matches!(
            e,
            ShareEvent::ProtocolViolation {
                violation: ProtocolViolation::UnexpectedPayload { len: 3, .. },
                ..
            }
        )
    })
    .await;

    // Still in the handshake: a proper ready gets the metadata
    write.send(ready(None)).await.unwrap();
    assert!(matches!(
        control(read.next().await.unwrap().unwrap()),
        ControlMessage::Metadata { file_size: 3, .. }
    ));

    active.shutdown(ShutdownReason::Cancelled).await;
}

#[tokio::test]
async fn test_concurrent_receivers_share_one_buffer() {
    let env = TestEnv::new();
    let content = pattern(300_000);
    let path = env.write_file("c.bin", &content);

    let (events, mut rx) = EventSink::channel(64);
    let active = session::start(&env.ctx, &path, local_only(None), events)
        .await
        .unwrap();
    let target = direct(active.control_port());
    let cancel = active.cancel_token();
    let run = tokio::spawn(active.run());

    let options = env.receive_options(None);
    let (first, second) = tokio::join!(
        receive(&target, &options, &NoPrompt),
        receive(&target, &options, &NoPrompt)
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    let mut paths = vec![first.path.clone(), second.path.clone()];
    paths.sort();
    assert_eq!(
        paths,
        vec![env.download_dir().join("c.bin"), env.download_dir().join("c_1.bin")]
    );
    assert_eq!(std::fs::read(&first.path).unwrap(), content);
    assert_eq!(std::fs::read(&second.path).unwrap(), content);

    for _ in 0..2 {
        wait_for_event(&mut rx, EVENT_TIMEOUT, |e| {
            matches!(e, ShareEvent::TransferCompleted { bytes: 300_000, .. })
        })
        .await;
    }

    cancel.cancel();
    run.await.unwrap();
}

#[tokio::test]
async fn test_keepalive_pings_and_drops_dead_peer() {
    let env = TestEnv::with(
        ShareConfig {
            keepalive_interval_ms: 100,
            ..ShareConfig::default()
        },
        Arc::new(common::FailingProvider),
    );
    let path = env.write_file("f.txt", b"abc");

    let (events, mut rx) = EventSink::channel(64);
    let active = session::start(&env.ctx, &path, local_only(None), events)
        .await
        .unwrap();
    let mut connections = active.watch_connections();

    let (ws, _) = connect_async(format!("ws://127.0.0.1:{}/", active.control_port()))
        .await
        .unwrap();
    let (mut write, mut read) = ws.split();

    // Unsolicited, before any handshake
    for _ in 0..2 {
        let frame = tokio::time::timeout(Duration::from_secs(1), read.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(control(frame), ControlMessage::Ping);
        write.send(text(&ControlMessage::Pong)).await.unwrap();
    }
    assert_eq!(*connections.borrow(), 1);

    // Vanish without a close handshake
    drop(write);
    drop(read);
    tokio::time::timeout(EVENT_TIMEOUT, connections.wait_for(|n| *n == 0))
        .await
        .unwrap()
        .unwrap();

    wait_for_event(&mut rx, EVENT_TIMEOUT, |e| {
        matches!(e, ShareEvent::ConnectionClosed { client_name: None, .. })
    })
    .await;
    // Pongs are accepted silently
    assert!(!drain(&mut rx)
        .iter()
        .any(|e| matches!(e, ShareEvent::ProtocolViolation { .. })));

    active.shutdown(ShutdownReason::Cancelled).await;
}

#[tokio::test]
async fn test_zero_keepalive_in_config_still_serves() {
    let env = TestEnv::with(
        ShareConfig {
            keepalive_interval_ms: 0,
            inactivity_timeout_ms: u64::MAX,
            ..ShareConfig::default()
        },
        Arc::new(common::FailingProvider),
    );
    let path = env.write_file("f.txt", b"abc");

    let active = session::start(&env.ctx, &path, local_only(None), EventSink::disabled())
        .await
        .unwrap();
    let outcome = receive(&direct(active.control_port()), &env.receive_options(None), &NoPrompt)
        .await
        .unwrap();
    assert_eq!(std::fs::read(outcome.path).unwrap(), b"abc");

    active.shutdown(ShutdownReason::Cancelled).await;
}

#[tokio::test]
async fn test_cancel_closes_every_connection() {
    let env = TestEnv::new();
    let path = env.write_file("f.txt", b"abc");

    let (events, mut rx) = EventSink::channel(64);
    let active = session::start(&env.ctx, &path, local_only(None), events)
        .await
        .unwrap();
    let port = active.control_port();
    let mut connections = active.watch_connections();
    let cancel = active.cancel_token();
    let run = tokio::spawn(active.run());

    let mut clients = Vec::new();
    for _ in 0..3 {
        let (ws, _) = connect_async(format!("ws://127.0.0.1:{}/", port)).await.unwrap();
        clients.push(ws);
    }
    tokio::time::timeout(EVENT_TIMEOUT, connections.wait_for(|n| *n == 3))
        .await
        .unwrap()
        .unwrap();

    cancel.cancel();
    let started = Instant::now();
    assert_eq!(run.await.unwrap(), ShutdownReason::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(6));

    for mut client in clients {
        match tokio::time::timeout(EVENT_TIMEOUT, client.next()).await.unwrap() {
            Some(Ok(Message::Close(Some(frame)))) => assert_eq!(frame.code, CloseCode::Away),
            other => panic!("expected a close frame, got {:?}", other),
        }
    }

    assert!(env.ctx.sessions.is_empty());
    let closed: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, ShareEvent::SessionClosed { .. }))
        .collect();
    assert_eq!(closed.len(), 1);
}

#[tokio::test]
async fn test_inactivity_expires_session() {
    let env = TestEnv::with(
        ShareConfig {
            inactivity_timeout_ms: 300,
            ..ShareConfig::default()
        },
        Arc::new(common::FailingProvider),
    );
    let path = env.write_file("f.txt", b"abc");

    let (events, mut rx) = EventSink::channel(64);
    let active = session::start(&env.ctx, &path, local_only(None), events)
        .await
        .unwrap();
    let port = active.control_port();

    let reason = tokio::time::timeout(EVENT_TIMEOUT, active.run()).await.unwrap();
    assert_eq!(reason, ShutdownReason::Expired);
    wait_for_event(&mut rx, EVENT_TIMEOUT, |e| {
        matches!(e, ShareEvent::SessionClosed { reason: ShutdownReason::Expired })
    })
    .await;

    // Nobody is listening any more
    let err = receive(&direct(port), &env.receive_options(None), &NoPrompt)
        .await
        .unwrap_err();
    assert!(err.is_transport(), "got {:?}", err);
}

#[tokio::test]
async fn test_start_rejects_bad_paths() {
    let env = TestEnv::new();

    let missing = session::start(
        &env.ctx,
        &env.dir.path().join("missing.bin"),
        local_only(None),
        EventSink::disabled(),
    )
    .await;
    assert!(matches!(missing, Err(ShareError::FileNotFound(_))));

    let dir = session::start(&env.ctx, env.dir.path(), local_only(None), EventSink::disabled()).await;
    assert!(matches!(dir, Err(ShareError::NotAFile(_))));

    assert!(env.ctx.sessions.is_empty());
}
