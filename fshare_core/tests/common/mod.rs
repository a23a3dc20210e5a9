#![allow(dead_code)]

use async_trait::async_trait;
use fshare_core::receive::ReceiveOptions;
use fshare_core::tunnel::{PublicEndpoint, TunnelError, TunnelProvider, TunnelRegistry};
use fshare_core::{ShareConfig, ShareContext, ShareEvent};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Provider for sessions that never ask for a tunnel, or that should see it fail
pub struct FailingProvider;

#[async_trait]
impl TunnelProvider for FailingProvider {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn create_tunnel(&self, _local_port: u16) -> Result<PublicEndpoint, TunnelError> {
        Err(TunnelError::Failed("backend unreachable".to_string()))
    }

    async fn close_tunnel(&self, _url: &str) -> Result<bool, TunnelError> {
        Ok(false)
    }

    async fn close_all_tunnels(&self) -> Result<usize, TunnelError> {
        Ok(0)
    }
}

pub struct TestEnv {
    pub dir: TempDir,
    pub ctx: ShareContext,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with(ShareConfig::default(), Arc::new(FailingProvider))
    }

    /// Loopback-only context rooted in a fresh temp dir
    pub fn with(config: ShareConfig, provider: Arc<dyn TunnelProvider>) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("fshare_core=debug")
            .with_test_writer()
            .try_init();

        let dir = tempfile::tempdir().unwrap();
        let config = ShareConfig {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            download_dir: dir.path().join("downloads"),
            ..config
        };
        let registry = TunnelRegistry::new(dir.path().join("tunnels.json"));
        let ctx = ShareContext::new(config, provider, registry);
        Self { dir, ctx }
    }

    pub fn write_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn download_dir(&self) -> PathBuf {
        self.ctx.config.download_dir.clone()
    }

    pub fn receive_options(&self, password: Option<&str>) -> ReceiveOptions {
        let mut options = ReceiveOptions::from_config(&self.ctx.config);
        options.client_name = "test-receiver".to_string();
        options.password = password.map(str::to_string);
        options
    }
}

/// Deterministic, non-repeating-looking test content
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Wait for the first event matching `pred`, skipping the rest
pub async fn wait_for_event<F>(rx: &mut mpsc::Receiver<ShareEvent>, timeout: Duration, pred: F) -> ShareEvent
where
    F: Fn(&ShareEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        while let Some(event) = rx.recv().await {
            if pred(&event) {
                return event;
            }
        }
        panic!("event channel closed");
    })
    .await
    .expect("Timeout waiting for event")
}

/// Everything currently buffered in the channel
pub fn drain(rx: &mut mpsc::Receiver<ShareEvent>) -> Vec<ShareEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Records what the coordinator asked of it
#[derive(Default)]
pub struct RecordingProvider {
    pub closed: Mutex<Vec<String>>,
}

#[async_trait]
impl TunnelProvider for RecordingProvider {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn create_tunnel(&self, local_port: u16) -> Result<PublicEndpoint, TunnelError> {
        Ok(PublicEndpoint {
            url: format!("https://share-{}.tunnel.test", local_port),
            shortened_url: None,
        })
    }

    async fn close_tunnel(&self, url: &str) -> Result<bool, TunnelError> {
        self.closed.lock().unwrap().push(url.to_string());
        Ok(true)
    }

    async fn close_all_tunnels(&self) -> Result<usize, TunnelError> {
        Ok(0)
    }
}

/// Never answers; creation only ends by timeout
pub struct HangingProvider;

#[async_trait]
impl TunnelProvider for HangingProvider {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn create_tunnel(&self, _local_port: u16) -> Result<PublicEndpoint, TunnelError> {
        std::future::pending().await
    }

    async fn close_tunnel(&self, _url: &str) -> Result<bool, TunnelError> {
        Ok(false)
    }

    async fn close_all_tunnels(&self) -> Result<usize, TunnelError> {
        Ok(0)
    }
}
