use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::registry::TunnelRegistry;
use super::{PublicEndpoint, TunnelError, TunnelProvider};

/// Result of a close call. Closing nothing is a success with zero counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CloseSummary {
    pub closed: usize,
    pub failed: usize,
}

impl CloseSummary {
    fn merge(&mut self, other: CloseSummary) {
        self.closed += other.closed;
        self.failed += other.failed;
    }
}

/// Single owner of every tunnel this process opens
pub struct TunnelCoordinator {
    provider: Arc<dyn TunnelProvider>,
    registry: TunnelRegistry,
    open: Mutex<HashSet<String>>,
}

impl TunnelCoordinator {
    pub fn new(provider: Arc<dyn TunnelProvider>, registry: TunnelRegistry) -> Self {
        Self {
            provider,
            registry,
            open: Mutex::new(HashSet::new()),
        }
    }

    /// Ask the backend for a public URL forwarding to `local_port`.
    ///
    /// Leftovers from a previous run are closed first. The attempt is abandoned
    /// once `timeout` elapses.
    pub async fn request_tunnel(
        &self,
        local_port: u16,
        timeout: Duration,
    ) -> Result<PublicEndpoint, TunnelError> {
        let stale = self.cleanup_stale().await;
        if stale.closed > 0 || stale.failed > 0 {
            tracing::info!(
                "Cleaned up {} stale tunnel(s) ({} failed)",
                stale.closed,
                stale.failed
            );
        }

        tracing::info!(
            "Requesting {} tunnel for local port {}",
            self.provider.name(),
            local_port
        );

        let endpoint = match tokio::time::timeout(timeout, self.provider.create_tunnel(local_port))
            .await
        {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(TunnelError::TimedOut(timeout)),
        };

        self.open.lock().await.insert(endpoint.url.clone());
        if let Err(e) = self.registry.add(&endpoint.url).await {
            tracing::warn!("Could not record tunnel in registry: {}", e);
        }

        tracing::info!("Tunnel established: {}", endpoint.url);
        Ok(endpoint)
    }

    /// Close one tunnel. Unknown or already-closed URLs yield `closed: 0`.
    pub async fn close_tunnel(&self, url: &str) -> CloseSummary {
        if !self.open.lock().await.remove(url) {
            return CloseSummary::default();
        }
        self.close_urls(vec![url.to_string()]).await
    }

    /// Close every tunnel opened by this process
    pub async fn close_all(&self) -> CloseSummary {
        let urls: Vec<String> = self.open.lock().await.drain().collect();
        if urls.is_empty() {
            return CloseSummary::default();
        }

        let summary = match self.provider.close_all_tunnels().await {
            Ok(closed) => CloseSummary { closed, failed: 0 },
            Err(e) => {
                tracing::warn!("Failed to close tunnels: {}", e);
                CloseSummary {
                    closed: 0,
                    failed: urls.len(),
                }
            }
        };

        if let Err(e) = self.registry.remove(&urls).await {
            tracing::warn!("Could not update tunnel registry: {}", e);
        }
        summary
    }

    /// Close tunnels recorded by a previous process that never cleaned up
    pub async fn cleanup_stale(&self) -> CloseSummary {
        let recorded = self.registry.load().await.tunnels;
        let open = self.open.lock().await.clone();
        let stale: Vec<String> = recorded.into_iter().filter(|u| !open.contains(u)).collect();
        if stale.is_empty() {
            return CloseSummary::default();
        }

        tracing::debug!("Found {} stale tunnel(s) in registry", stale.len());
        self.close_urls(stale).await
    }

    async fn close_urls(&self, urls: Vec<String>) -> CloseSummary {
        let mut summary = CloseSummary::default();

        for url in &urls {
            let outcome = match self.provider.close_tunnel(url).await {
                Ok(true) => CloseSummary { closed: 1, failed: 0 },
                Ok(false) => CloseSummary::default(),
                Err(e) => {
                    tracing::warn!("Failed to close tunnel {}: {}", url, e);
                    CloseSummary { closed: 0, failed: 1 }
                }
            };
            summary.merge(outcome);
        }

        // Failed closes are not retried on the next start
        if let Err(e) = self.registry.remove(&urls).await {
            tracing::warn!("Could not update tunnel registry: {}", e);
        }

        summary
    }
}
