//! Public endpoints through a reverse tunnel.
//!
//! The backend sits behind [`TunnelProvider`]; the [`TunnelCoordinator`] adds
//! the timeout, the local-only fallback and zombie cleanup on top of it.

pub mod coordinator;
pub mod ngrok;
pub mod registry;

pub use coordinator::{CloseSummary, TunnelCoordinator};
pub use ngrok::NgrokProvider;
pub use registry::{RegistryFile, TunnelRegistry};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A public URL forwarding to a local port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicEndpoint {
    pub url: String,
    /// Shortened form of `url` when a shortener is configured
    pub shortened_url: Option<String>,
}

impl PublicEndpoint {
    /// The URL to show to people: the short one when present
    pub fn display_url(&self) -> &str {
        self.shortened_url.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TunnelError {
    #[error("tunnel creation timed out after {0:?}")]
    TimedOut(Duration),
    #[error("tunnel creation failed: {0}")]
    Failed(String),
}

/// How a sender treats global sharing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TunnelMode {
    /// Local network only
    Disabled,
    /// Try the tunnel; on failure warn and stay local
    #[default]
    Auto,
    /// Tunnel failure is fatal
    Required,
}

/// Narrow interface to a tunnel backend
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn create_tunnel(&self, local_port: u16) -> Result<PublicEndpoint, TunnelError>;

    /// Close the tunnel serving `url`. `Ok(false)` when nothing by that URL is open.
    async fn close_tunnel(&self, url: &str) -> Result<bool, TunnelError>;

    /// Close everything this provider opened; returns how many were closed
    async fn close_all_tunnels(&self) -> Result<usize, TunnelError>;
}
