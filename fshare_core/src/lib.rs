//! fshare core: share one file over a WebSocket, on the local network or
//! through a public tunnel, and receive it on the other side.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod events;
pub mod listener;
pub mod protocol;
pub mod receive;
pub mod session;
pub mod tunnel;
pub mod util;

pub use config::ShareConfig;
pub use error::{Result, ShareError};
pub use events::{EventSink, ShareEvent};

use session::SessionStore;
use tunnel::{NgrokProvider, TunnelCoordinator, TunnelProvider, TunnelRegistry};

/// Everything a sender or receiver needs, passed explicitly instead of living
/// in process globals
#[derive(Clone)]
pub struct ShareContext {
    pub config: Arc<ShareConfig>,
    /// Verbose diagnostics requested by the operator
    pub debug: bool,
    pub sessions: SessionStore,
    pub tunnels: Arc<TunnelCoordinator>,
}

impl ShareContext {
    pub fn new(config: ShareConfig, provider: Arc<dyn TunnelProvider>, registry: TunnelRegistry) -> Self {
        Self {
            config: Arc::new(config.validated()),
            debug: false,
            sessions: SessionStore::new(),
            tunnels: Arc::new(TunnelCoordinator::new(provider, registry)),
        }
    }

    /// Context for the real program: config from disk, ngrok tunnels, the
    /// per-user tunnel registry
    pub fn load(debug: bool) -> Self {
        // Load environment variables from .env file (for NGROK_AUTHTOKEN etc.)
        let _ = dotenvy::dotenv();

        // Install rustls crypto provider (required for rustls 0.23+)
        let _ = rustls::crypto::ring::default_provider().install_default();

        let config = ShareConfig::load();
        let registry = TunnelRegistry::new(config.tunnel_registry_path());
        let mut ctx = Self::new(config, Arc::new(NgrokProvider::new()), registry);
        ctx.debug = debug;

        tracing::debug!(
            "Config loaded, downloads go to {}",
            ctx.config.download_dir.display()
        );
        ctx
    }
}
