//! ngrok tunnel backend
//!
//! Forwards an HTTPS endpoint (WebSocket upgrades included) to the local
//! control port. Reads the auth token from `NGROK_AUTHTOKEN`.

use async_trait::async_trait;
use ngrok::config::ForwarderBuilder;
use ngrok::forwarder::Forwarder;
use ngrok::tunnel::{EndpointInfo, HttpTunnel, TunnelInfo};
use std::collections::HashMap;
use tokio::sync::Mutex;
use url::Url;

use super::{PublicEndpoint, TunnelError, TunnelProvider};

/// Environment variable holding the ngrok auth token
pub const NGROK_TOKEN_ENV: &str = "NGROK_AUTHTOKEN";

/// Lazily connected ngrok session plus the forwarders it serves
#[derive(Default)]
pub struct NgrokProvider {
    session: Mutex<Option<ngrok::Session>>,
    forwarders: Mutex<HashMap<String, Forwarder<HttpTunnel>>>,
}

impl NgrokProvider {
    pub fn new() -> Self {
        Self::default()
    }

    async fn session(&self) -> Result<ngrok::Session, TunnelError> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }

        if std::env::var_os(NGROK_TOKEN_ENV).is_none() {
            return Err(TunnelError::Failed(format!("{} is not set", NGROK_TOKEN_ENV)));
        }

        let session = ngrok::Session::builder()
            .authtoken_from_env()
            .connect()
            .await
            .map_err(|e| TunnelError::Failed(format!("ngrok session: {}", e)))?;

        tracing::debug!("ngrok session connected");
        *slot = Some(session.clone());
        Ok(session)
    }
}

#[async_trait]
impl TunnelProvider for NgrokProvider {
    fn name(&self) -> &'static str {
        "ngrok"
    }

    async fn create_tunnel(&self, local_port: u16) -> Result<PublicEndpoint, TunnelError> {
        let session = self.session().await?;
        let target = Url::parse(&format!("http://localhost:{}", local_port))
            .map_err(|e| TunnelError::Failed(e.to_string()))?;

        let forwarder = session
            .http_endpoint()
            .listen_and_forward(target)
            .await
            .map_err(|e| TunnelError::Failed(format!("ngrok listen: {}", e)))?;

        let url = forwarder.url().to_string();
        self.forwarders.lock().await.insert(url.clone(), forwarder);

        Ok(PublicEndpoint {
            url,
            shortened_url: None,
        })
    }

    async fn close_tunnel(&self, url: &str) -> Result<bool, TunnelError> {
        let Some(forwarder) = self.forwarders.lock().await.remove(url) else {
            return Ok(false);
        };

        let session = self.session.lock().await.clone();
        if let Some(session) = session {
            session
                .close_tunnel(forwarder.id())
                .await
                .map_err(|e| TunnelError::Failed(format!("ngrok close: {}", e)))?;
        }
        tracing::info!("ngrok tunnel closed: {}", url);
        Ok(true)
    }

    async fn close_all_tunnels(&self) -> Result<usize, TunnelError> {
        let urls: Vec<String> = self.forwarders.lock().await.keys().cloned().collect();
        let mut closed = 0;
        for url in urls {
            if self.close_tunnel(&url).await? {
                closed += 1;
            }
        }
        Ok(closed)
    }
}
