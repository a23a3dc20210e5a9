//! On-disk record of open tunnel URLs, used to clean up after an ungraceful exit

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::session::store::unix_secs;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryFile {
    pub tunnels: Vec<String>,
    /// Unix timestamp (seconds) of the last write
    pub last_updated: u64,
}

/// Registry file shared by every fshare process on the machine.
///
/// Writes go to a uniquely named temp file that is renamed over the target, so
/// a concurrent reader sees either the old or the new content, never a torn one.
#[derive(Debug)]
pub struct TunnelRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl TunnelRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current content; missing or unreadable files read as empty
    pub async fn load(&self) -> RegistryFile {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Tunnel registry {} is corrupt: {}", self.path.display(), e);
                RegistryFile::default()
            }),
            Err(_) => RegistryFile::default(),
        }
    }

    pub async fn add(&self, url: &str) -> io::Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await;
        if !file.tunnels.iter().any(|u| u == url) {
            file.tunnels.push(url.to_string());
        }
        self.store(file).await
    }

    pub async fn remove(&self, urls: &[String]) -> io::Result<()> {
        if urls.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock().await;
        let mut file = self.load().await;
        let before = file.tunnels.len();
        file.tunnels.retain(|u| !urls.contains(u));
        if file.tunnels.len() == before {
            return Ok(());
        }
        self.store(file).await
    }

    async fn store(&self, mut file: RegistryFile) -> io::Result<()> {
        file.last_updated = unix_secs(SystemTime::now());

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self
            .path
            .with_file_name(format!(".tunnels-{}.tmp", Uuid::new_v4().simple()));
        let json = serde_json::to_vec_pretty(&file)?;

        tokio::fs::write(&tmp, json).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }
}
