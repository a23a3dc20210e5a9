//! Per-transfer state, kept for the lifetime of the process

use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::error::{Result, ShareError};
use crate::protocol::FileOffer;
use crate::tunnel::PublicEndpoint;

/// The shared file: read once, then only cloned by reference
#[derive(Debug, Clone)]
pub struct SharedFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub hash: String,
    pub content: Bytes,
}

impl SharedFile {
    /// Validate `path` and load its content
    pub async fn load(path: &Path) -> Result<Self> {
        if path.as_os_str().is_empty() {
            return Err(ShareError::PathInvalid {
                path: path.to_path_buf(),
                reason: "empty path".to_string(),
            });
        }

        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ShareError::FileNotFound(path.to_path_buf()));
            }
            Err(e) => {
                return Err(ShareError::PathInvalid {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };

        if !metadata.is_file() {
            return Err(ShareError::NotAFile(path.to_path_buf()));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ShareError::PathInvalid {
                path: path.to_path_buf(),
                reason: "no file name".to_string(),
            })?;

        let content = Bytes::from(tokio::fs::read(path).await?);
        let hashed = content.clone();
        let hash = tokio::task::spawn_blocking(move || crate::util::hash_bytes(&hashed))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: content.len() as u64,
            hash,
            content,
        })
    }
}

/// Where the session's public endpoint stands. `Unset -> Public -> Released`, never backwards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EndpointSlot {
    #[default]
    Unset,
    Public(PublicEndpoint),
    Released,
}

#[derive(Debug)]
pub struct TransferSession {
    pub id: Uuid,
    pub file: SharedFile,
    pub password: Option<String>,
    pub created_at: SystemTime,
    pub listener_port: u16,
    pub status_port: u16,
    expires_at: RwLock<SystemTime>,
    endpoint: Mutex<EndpointSlot>,
}

impl TransferSession {
    pub fn new(
        file: SharedFile,
        password: Option<String>,
        listener_port: u16,
        status_port: u16,
        ttl: Duration,
    ) -> Self {
        let now = SystemTime::now();
        Self {
            id: Uuid::new_v4(),
            file,
            password,
            created_at: now,
            listener_port,
            status_port,
            expires_at: RwLock::new(now + ttl),
            endpoint: Mutex::new(EndpointSlot::Unset),
        }
    }

    /// What each connection's state machine gets to see
    pub fn offer(&self) -> FileOffer {
        FileOffer {
            file_name: self.file.name.clone(),
            file_size: self.file.size,
            file_hash: Some(self.file.hash.clone()),
            password: self.password.clone(),
        }
    }

    pub fn expires_at(&self) -> SystemTime {
        *self.expires_at.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Push the expiry to `ttl` from now. Only the session manager calls this.
    pub(crate) fn touch(&self, ttl: Duration) -> SystemTime {
        let next = SystemTime::now() + ttl;
        *self.expires_at.write().unwrap_or_else(|e| e.into_inner()) = next;
        next
    }

    pub fn endpoint(&self) -> EndpointSlot {
        self.endpoint.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn public_endpoint(&self) -> Option<PublicEndpoint> {
        match self.endpoint() {
            EndpointSlot::Public(endpoint) => Some(endpoint),
            _ => None,
        }
    }

    /// Record the tunnel endpoint. Returns false if one was already set or released.
    pub(crate) fn set_public_endpoint(&self, endpoint: PublicEndpoint) -> bool {
        let mut slot = self.endpoint.lock().unwrap_or_else(|e| e.into_inner());
        if *slot != EndpointSlot::Unset {
            return false;
        }
        *slot = EndpointSlot::Public(endpoint);
        true
    }

    /// Drop back to local-only; returns the endpoint that was live, if any
    pub(crate) fn release_endpoint(&self) -> Option<PublicEndpoint> {
        let mut slot = self.endpoint.lock().unwrap_or_else(|e| e.into_inner());
        match std::mem::replace(&mut *slot, EndpointSlot::Released) {
            EndpointSlot::Public(endpoint) => Some(endpoint),
            _ => None,
        }
    }

    pub fn status(&self, active_connections: usize) -> SessionStatus {
        SessionStatus {
            id: self.id,
            file_name: self.file.name.clone(),
            file_size: self.file.size,
            password_required: self.password.is_some(),
            active_connections,
            created_at: unix_secs(self.created_at),
            expires_at: unix_secs(self.expires_at()),
            public_url: self.public_endpoint().map(|e| e.url),
        }
    }
}

/// Snapshot served by the status endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub id: Uuid,
    pub file_name: String,
    pub file_size: u64,
    pub password_required: bool,
    pub active_connections: usize,
    pub created_at: u64,
    pub expires_at: u64,
    pub public_url: Option<String>,
}

pub fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// In-memory registry of live sessions
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Arc<TransferSession>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<TransferSession>) {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.id, session);
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<TransferSession>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn remove(&self, id: &Uuid) -> Option<Arc<TransferSession>> {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
