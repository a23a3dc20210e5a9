use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "fshare";
const APP_NAME: &str = "fshare";
const CONFIG_FILE: &str = "config.json";
const TUNNEL_REGISTRY_FILE: &str = "tunnels.json";

/// Shortest keep-alive period; a zero period cannot drive a timer
const MIN_KEEPALIVE_MS: u64 = 10;

/// Longest accepted timing. Keeps `Instant`/`SystemTime` arithmetic in range.
const MAX_TIMING_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Environment override for the config directory (used by tests and portable installs)
pub const CONFIG_DIR_ENV: &str = "FSHARE_CONFIG_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// Where received files land
    pub download_dir: PathBuf,
    /// Preferred control/data port; falls back to an ephemeral port when busy
    pub control_port: Option<u16>,
    /// Preferred status page port; falls back to an ephemeral port when busy
    pub status_port: Option<u16>,
    pub bind_addr: IpAddr,
    pub inactivity_timeout_ms: u64,
    pub keepalive_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub tunnel_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
    /// Pause between `metadata` and the binary payload
    pub stream_delay_ms: u64,
    /// Grace period before closing a rejected connection
    pub reject_grace_ms: u64,
    pub max_password_attempts: u32,
    /// Upper bound for the payload frame accepted by the receiver
    pub max_payload_bytes: u64,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            control_port: None,
            status_port: None,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            inactivity_timeout_ms: 30 * 60 * 1000,
            keepalive_interval_ms: 30 * 1000,
            connect_timeout_ms: 10 * 1000,
            tunnel_timeout_ms: 30 * 1000,
            shutdown_timeout_ms: 5 * 1000,
            stream_delay_ms: 500,
            reject_grace_ms: 1000,
            max_password_attempts: 3,
            max_payload_bytes: 4 * 1024 * 1024 * 1024,
        }
    }
}

impl ShareConfig {
    /// Get the config file path
    fn get_config_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    /// Load config from disk or return default
    pub fn load() -> Self {
        let path = match Self::get_config_path() {
            Some(p) => p,
            None => return Self::default(),
        };

        let config: Self = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        };
        config.validated()
    }

    /// Clamp timings into the range the runtime can schedule and require at
    /// least one password attempt
    pub fn validated(mut self) -> Self {
        let timings = [
            ("inactivity_timeout_ms", &mut self.inactivity_timeout_ms, 0),
            ("keepalive_interval_ms", &mut self.keepalive_interval_ms, MIN_KEEPALIVE_MS),
            ("connect_timeout_ms", &mut self.connect_timeout_ms, 0),
            ("tunnel_timeout_ms", &mut self.tunnel_timeout_ms, 0),
            ("shutdown_timeout_ms", &mut self.shutdown_timeout_ms, 0),
            ("stream_delay_ms", &mut self.stream_delay_ms, 0),
            ("reject_grace_ms", &mut self.reject_grace_ms, 0),
        ];

        for (name, value, min) in timings {
            let clamped = (*value).clamp(min, MAX_TIMING_MS);
            if clamped != *value {
                tracing::warn!("Config {} = {} out of range, using {}", name, value, clamped);
                *value = clamped;
            }
        }

        if self.max_password_attempts == 0 {
            tracing::warn!("Config max_password_attempts = 0, using 1");
            self.max_password_attempts = 1;
        }
        self
    }

    /// Path of the persisted tunnel registry
    pub fn tunnel_registry_path(&self) -> PathBuf {
        config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(TUNNEL_REGISTRY_FILE)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn tunnel_timeout(&self) -> Duration {
        Duration::from_millis(self.tunnel_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn stream_delay(&self) -> Duration {
        Duration::from_millis(self.stream_delay_ms)
    }

    pub fn reject_grace(&self) -> Duration {
        Duration::from_millis(self.reject_grace_ms)
    }
}

/// Get the config directory path for this app
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return Some(PathBuf::from(dir));
    }

    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Per-user download directory: the OS download folder, else `~/fshare`
pub fn default_download_dir() -> PathBuf {
    let user_dirs = UserDirs::new();

    if let Some(dir) = user_dirs.as_ref().and_then(|dirs| dirs.download_dir()) {
        return dir.to_path_buf();
    }

    user_dirs
        .map(|dirs| dirs.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fshare")
}
