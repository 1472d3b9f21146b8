use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use chrono::Duration;
use color_eyre::eyre::{eyre, Context, Result};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

lazy_static! {
    pub static ref DEFAULT_STORE_PATH: PathBuf = PathBuf::from(".clobberer");
    pub static ref DEFAULT_LISTEN_ADDR: SocketAddr = SocketAddr::from(([127, 0, 0, 1], 8080));
}

pub const DEFAULT_CONFIG_FILE_NAME: &str = "clobberer.json";
pub const DEFAULT_IDENTITY_HEADER: &str = "x-remote-user";
pub const DEFAULT_RELEASE_PREFIX: &str = "rel";
pub const DEFAULT_RETENTION_DAYS: i64 = 21;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClobbererConfig {
    pub store: Option<PathBuf>,
    pub listen: SocketAddr,
    /// Request header carrying the identity set by the authenticating proxy
    pub identity_header: String,
    /// Accounts allowed to issue broadcast clobbers
    pub release_users: Vec<String>,
    /// Builder name prefix whose build records survive the retention sweep
    pub release_prefix: String,
    pub retention_days: i64,
    /// Shared secret for the maintenance endpoint, disabled when unset
    pub cleanup_password: Option<String>,
}

impl Default for ClobbererConfig {
    fn default() -> Self {
        ClobbererConfig {
            store: None,
            listen: *DEFAULT_LISTEN_ADDR,
            identity_header: DEFAULT_IDENTITY_HEADER.to_string(),
            release_users: Vec::new(),
            release_prefix: DEFAULT_RELEASE_PREFIX.to_string(),
            retention_days: DEFAULT_RETENTION_DAYS,
            cleanup_password: None,
        }
    }
}

impl ClobbererConfig {
    /// Loads the configuration file. A missing file yields the defaults so a
    /// bare `clobberer server` works out of the box.
    pub fn new(config_path: impl AsRef<Path>) -> Result<ClobbererConfig> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            return Ok(ClobbererConfig::default());
        }
        let content = std::fs::read_to_string(config_path).with_context(|| {
            format!(
                "Failed to read clobberer configuration '{}'",
                config_path.display()
            )
        })?;
        let config: ClobbererConfig = serde_json::from_str(&content).with_context(|| {
            format!(
                "Failed to parse clobberer configuration '{}'",
                config_path.display()
            )
        })?;
        if config.retention_days <= 0 {
            return Err(eyre!(
                "Invalid retention_days {} in '{}', must be positive",
                config.retention_days,
                config_path.display()
            ));
        }
        Ok(config)
    }

    /// Resolves the store directory relative to the configuration file.
    pub fn store_path(&self, config_path: impl AsRef<Path>) -> PathBuf {
        let store = self.store.as_ref().unwrap_or(&DEFAULT_STORE_PATH);
        if store.is_absolute() {
            store.clone()
        } else {
            config_path
                .as_ref()
                .parent()
                .map(|parent| parent.join(store))
                .unwrap_or_else(|| store.clone())
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::days(self.retention_days)
    }
}
