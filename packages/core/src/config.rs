//! Engine configuration.
//!
//! Loaded from an optional JSON file, then overridden by environment
//! variables. Every field has a default so an empty object is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::{ConfigParseSnafu, IoResultExt, Result};
use crate::executor::PrivilegeEscalation;
use crate::volume;

/// Default base directory for volume mount points.
pub const DEFAULT_VOLUMES_DIR: &str = "/var/lib/volume-engine/volumes";

/// Environment variable overriding [`EngineConfig::volumes_dir`].
pub const ENV_VOLUMES_DIR: &str = "VOLUME_ENGINE_VOLUMES_DIR";

/// Environment variable overriding [`EngineConfig::operation_timeout_ms`].
pub const ENV_OPERATION_TIMEOUT_MS: &str = "VOLUME_ENGINE_OPERATION_TIMEOUT_MS";

/// Environment variable overriding [`EngineConfig::credentials_dir`].
pub const ENV_CREDENTIALS_DIR: &str = "VOLUME_ENGINE_CREDENTIALS_DIR";

fn default_volumes_dir() -> PathBuf {
    PathBuf::from(DEFAULT_VOLUMES_DIR)
}

fn default_operation_timeout_ms() -> u64 {
    5000
}

fn default_rclone_binary() -> String {
    "rclone".to_string()
}

fn default_sshfs_binary() -> String {
    "sshfs".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Base directory under which volume mount paths are derived.
    #[serde(default = "default_volumes_dir")]
    pub volumes_dir: PathBuf,
    /// Ceiling for any single external operation, in milliseconds.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Wrapper used for helpers that need root.
    #[serde(default)]
    pub privilege: PrivilegeEscalation,
    /// Kill a helper process when its caller times out.
    ///
    /// Off by default: the helper keeps running until its own protocol-level
    /// timeout, and only the caller stops waiting.
    #[serde(default)]
    pub kill_on_timeout: bool,
    #[serde(default = "default_rclone_binary")]
    pub rclone_binary: String,
    #[serde(default = "default_sshfs_binary")]
    pub sshfs_binary: String,
    /// Where SSH key and known_hosts material is written for sshfs.
    /// Defaults to a `credentials` directory next to `volumes_dir`.
    #[serde(default)]
    pub credentials_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            volumes_dir: default_volumes_dir(),
            operation_timeout_ms: default_operation_timeout_ms(),
            privilege: PrivilegeEscalation::default(),
            kill_on_timeout: false,
            rclone_binary: default_rclone_binary(),
            sshfs_binary: default_sshfs_binary(),
            credentials_dir: None,
        }
    }
}

impl EngineConfig {
    /// Creates a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config file location (`<config dir>/volume-engine/config.json`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("volume-engine").join("config.json"))
    }

    /// Reads a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).config_read_context(path)?;
        serde_json::from_str(&content).context(ConfigParseSnafu { path })
    }

    /// Loads `path` (or the default location when it exists), then applies
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    /// Applies overrides from a variable lookup (normally the process env).
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup(ENV_VOLUMES_DIR).filter(|v| !v.is_empty()) {
            self.volumes_dir = PathBuf::from(dir);
        }
        if let Some(ms) = lookup(ENV_OPERATION_TIMEOUT_MS).and_then(|v| v.parse().ok()) {
            self.operation_timeout_ms = ms;
        }
        if let Some(dir) = lookup(ENV_CREDENTIALS_DIR).filter(|v| !v.is_empty()) {
            self.credentials_dir = Some(PathBuf::from(dir));
        }
        self
    }

    /// Sets the volumes base directory.
    pub fn with_volumes_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.volumes_dir = dir.into();
        self
    }

    /// Sets the per-operation ceiling.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Sets the credentials directory.
    pub fn with_credentials_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.credentials_dir = Some(dir.into());
        self
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn credentials_dir(&self) -> PathBuf {
        self.credentials_dir.clone().unwrap_or_else(|| {
            self.volumes_dir
                .parent()
                .unwrap_or(&self.volumes_dir)
                .join("credentials")
        })
    }

    /// Mount path for a named volume.
    pub fn mount_path_for(&self, volume_name: &str) -> PathBuf {
        volume::mount_path_for(&self.volumes_dir, volume_name)
    }
}
