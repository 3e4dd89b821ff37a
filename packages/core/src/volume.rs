//! Volume data model.
//!
//! [`VolumeConfig`] is the user-supplied description of where a volume lives.
//! It is replaced wholesale on edit and never mutated by the engine. The
//! engine only ever reports *observed* state through [`OperationOutcome`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::sanitize::sanitize_sensitive_data;

/// Discriminant of [`VolumeConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Nfs,
    Smb,
    Sftp,
    Webdav,
    Rclone,
}

impl BackendKind {
    /// Human-readable protocol name used in logs and messages.
    pub fn display_name(self) -> &'static str {
        match self {
            BackendKind::Local => "Local",
            BackendKind::Nfs => "NFS",
            BackendKind::Smb => "SMB",
            BackendKind::Sftp => "SFTP",
            BackendKind::Webdav => "WebDAV",
            BackendKind::Rclone => "Rclone",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// NFS protocol version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NfsVersion {
    #[serde(rename = "3")]
    V3,
    #[serde(rename = "4")]
    V4,
    #[default]
    #[serde(rename = "4.1")]
    V4_1,
}

impl NfsVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            NfsVersion::V3 => "3",
            NfsVersion::V4 => "4",
            NfsVersion::V4_1 => "4.1",
        }
    }
}

/// SMB dialect passed as `vers=`. `Auto` lets the kernel negotiate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmbVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "2.0")]
    V2_0,
    #[serde(rename = "2.1")]
    V2_1,
    #[default]
    #[serde(rename = "3.0")]
    V3_0,
    #[serde(rename = "auto")]
    Auto,
}

impl SmbVersion {
    /// Returns the `vers=` value, or `None` when negotiation is automatic.
    pub fn option_value(self) -> Option<&'static str> {
        match self {
            SmbVersion::V1_0 => Some("1.0"),
            SmbVersion::V2_0 => Some("2.0"),
            SmbVersion::V2_1 => Some("2.1"),
            SmbVersion::V3_0 => Some("3.0"),
            SmbVersion::Auto => None,
        }
    }
}

fn default_nfs_port() -> u16 {
    2049
}

fn default_smb_port() -> u16 {
    445
}

fn default_sftp_port() -> u16 {
    22
}

fn default_webdav_port() -> u16 {
    80
}

fn default_remote_path() -> String {
    "/".to_string()
}

/// Local directory volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalConfig {
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfsConfig {
    pub server: String,
    pub export_path: String,
    #[serde(default = "default_nfs_port")]
    pub port: u16,
    #[serde(default)]
    pub version: NfsVersion,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmbConfig {
    pub server: String,
    pub share: String,
    pub username: String,
    /// Credential reference, resolved at mount time.
    pub password: String,
    #[serde(default)]
    pub vers: SmbVersion,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_smb_port")]
    pub port: u16,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpConfig {
    pub host: String,
    #[serde(default = "default_sftp_port")]
    pub port: u16,
    pub username: String,
    /// Credential reference for password authentication.
    #[serde(default)]
    pub password: Option<String>,
    /// Credential reference for key authentication.
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default = "default_remote_path")]
    pub path: String,
    #[serde(default)]
    pub skip_host_key_check: bool,
    /// known_hosts content used when host keys are verified.
    #[serde(default)]
    pub known_hosts: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebdavConfig {
    pub server: String,
    #[serde(default = "default_remote_path")]
    pub path: String,
    #[serde(default)]
    pub username: Option<String>,
    /// Credential reference.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_webdav_port")]
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RcloneConfig {
    pub remote: String,
    #[serde(default = "default_remote_path")]
    pub path: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Backend description of a volume, keyed by `backend`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum VolumeConfig {
    /// `directory` is accepted for records written by older releases.
    #[serde(alias = "directory")]
    Local(LocalConfig),
    Nfs(NfsConfig),
    Smb(SmbConfig),
    Sftp(SftpConfig),
    Webdav(WebdavConfig),
    Rclone(RcloneConfig),
}

impl VolumeConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            VolumeConfig::Local(_) => BackendKind::Local,
            VolumeConfig::Nfs(_) => BackendKind::Nfs,
            VolumeConfig::Smb(_) => BackendKind::Smb,
            VolumeConfig::Sftp(_) => BackendKind::Sftp,
            VolumeConfig::Webdav(_) => BackendKind::Webdav,
            VolumeConfig::Rclone(_) => BackendKind::Rclone,
        }
    }

    pub fn read_only(&self) -> bool {
        match self {
            VolumeConfig::Local(c) => c.read_only,
            VolumeConfig::Nfs(c) => c.read_only,
            VolumeConfig::Smb(c) => c.read_only,
            VolumeConfig::Sftp(c) => c.read_only,
            VolumeConfig::Webdav(c) => c.read_only,
            VolumeConfig::Rclone(c) => c.read_only,
        }
    }
}

/// Observed state of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeStatus {
    Mounted,
    Unmounted,
    Error,
    Unknown,
}

impl fmt::Display for VolumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VolumeStatus::Mounted => "mounted",
            VolumeStatus::Unmounted => "unmounted",
            VolumeStatus::Error => "error",
            VolumeStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Result of mount, unmount or check_health.
///
/// `error` is always sanitized before it is stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub status: VolumeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationOutcome {
    pub fn mounted() -> Self {
        Self {
            status: VolumeStatus::Mounted,
            error: None,
        }
    }

    pub fn unmounted() -> Self {
        Self {
            status: VolumeStatus::Unmounted,
            error: None,
        }
    }

    /// Maps an engine error into an outcome.
    ///
    /// [`Error::NotMounted`] keeps `unmounted` status and carries the sentinel
    /// message; every other error becomes `error`.
    pub fn from_error(err: &Error) -> Self {
        let status = if err.is_not_mounted() {
            VolumeStatus::Unmounted
        } else {
            VolumeStatus::Error
        };
        Self {
            status,
            error: Some(sanitize_sensitive_data(&err.to_string())),
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.status == VolumeStatus::Mounted
    }

    /// True when the outcome is the "not mounted" sentinel rather than a fault.
    pub fn is_not_mounted(&self) -> bool {
        self.status == VolumeStatus::Unmounted
            && self.error.as_deref() == Some(crate::error::NOT_MOUNTED_MESSAGE)
    }
}

/// Derives the mount path for a volume from its name.
///
/// The path is stable for the volume's lifetime: `<base>/<sanitized name>/_data`.
pub fn mount_path_for(base: &Path, volume_name: &str) -> PathBuf {
    base.join(sanitize_mount_name(volume_name)).join("_data")
}

/// Sanitize a string for use as a mount point directory name.
///
/// Replaces problematic characters with underscores.
pub fn sanitize_mount_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_smb_config_with_defaults() {
        let json = r#"{
            "backend": "smb",
            "server": "nas.local",
            "share": "backups",
            "username": "alice",
            "password": "env:SMB_PASS"
        }"#;
        let config: VolumeConfig = serde_json::from_str(json).unwrap();
        let VolumeConfig::Smb(smb) = &config else {
            panic!("expected smb config");
        };
        assert_eq!(smb.port, 445);
        assert_eq!(smb.vers, SmbVersion::V3_0);
        assert!(!smb.read_only);
        assert_eq!(config.kind(), BackendKind::Smb);
    }

    #[test]
    fn test_parse_nfs_version() {
        let json = r#"{"backend":"nfs","server":"10.0.0.2","exportPath":"/srv","version":"3"}"#;
        let config: VolumeConfig = serde_json::from_str(json).unwrap();
        let VolumeConfig::Nfs(nfs) = config else {
            panic!("expected nfs config");
        };
        assert_eq!(nfs.version, NfsVersion::V3);
        assert_eq!(nfs.port, 2049);
    }

    #[test]
    fn test_directory_alias() {
        let config: VolumeConfig = serde_json::from_str(r#"{"backend":"directory"}"#).unwrap();
        assert_eq!(config.kind(), BackendKind::Local);
    }

    #[test]
    fn test_outcome_from_not_mounted() {
        let outcome = OperationOutcome::from_error(&Error::NotMounted);
        assert_eq!(outcome.status, VolumeStatus::Unmounted);
        assert!(outcome.is_not_mounted());
    }

    #[test]
    fn test_outcome_from_command_exit_is_sanitized() {
        let err = Error::CommandExit {
            command: "mount".to_string(),
            code: 32,
            message: "bad option user=bob,pass=hunter2".to_string(),
        };
        let outcome = OperationOutcome::from_error(&err);
        assert_eq!(outcome.status, VolumeStatus::Error);
        let msg = outcome.error.unwrap();
        assert!(!msg.contains("hunter2"));
    }

    #[test]
    fn test_mount_path_for() {
        assert_eq!(
            mount_path_for(Path::new("/var/lib/ve/volumes"), "My Share/1"),
            PathBuf::from("/var/lib/ve/volumes/My_Share_1/_data")
        );
    }

    #[test]
    fn test_sanitize_mount_name() {
        assert_eq!(sanitize_mount_name("Games SSD"), "Games_SSD");
        assert_eq!(sanitize_mount_name("../etc"), "___etc");
        assert_eq!(sanitize_mount_name(""), "_");
    }
}
