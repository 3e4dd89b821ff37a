//! Unified error types for the volume-engine-core library.
//!
//! Uses SNAFU for context-rich error handling, especially useful when the same
//! underlying error type (like `std::io::Error`) appears in different contexts.
//!
//! Errors never cross a backend's public boundary: drivers map them into an
//! [`OperationOutcome`](crate::volume::OperationOutcome) with a sanitized
//! message. The variants follow the failure taxonomy callers rely on to tell
//! an expected "not mounted" state apart from faults that need attention.

use snafu::{ResultExt, Snafu};
use std::path::PathBuf;

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Message used for the expected, non-fault "nothing is mounted here" state.
pub const NOT_MOUNTED_MESSAGE: &str = "volume not mounted";

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A configuration for one backend kind was routed to another driver.
    #[snafu(display("provided config is not for the {expected} backend"))]
    ConfigMismatch { expected: String },

    /// The protocol cannot be mounted on the current operating system.
    #[snafu(display("{protocol} {operation} is only supported on Linux hosts."))]
    PlatformUnsupported {
        protocol: String,
        operation: String,
    },

    /// Nothing is mounted at the path. Expected steady state, not a fault.
    #[snafu(display("volume not mounted"))]
    NotMounted,

    /// A different filesystem occupies the mount point.
    #[snafu(display(
        "path {} is not mounted as {expected} (found {found})",
        path.display()
    ))]
    FstypeMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    /// The mount point exists in the mount table but cannot be accessed.
    #[snafu(display("path {} is not accessible: {source}", path.display()))]
    PathInaccessible {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An external operation exceeded its deadline.
    #[snafu(display("{label} timed out"))]
    Timeout { label: String },

    /// Failed to execute a system command.
    #[snafu(display("failed to execute command '{command}'"))]
    CommandExecution {
        command: String,
        source: std::io::Error,
    },

    /// Command executed but returned non-zero exit code.
    #[snafu(display("command '{command}' exited with code {code}: {message}"))]
    CommandExit {
        command: String,
        code: i32,
        message: String,
    },

    /// Mount point creation failed.
    #[snafu(display("failed to create mount point at {}", path.display()))]
    MountPointCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The OS mount table could not be read.
    #[snafu(display("failed to read mount table at {}", path.display()))]
    MountTableRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A mount table line did not have the expected shape.
    #[snafu(display("failed to parse mount table entry: {message}"))]
    MountTableParse { message: String },

    /// A credential reference could not be resolved.
    #[snafu(display("failed to resolve secret reference '{reference}': {message}"))]
    SecretResolution { reference: String, message: String },

    /// Failed to write credential material (SSH keys, known hosts).
    #[snafu(display("failed to write credential file at {}", path.display()))]
    CredentialWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Engine configuration file cannot be read.
    #[snafu(display("failed to read config at {}", path.display()))]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Engine configuration file is not valid JSON for the expected shape.
    #[snafu(display("failed to parse config at {}", path.display()))]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(whatever, display("{message}"))]
    Generic {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error + Send + Sync>, Some)))]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Returns true for the expected "nothing mounted" state.
    pub fn is_not_mounted(&self) -> bool {
        matches!(self, Error::NotMounted)
    }

    /// Returns true if this error is a deadline overrun.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for command execution errors.
    fn command_context(self, command: impl Into<String>) -> Result<T>;

    /// Add context for mount point creation errors.
    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for mount table read errors.
    fn mount_table_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for credential file write errors.
    fn credential_write_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for config read errors.
    fn config_read_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn command_context(self, command: impl Into<String>) -> Result<T> {
        self.context(CommandExecutionSnafu {
            command: command.into(),
        })
    }

    fn mount_point_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountPointCreationSnafu { path: path.into() })
    }

    fn mount_table_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountTableReadSnafu { path: path.into() })
    }

    fn credential_write_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(CredentialWriteSnafu { path: path.into() })
    }

    fn config_read_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(ConfigReadSnafu { path: path.into() })
    }
}
