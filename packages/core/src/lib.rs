//! volume-engine-core: mount, unmount and health-check storage volumes.
//!
//! Drives local directories and network filesystems (NFS, SMB, SFTP,
//! WebDAV, rclone) through one uniform contract, checks every claim against
//! the live OS mount table, and bounds every external call with a timeout.
//!
//! # Modules
//!
//! - [`backend`]: The [`VolumeBackend`] contract, protocol drivers and factory
//! - [`mountinfo`]: OS mount table inspection
//! - [`executor`]: Helper process execution with optional `sudo`
//! - [`timeout`]: Deadline wrapper for external operations
//! - [`reconcile`]: Periodic health checks and auto-remount
//! - [`config`]: Engine configuration file and environment overrides
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use volume_engine_core::{BackendFactory, EngineConfig, VolumeConfig};
//!
//! # async fn run() -> volume_engine_core::error::Result<()> {
//! let config = EngineConfig::load(None)?;
//! let volume: VolumeConfig = serde_json::from_str(
//!     r#"{"backend": "nfs", "server": "10.0.0.2", "exportPath": "/srv/backups"}"#,
//! ).expect("valid volume json");
//!
//! let path = config.mount_path_for("backups");
//! let factory = BackendFactory::system(config);
//! let backend = factory.create(&volume, &path);
//!
//! let outcome = backend.mount().await;
//! println!("{}: {:?}", outcome.status, outcome.error);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod executor;
pub mod locks;
pub mod mount;
pub mod mountinfo;
pub mod platform;
pub mod reconcile;
pub mod sanitize;
pub mod secret;
pub mod timeout;
pub mod volume;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{BackendContext, BackendFactory, VolumeBackend, create_backend};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use reconcile::{HealthReport, Reconciler, VolumeRecord};
pub use volume::{BackendKind, OperationOutcome, VolumeConfig, VolumeStatus};
