//! Volume backend drivers.
//!
//! Every protocol implements the same three-operation [`VolumeBackend`]
//! contract. None of the operations return `Err`: failures come back as an
//! [`OperationOutcome`] with `status = error` and a sanitized message.
//!
//! Drivers hold no state of their own beyond the config and path they were
//! built for. Infrastructure (process invoker, mount table inspector, secret
//! resolver, path locks) is injected through a shared [`BackendContext`].

mod factory;
mod local;
mod nfs;
mod rclone;
mod remote;
mod sftp;
mod smb;
mod webdav;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::executor::{ProcessInvoker, SystemInvoker};
use crate::locks::PathLocks;
use crate::mountinfo::{MountInspector, ProcMountInspector};
use crate::platform::Platform;
use crate::secret::{DefaultSecretResolver, SecretResolver};
use crate::volume::{BackendKind, OperationOutcome, VolumeStatus};

pub use factory::{BackendFactory, create_backend};
pub use local::LocalBackend;
pub use nfs::Nfs;
pub use rclone::Rclone;
pub use remote::{Protocol, RemoteBackend};
pub use sftp::Sftp;
pub use smb::Smb;
pub use webdav::Webdav;

pub type NfsBackend = RemoteBackend<Nfs>;
pub type SmbBackend = RemoteBackend<Smb>;
pub type SftpBackend = RemoteBackend<Sftp>;
pub type WebdavBackend = RemoteBackend<Webdav>;
pub type RcloneBackend = RemoteBackend<Rclone>;

/// Uniform mount/unmount/health contract implemented by every driver.
#[async_trait]
pub trait VolumeBackend: Send + Sync {
    /// Protocol this driver speaks.
    fn kind(&self) -> BackendKind;

    /// Mount path this driver was built for.
    fn path(&self) -> &Path;

    /// Achieves `mounted`, or reports why it could not.
    ///
    /// A no-op when the path is already correctly mounted. A stale or foreign
    /// mount found by the pre-mount health check is unmounted first.
    async fn mount(&self) -> OperationOutcome;

    /// Achieves `unmounted`, or reports why it could not.
    ///
    /// A no-op when the path is not itself a mount point.
    async fn unmount(&self) -> OperationOutcome;

    /// Reports observed status without changing anything.
    async fn check_health(&self) -> OperationOutcome;

    /// Checks health and, when `policy` calls for it, unmounts and mounts
    /// again.
    ///
    /// The whole sequence runs under the path's exclusive lock, so no other
    /// mount or unmount can act on the path between the check and the repair.
    async fn reconcile(&self, policy: RemountPolicy) -> Reconciled;
}

/// What decides whether an observed outcome calls for an unmount/mount cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemountPolicy {
    pub auto_remount: bool,
    /// Status recorded by the previous pass, if any.
    pub last_status: Option<VolumeStatus>,
}

impl RemountPolicy {
    /// A fault always calls for a remount. A volume that was mounted last
    /// pass and is now simply gone (an operator unmounted it, the host
    /// rebooted) does too.
    pub fn needs_remount(&self, observed: &OperationOutcome) -> bool {
        if !self.auto_remount {
            return false;
        }
        match observed.status {
            VolumeStatus::Error => true,
            VolumeStatus::Unmounted => self.last_status == Some(VolumeStatus::Mounted),
            VolumeStatus::Mounted | VolumeStatus::Unknown => false,
        }
    }
}

/// Result of [`VolumeBackend::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    /// Health when left alone, otherwise the outcome of the remount.
    pub outcome: OperationOutcome,
    pub remounted: bool,
}

/// Infrastructure shared by every driver built from one factory.
pub struct BackendContext {
    config: EngineConfig,
    invoker: Arc<dyn ProcessInvoker>,
    inspector: Arc<dyn MountInspector>,
    secrets: Arc<dyn SecretResolver>,
    platform: Platform,
    locks: PathLocks,
}

impl BackendContext {
    pub fn new(
        config: EngineConfig,
        invoker: Arc<dyn ProcessInvoker>,
        inspector: Arc<dyn MountInspector>,
        secrets: Arc<dyn SecretResolver>,
    ) -> Self {
        Self {
            config,
            invoker,
            inspector,
            secrets,
            platform: Platform::current(),
            locks: PathLocks::default(),
        }
    }

    /// Context backed by the real OS: `tokio::process`, `/proc/self/mountinfo`
    /// and the default secret resolver.
    pub fn system(config: EngineConfig) -> Self {
        let invoker: Arc<dyn ProcessInvoker> = Arc::new(
            SystemInvoker::with_escalation(config.privilege)
                .kill_on_timeout(config.kill_on_timeout),
        );
        let inspector = Arc::new(ProcMountInspector::new(invoker.clone()));
        Self::new(config, invoker, inspector, Arc::new(DefaultSecretResolver))
    }

    /// Overrides the detected host platform.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn invoker(&self) -> &dyn ProcessInvoker {
        self.invoker.as_ref()
    }

    pub fn inspector(&self) -> &dyn MountInspector {
        self.inspector.as_ref()
    }

    pub fn secrets(&self) -> &dyn SecretResolver {
        self.secrets.as_ref()
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn locks(&self) -> &PathLocks {
        &self.locks
    }

    pub fn timeout(&self) -> Duration {
        self.config.operation_timeout()
    }
}

impl std::fmt::Debug for BackendContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendContext")
            .field("config", &self.config)
            .field("platform", &self.platform)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(last_status: Option<VolumeStatus>) -> RemountPolicy {
        RemountPolicy {
            auto_remount: true,
            last_status,
        }
    }

    #[test]
    fn test_fault_needs_remount_only_when_enabled() {
        let fault = OperationOutcome::from_error(&crate::error::Error::Timeout {
            label: "SMB health check".to_string(),
        });
        assert!(policy(None).needs_remount(&fault));
        assert!(!RemountPolicy::default().needs_remount(&fault));
    }

    #[test]
    fn test_unmounted_needs_remount_only_after_mounted() {
        let gone = OperationOutcome::from_error(&crate::error::Error::NotMounted);
        assert!(policy(Some(VolumeStatus::Mounted)).needs_remount(&gone));
        assert!(!policy(Some(VolumeStatus::Unmounted)).needs_remount(&gone));
        assert!(!policy(None).needs_remount(&gone));
        assert!(!policy(Some(VolumeStatus::Mounted)).needs_remount(&OperationOutcome::mounted()));
    }
}
