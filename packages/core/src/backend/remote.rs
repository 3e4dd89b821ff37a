//! Shared mount/unmount/health flow for network protocols.
//!
//! Every remote protocol follows the same algorithm and only differs in how
//! the helper is invoked and which filesystem type it leaves in the mount
//! table. That variance lives in a [`Protocol`] implementation;
//! [`RemoteBackend`] drives the flow.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::{BackendContext, Reconciled, RemountPolicy, VolumeBackend};
use crate::error::{Error, Result};
use crate::mount::{create_mount_point, remove_mount_point, unmount_path};
use crate::platform::Platform;
use crate::timeout::with_timeout;
use crate::volume::{BackendKind, OperationOutcome, VolumeConfig, VolumeStatus};

/// Protocol-specific half of a remote backend.
#[async_trait]
pub trait Protocol: Send + Sync + 'static {
    /// Config variant this protocol consumes.
    type Config: Send + Sync;

    const KIND: BackendKind;

    /// Filesystem type named in mismatch errors.
    const EXPECTED_FSTYPE: &'static str;

    /// Extracts this protocol's config, or `None` when the config is for
    /// another backend.
    fn select(config: &VolumeConfig) -> Option<&Self::Config>;

    /// Whether a mount table fstype belongs to this protocol.
    fn accepts_fstype(fstype: &str) -> bool;

    fn supported_on(platform: Platform) -> bool {
        platform == Platform::Linux
    }

    /// Runs the helper that attaches the remote at `path`.
    ///
    /// The mount point directory already exists when this is called.
    async fn attach(config: &Self::Config, ctx: &BackendContext, path: &Path) -> Result<()>;

    /// Removes files `attach` wrote outside the mount itself. Runs after an
    /// unmount and after a failed mount.
    async fn cleanup(_config: &Self::Config, _ctx: &BackendContext, _path: &Path) {}
}

/// Driver for one remote protocol, bound to a config and a mount path.
pub struct RemoteBackend<P: Protocol> {
    config: VolumeConfig,
    path: PathBuf,
    ctx: Arc<BackendContext>,
    protocol: PhantomData<P>,
}

impl<P: Protocol> RemoteBackend<P> {
    pub fn new(config: VolumeConfig, path: impl Into<PathBuf>, ctx: Arc<BackendContext>) -> Self {
        Self {
            config,
            path: path.into(),
            ctx,
            protocol: PhantomData,
        }
    }

    fn label(operation: &str) -> String {
        format!("{} {operation}", P::KIND)
    }

    fn platform_guard(&self, operation: &str) -> Result<()> {
        if P::supported_on(self.ctx.platform()) {
            return Ok(());
        }
        Err(Error::PlatformUnsupported {
            protocol: P::KIND.display_name().to_string(),
            operation: operation.to_string(),
        })
    }

    async fn release_attachments(&self) {
        if let Some(config) = P::select(&self.config) {
            P::cleanup(config, &self.ctx, &self.path).await;
        }
    }

    async fn mount_locked(&self) -> OperationOutcome {
        debug!(path = %self.path.display(), "mounting {} volume", P::KIND);

        let Some(config) = P::select(&self.config) else {
            let err = Error::ConfigMismatch {
                expected: P::KIND.display_name().to_string(),
            };
            error!(path = %self.path.display(), "{err}");
            return OperationOutcome::from_error(&err);
        };

        if let Err(err) = self.platform_guard("mounting") {
            error!("{err}");
            return OperationOutcome::from_error(&err);
        }

        let health = self.check_health_locked().await;
        if health.is_mounted() {
            return health;
        }
        if health.status == VolumeStatus::Error {
            debug!(
                path = %self.path.display(),
                "trying to unmount any existing mount before mounting"
            );
            let _ = self.unmount_locked().await;
        }

        let run = async {
            create_mount_point(&self.path).await?;
            P::attach(config, &self.ctx, &self.path).await?;
            info!(path = %self.path.display(), "{} volume mounted", P::KIND);
            Ok::<_, Error>(())
        };

        match with_timeout(run, self.ctx.timeout(), &Self::label("mount")).await {
            Ok(()) => OperationOutcome::mounted(),
            Err(err) => {
                let outcome = OperationOutcome::from_error(&err);
                error!(
                    path = %self.path.display(),
                    error = outcome.error.as_deref().unwrap_or_default(),
                    "error mounting {} volume",
                    P::KIND
                );
                self.release_attachments().await;
                outcome
            }
        }
    }

    async fn unmount_locked(&self) -> OperationOutcome {
        if let Err(err) = self.platform_guard("unmounting") {
            error!("{err}");
            return OperationOutcome::from_error(&err);
        }

        let run = async {
            if self.ctx.inspector().mount_for_path(&self.path).await?.is_none() {
                debug!(
                    path = %self.path.display(),
                    "path is not a mount point, skipping unmount"
                );
                return Ok(());
            }

            unmount_path(self.ctx.invoker(), &self.path).await?;
            remove_mount_point(&self.path).await;
            info!(path = %self.path.display(), "{} volume unmounted", P::KIND);
            Ok::<_, Error>(())
        };

        match with_timeout(run, self.ctx.timeout(), &Self::label("unmount")).await {
            Ok(()) => {
                self.release_attachments().await;
                OperationOutcome::unmounted()
            }
            Err(err) => {
                let outcome = OperationOutcome::from_error(&err);
                error!(
                    path = %self.path.display(),
                    error = outcome.error.as_deref().unwrap_or_default(),
                    "error unmounting {} volume",
                    P::KIND
                );
                outcome
            }
        }
    }

    async fn probe(&self) -> Result<()> {
        let inspector = self.ctx.inspector();

        if let Err(e) = tokio::fs::metadata(&self.path).await {
            // A dead FUSE or NFS mount fails with EIO/ENOTCONN/ESTALE while
            // still listed in the mount table. That is a fault, not absence.
            if e.kind() != std::io::ErrorKind::NotFound
                && inspector.mount_for_path(&self.path).await?.is_some()
            {
                return Err(Error::PathInaccessible {
                    path: self.path.clone(),
                    source: e,
                });
            }
            return Err(Error::NotMounted);
        }

        let entry = inspector
            .mount_for_path(&self.path)
            .await?
            .ok_or(Error::NotMounted)?;

        if !P::accepts_fstype(&entry.fstype) {
            return Err(Error::FstypeMismatch {
                path: self.path.clone(),
                expected: P::EXPECTED_FSTYPE.to_string(),
                found: entry.fstype,
            });
        }

        Ok(())
    }

    async fn check_health_locked(&self) -> OperationOutcome {
        match with_timeout(self.probe(), self.ctx.timeout(), &Self::label("health check")).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "{} volume is healthy and mounted", P::KIND);
                OperationOutcome::mounted()
            }
            Err(err) => {
                let outcome = OperationOutcome::from_error(&err);
                if err.is_not_mounted() {
                    debug!(path = %self.path.display(), "{} volume is not mounted", P::KIND);
                } else {
                    error!(
                        path = %self.path.display(),
                        error = outcome.error.as_deref().unwrap_or_default(),
                        "{} volume health check failed",
                        P::KIND
                    );
                }
                outcome
            }
        }
    }
}

#[async_trait]
impl<P: Protocol> VolumeBackend for RemoteBackend<P> {
    fn kind(&self) -> BackendKind {
        P::KIND
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn mount(&self) -> OperationOutcome {
        let _guard = self.ctx.locks().write(&self.path).await;
        self.mount_locked().await
    }

    async fn unmount(&self) -> OperationOutcome {
        let _guard = self.ctx.locks().write(&self.path).await;
        self.unmount_locked().await
    }

    async fn check_health(&self) -> OperationOutcome {
        let _guard = self.ctx.locks().read(&self.path).await;
        self.check_health_locked().await
    }

    async fn reconcile(&self, policy: RemountPolicy) -> Reconciled {
        let _guard = self.ctx.locks().write(&self.path).await;

        let health = self.check_health_locked().await;
        if !policy.needs_remount(&health) {
            return Reconciled {
                outcome: health,
                remounted: false,
            };
        }

        info!(
            path = %self.path.display(),
            status = %health.status,
            error = health.error.as_deref().unwrap_or_default(),
            "remounting {} volume",
            P::KIND
        );
        let unmounted = self.unmount_locked().await;
        if unmounted.status == VolumeStatus::Error {
            warn!(
                path = %self.path.display(),
                error = unmounted.error.as_deref().unwrap_or_default(),
                "unmount before remount failed"
            );
        }
        Reconciled {
            outcome: self.mount_locked().await,
            remounted: true,
        }
    }
}
