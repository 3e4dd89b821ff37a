//! Local directory volumes.
//!
//! Nothing is attached: the volume is healthy when its directory exists and
//! can be listed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use snafu::whatever;
use tracing::{debug, error, info, warn};

use super::{BackendContext, Reconciled, RemountPolicy, VolumeBackend};
use crate::error::{Error, IoResultExt, Result};
use crate::timeout::with_timeout;
use crate::volume::{BackendKind, OperationOutcome, VolumeConfig};

/// Plain directory on the host filesystem.
///
/// "Mounting" creates the directory; unmounting never touches the data.
/// Works on every platform.
pub struct LocalBackend {
    config: VolumeConfig,
    path: PathBuf,
    ctx: Arc<BackendContext>,
}

impl LocalBackend {
    pub fn new(config: VolumeConfig, path: impl Into<PathBuf>, ctx: Arc<BackendContext>) -> Self {
        Self {
            config,
            path: path.into(),
            ctx,
        }
    }

    async fn probe(&self) -> Result<()> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(Error::NotMounted),
            Err(e) => {
                return Err(Error::PathInaccessible {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };

        if !metadata.is_dir() {
            whatever!("{} exists but is not a directory", self.path.display());
        }

        // Reading an entry proves the directory is readable, not just present.
        let inaccessible = |source| Error::PathInaccessible {
            path: self.path.clone(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.path).await.map_err(inaccessible)?;
        entries.next_entry().await.map_err(inaccessible)?;
        Ok(())
    }

    async fn check_health_locked(&self) -> OperationOutcome {
        match with_timeout(self.probe(), self.ctx.timeout(), "Local health check").await {
            Ok(()) => OperationOutcome::mounted(),
            Err(err) => {
                let outcome = OperationOutcome::from_error(&err);
                if !err.is_not_mounted() {
                    error!(
                        path = %self.path.display(),
                        error = outcome.error.as_deref().unwrap_or_default(),
                        "local volume health check failed"
                    );
                }
                outcome
            }
        }
    }

    async fn mount_locked(&self) -> OperationOutcome {
        if !matches!(self.config, VolumeConfig::Local(_)) {
            let err = Error::ConfigMismatch {
                expected: BackendKind::Local.display_name().to_string(),
            };
            error!(path = %self.path.display(), "{err}");
            return OperationOutcome::from_error(&err);
        }

        let run = async {
            tokio::fs::create_dir_all(&self.path)
                .await
                .mount_point_context(&self.path)?;
            self.probe().await
        };

        match with_timeout(run, self.ctx.timeout(), "Local mount").await {
            Ok(()) => {
                info!(path = %self.path.display(), "local volume ready");
                OperationOutcome::mounted()
            }
            Err(err) => {
                let outcome = OperationOutcome::from_error(&err);
                error!(
                    path = %self.path.display(),
                    error = outcome.error.as_deref().unwrap_or_default(),
                    "error preparing local volume"
                );
                outcome
            }
        }
    }

    fn unmount_locked(&self) -> OperationOutcome {
        debug!(path = %self.path.display(), "local volume released");
        OperationOutcome::unmounted()
    }
}

#[async_trait]
impl VolumeBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
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
        self.unmount_locked()
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

        warn!(
            path = %self.path.display(),
            error = health.error.as_deref().unwrap_or_default(),
            "local volume unhealthy, preparing it again"
        );
        Reconciled {
            outcome: self.mount_locked().await,
            remounted: true,
        }
    }
}
