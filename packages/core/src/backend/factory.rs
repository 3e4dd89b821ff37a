//! Backend construction from volume configs.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use super::{
    BackendContext, LocalBackend, NfsBackend, RcloneBackend, SftpBackend, SmbBackend,
    VolumeBackend, WebdavBackend,
};
use crate::config::EngineConfig;
use crate::volume::{BackendKind, VolumeConfig};

/// Builds the driver matching a config's backend kind.
pub fn create_backend(
    config: &VolumeConfig,
    path: &Path,
    ctx: Arc<BackendContext>,
) -> Box<dyn VolumeBackend> {
    let config = config.clone();
    match config.kind() {
        BackendKind::Local => Box::new(LocalBackend::new(config, path, ctx)),
        BackendKind::Nfs => Box::new(NfsBackend::new(config, path, ctx)),
        BackendKind::Smb => Box::new(SmbBackend::new(config, path, ctx)),
        BackendKind::Sftp => Box::new(SftpBackend::new(config, path, ctx)),
        BackendKind::Webdav => Box::new(WebdavBackend::new(config, path, ctx)),
        BackendKind::Rclone => Box::new(RcloneBackend::new(config, path, ctx)),
    }
}

/// Hands out drivers that share one [`BackendContext`], and with it one set
/// of path locks.
#[derive(Debug, Clone)]
pub struct BackendFactory {
    ctx: Arc<BackendContext>,
}

impl BackendFactory {
    pub fn new(ctx: Arc<BackendContext>) -> Self {
        Self { ctx }
    }

    /// Factory backed by the real host.
    pub fn system(config: EngineConfig) -> Self {
        Self::new(Arc::new(BackendContext::system(config)))
    }

    pub fn create(&self, config: &VolumeConfig, path: &Path) -> Box<dyn VolumeBackend> {
        debug!(kind = %config.kind(), path = %path.display(), "creating backend");
        create_backend(config, path, self.ctx.clone())
    }

    pub fn context(&self) -> &BackendContext {
        &self.ctx
    }
}
