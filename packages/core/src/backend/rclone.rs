//! rclone protocol driver.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use super::BackendContext;
use super::remote::Protocol;
use crate::error::Result;
use crate::executor::CommandSpec;
use crate::volume::{BackendKind, RcloneConfig, VolumeConfig};

/// Any rclone remote via `rclone mount --daemon`.
///
/// The remote itself (credentials, provider options) lives in the rclone
/// config file; the volume only names it.
pub struct Rclone;

impl Rclone {
    fn command(binary: &str, config: &RcloneConfig, path: &Path) -> CommandSpec {
        let mut spec = CommandSpec::new(binary).args([
            "mount".to_string(),
            format!("{}:{}", config.remote, config.path),
            path.to_string_lossy().to_string(),
            "--daemon".to_string(),
        ]);
        if config.read_only {
            spec = spec.arg("--read-only");
        }
        spec.args(["--vfs-cache-mode", "writes", "--allow-non-empty", "--allow-other"])
    }
}

#[async_trait]
impl Protocol for Rclone {
    type Config = RcloneConfig;

    const KIND: BackendKind = BackendKind::Rclone;
    const EXPECTED_FSTYPE: &'static str = "fuse.rclone";

    fn select(config: &VolumeConfig) -> Option<&RcloneConfig> {
        match config {
            VolumeConfig::Rclone(c) => Some(c),
            _ => None,
        }
    }

    fn accepts_fstype(fstype: &str) -> bool {
        fstype.contains("rclone")
    }

    async fn attach(config: &RcloneConfig, ctx: &BackendContext, path: &Path) -> Result<()> {
        let spec = Self::command(&ctx.config().rclone_binary, config, path);
        info!(command = %spec.display(), "executing rclone mount");
        ctx.invoker().run(&spec).await?.check("rclone")?;
        Ok(())
    }
}
