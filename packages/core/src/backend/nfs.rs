//! NFS protocol driver.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use super::BackendContext;
use super::remote::Protocol;
use crate::error::Result;
use crate::executor::CommandSpec;
use crate::volume::{BackendKind, NfsConfig, VolumeConfig};

/// NFS via the kernel client (`mount -t nfs`).
pub struct Nfs;

impl Nfs {
    fn command(config: &NfsConfig, path: &Path) -> CommandSpec {
        let mut options = vec![
            format!("vers={}", config.version.as_str()),
            format!("port={}", config.port),
        ];
        if config.read_only {
            options.push("ro".to_string());
        }

        CommandSpec::new("mount").args([
            "-t".to_string(),
            "nfs".to_string(),
            "-o".to_string(),
            options.join(","),
            format!("{}:{}", config.server, config.export_path),
            path.to_string_lossy().to_string(),
        ])
    }
}

#[async_trait]
impl Protocol for Nfs {
    type Config = NfsConfig;

    const KIND: BackendKind = BackendKind::Nfs;
    const EXPECTED_FSTYPE: &'static str = "nfs";

    fn select(config: &VolumeConfig) -> Option<&NfsConfig> {
        match config {
            VolumeConfig::Nfs(c) => Some(c),
            _ => None,
        }
    }

    // The kernel reports `nfs` for v2/v3 and `nfs4` for v4.x.
    fn accepts_fstype(fstype: &str) -> bool {
        fstype.starts_with("nfs")
    }

    async fn attach(config: &NfsConfig, ctx: &BackendContext, path: &Path) -> Result<()> {
        let spec = Self::command(config, path);
        info!(command = %spec.display(), "executing mount");
        ctx.invoker().run(&spec).await?.check("mount")?;
        Ok(())
    }
}
