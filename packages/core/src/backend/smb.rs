//! SMB/CIFS protocol driver.
//!
//! A failed mount is retried once with `mount -i`.

use std::path::Path;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use super::BackendContext;
use super::remote::Protocol;
use crate::error::Result;
use crate::executor::CommandSpec;
use crate::mount::current_ids;
use crate::sanitize::sanitize_sensitive_data;
use crate::volume::{BackendKind, SmbConfig, VolumeConfig};

/// SMB/CIFS via the kernel client (`mount -t cifs`).
pub struct Smb;

impl Smb {
    fn mount_args(config: &SmbConfig, password: &SecretString, path: &Path) -> Vec<String> {
        let (uid, gid) = current_ids();
        let mut options = vec![
            format!("user={}", config.username),
            format!("pass={}", password.expose_secret()),
            format!("port={}", config.port),
            format!("uid={uid}"),
            format!("gid={gid}"),
        ];
        if let Some(vers) = config.vers.option_value() {
            options.push(format!("vers={vers}"));
        }
        if let Some(domain) = config.domain.as_deref().filter(|d| !d.is_empty()) {
            options.push(format!("domain={domain}"));
        }
        if config.read_only {
            options.push("ro".to_string());
        }

        vec![
            "-t".to_string(),
            "cifs".to_string(),
            "-o".to_string(),
            options.join(","),
            format!("//{}/{}", config.server, config.share),
            path.to_string_lossy().to_string(),
        ]
    }
}

#[async_trait]
impl Protocol for Smb {
    type Config = SmbConfig;

    const KIND: BackendKind = BackendKind::Smb;
    const EXPECTED_FSTYPE: &'static str = "cifs";

    fn select(config: &VolumeConfig) -> Option<&SmbConfig> {
        match config {
            VolumeConfig::Smb(c) => Some(c),
            _ => None,
        }
    }

    fn accepts_fstype(fstype: &str) -> bool {
        fstype == "cifs" || fstype == "smb3"
    }

    async fn attach(config: &SmbConfig, ctx: &BackendContext, path: &Path) -> Result<()> {
        let password = ctx.secrets().resolve(&config.password).await?;
        let args = Self::mount_args(config, &password, path);

        let spec = CommandSpec::new("mount").args(args.clone());
        info!(command = %spec.display(), "executing mount");

        let first = ctx.invoker().run(&spec).await?;
        if first.success() {
            return Ok(());
        }

        // mount.cifs can reject options the kernel accepts; `-i` skips the
        // userspace helper and hands the options straight to the kernel.
        warn!(
            stderr = %sanitize_sensitive_data(first.stderr.trim()),
            "initial SMB mount failed, retrying with -i"
        );
        let retry = CommandSpec::new("mount").arg("-i").args(args);
        ctx.invoker().run(&retry).await?.check("mount")?;
        Ok(())
    }
}
