//! WebDAV protocol driver.
//!
//! Credentials reach `mount.davfs` on stdin, never on the command line.

use std::path::Path;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use super::BackendContext;
use super::remote::Protocol;
use crate::error::Result;
use crate::executor::CommandSpec;
use crate::mount::current_ids;
use crate::volume::{BackendKind, VolumeConfig, WebdavConfig};

/// WebDAV via `mount.davfs`.
pub struct Webdav;

impl Webdav {
    fn url(config: &WebdavConfig) -> String {
        let scheme = if config.ssl { "https" } else { "http" };
        let path = config.path.trim_start_matches('/');
        format!("{scheme}://{}:{}/{path}", config.server, config.port)
    }

    fn command(config: &WebdavConfig, path: &Path) -> CommandSpec {
        let (uid, gid) = current_ids();
        let mut options = vec![format!("uid={uid}"), format!("gid={gid}")];
        if config.read_only {
            options.push("ro".to_string());
        }

        CommandSpec::new("mount").args([
            "-t".to_string(),
            "davfs".to_string(),
            "-o".to_string(),
            options.join(","),
            Self::url(config),
            path.to_string_lossy().to_string(),
        ])
    }
}

#[async_trait]
impl Protocol for Webdav {
    type Config = WebdavConfig;

    const KIND: BackendKind = BackendKind::Webdav;
    const EXPECTED_FSTYPE: &'static str = "davfs";

    fn select(config: &VolumeConfig) -> Option<&WebdavConfig> {
        match config {
            VolumeConfig::Webdav(c) => Some(c),
            _ => None,
        }
    }

    // davfs2 registers as plain `fuse` when it runs on top of FUSE.
    fn accepts_fstype(fstype: &str) -> bool {
        fstype.contains("davfs") || fstype == "fuse"
    }

    async fn attach(config: &WebdavConfig, ctx: &BackendContext, path: &Path) -> Result<()> {
        // mount.davfs prompts for username then password on stdin.
        let username = config.username.clone().unwrap_or_default();
        let password = match config.password.as_deref() {
            Some(reference) => ctx.secrets().resolve(reference).await?,
            None => SecretString::from(""),
        };
        let payload = SecretString::from(format!("{username}\n{}\n", password.expose_secret()));

        let spec = Self::command(config, path).stdin(payload);
        info!(command = %spec.display(), "executing mount");
        ctx.invoker().run(&spec).await?.check("mount")?;
        Ok(())
    }
}
