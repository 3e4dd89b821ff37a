//! Mount point housekeeping shared by every backend.
//!
//! This module handles creating and removing mount point directories and
//! running the platform unmount helper.

use std::path::Path;

use tracing::{debug, warn};

use crate::error::{IoResultExt, Result};
use crate::executor::{CommandSpec, ProcessInvoker};

/// Creates a mount point directory if it doesn't exist.
pub async fn create_mount_point(path: &Path) -> Result<()> {
    if tokio::fs::metadata(path).await.is_err() {
        tokio::fs::create_dir_all(path)
            .await
            .mount_point_context(path)?;
    }
    Ok(())
}

/// Removes an empty mount point directory after unmount.
///
/// Best effort: a leftover directory is harmless, so failures are only logged.
pub async fn remove_mount_point(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir(path).await {
        debug!(path = %path.display(), error = %e, "mount point directory left in place");
    }
}

/// Unmounts whatever is mounted at `path`.
///
/// Falls back to a lazy unmount (`umount -l`) once when the regular unmount
/// fails, which detaches mounts whose server has gone away.
pub async fn unmount_path(invoker: &dyn ProcessInvoker, path: &Path) -> Result<()> {
    let target = path.to_string_lossy().to_string();

    let output = invoker
        .run(&CommandSpec::new("umount").arg(&target))
        .await?;
    if output.success() {
        return Ok(());
    }

    warn!(
        path = %path.display(),
        stderr = %output.stderr.trim(),
        "umount failed, retrying with lazy unmount"
    );
    invoker
        .run(&CommandSpec::new("umount").args(["-l", target.as_str()]))
        .await?
        .check("umount")?;
    Ok(())
}

/// UID and GID of the current process, used to map remote file ownership.
pub fn current_ids() -> (u32, u32) {
    (
        nix::unistd::getuid().as_raw(),
        nix::unistd::getgid().as_raw(),
    )
}
