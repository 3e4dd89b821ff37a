//! OS mount table inspection.
//!
//! The mount table is the single source of truth for whether a volume is
//! mounted. It is re-read on every query so concurrent external changes (an
//! operator running `umount`, a container restart) are always observed.
//!
//! Only *exact* mount points match: a path that merely lives underneath a
//! mount point is reported as not mounted. Unmounting such a path would act
//! on the parent filesystem instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Error, IoResultExt, Result};
use crate::executor::{CommandSpec, ProcessInvoker};

/// Default location of the per-process mount table on Linux.
pub const PROC_MOUNTINFO: &str = "/proc/self/mountinfo";

/// A mount observed in the OS mount table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountTableEntry {
    pub mount_point: PathBuf,
    pub fstype: String,
}

/// Looks up mounts in the OS mount table.
#[async_trait]
pub trait MountInspector: Send + Sync {
    /// Returns the mount whose mount point is exactly `path`, if any.
    async fn mount_for_path(&self, path: &Path) -> Result<Option<MountTableEntry>>;
}

/// Inspector backed by `/proc/self/mountinfo`, falling back to `mount` output
/// on hosts without procfs.
///
/// The fallback runs through the same [`ProcessInvoker`] as the backends, so
/// it honours the configured privilege escalation.
#[derive(Clone)]
pub struct ProcMountInspector {
    mountinfo: PathBuf,
    invoker: Arc<dyn ProcessInvoker>,
}

impl ProcMountInspector {
    pub fn new(invoker: Arc<dyn ProcessInvoker>) -> Self {
        Self {
            mountinfo: PathBuf::from(PROC_MOUNTINFO),
            invoker,
        }
    }

    /// Reads a mountinfo-formatted file other than the live one.
    pub fn with_mountinfo_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.mountinfo = path.into();
        self
    }

    async fn read_entries(&self) -> Result<Vec<MountTableEntry>> {
        match tokio::fs::read_to_string(&self.mountinfo).await {
            Ok(content) => parse_mountinfo(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !cfg!(target_os = "linux") => {
                let output = self
                    .invoker
                    .run(&CommandSpec::new("mount"))
                    .await?
                    .check("mount")?;
                Ok(parse_mount_output(&output.stdout))
            }
            Err(e) => Err(e).mount_table_context(&self.mountinfo),
        }
    }
}

impl std::fmt::Debug for ProcMountInspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcMountInspector")
            .field("mountinfo", &self.mountinfo)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MountInspector for ProcMountInspector {
    async fn mount_for_path(&self, path: &Path) -> Result<Option<MountTableEntry>> {
        let entries = self.read_entries().await?;
        Ok(find_exact(&entries, path))
    }
}

/// Returns the topmost entry mounted exactly at `path`.
///
/// Later entries shadow earlier ones on the same mount point.
pub fn find_exact(entries: &[MountTableEntry], path: &Path) -> Option<MountTableEntry> {
    entries
        .iter()
        .rev()
        .find(|entry| entry.mount_point == path)
        .cloned()
}

/// Parses `/proc/<pid>/mountinfo` content.
///
/// Line format (see proc(5)):
/// `36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 - ext3 /dev/root rw,errors=continue`
pub fn parse_mountinfo(content: &str) -> Result<Vec<MountTableEntry>> {
    let mut entries = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((pre, post)) = line.split_once(" - ") else {
            return Err(Error::MountTableParse {
                message: format!("missing separator in line: {line}"),
            });
        };

        let mount_point = pre.split_whitespace().nth(4).ok_or_else(|| Error::MountTableParse {
            message: format!("missing mount point in line: {line}"),
        })?;
        let fstype = post.split_whitespace().next().ok_or_else(|| Error::MountTableParse {
            message: format!("missing filesystem type in line: {line}"),
        })?;

        entries.push(MountTableEntry {
            mount_point: PathBuf::from(unescape_octal(mount_point)),
            fstype: fstype.to_string(),
        });
    }

    Ok(entries)
}

/// Parses BSD/macOS `mount` output: `<source> on <path> (<fstype>, <opts>)`.
pub fn parse_mount_output(content: &str) -> Vec<MountTableEntry> {
    content
        .lines()
        .filter_map(|line| {
            let (_, rest) = line.split_once(" on ")?;
            let (mount_point, tail) = rest.rsplit_once(" (")?;
            let fstype = tail
                .trim_end_matches(')')
                .split(',')
                .next()?
                .trim()
                .to_string();
            Some(MountTableEntry {
                mount_point: PathBuf::from(mount_point),
                fstype,
            })
        })
        .collect()
}

/// Decodes the `\NNN` octal escapes the kernel uses for spaces, tabs,
/// newlines and backslashes in mount paths.
fn unescape_octal(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..=i + 3].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = (bytes[i + 1] - b'0') as u32 * 64
                + (bytes[i + 2] - b'0') as u32 * 8
                + (bytes[i + 3] - b'0') as u32;
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SystemInvoker;
    use crate::testing::FakeSystem;
    use std::io::Write;

    const SAMPLE: &str = "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
40 22 0:35 / /var/lib/ve/volumes/nas/_data rw,relatime shared:20 - cifs //nas/share rw,vers=3.0
41 22 0:36 / /var/lib/ve/volumes/cloud/_data rw,nosuid shared:21 - fuse.rclone gdrive: rw,user_id=0
42 22 0:37 / /mnt/with\\040space rw shared:22 - nfs4 10.0.0.2:/srv rw,vers=4.1
";

    #[test]
    fn test_parse_mountinfo() {
        let entries = parse_mountinfo(SAMPLE).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[1].fstype, "cifs");
        assert_eq!(
            entries[1].mount_point,
            PathBuf::from("/var/lib/ve/volumes/nas/_data")
        );
        assert_eq!(entries[2].fstype, "fuse.rclone");
    }

    #[test]
    fn test_unescapes_spaces() {
        let entries = parse_mountinfo(SAMPLE).unwrap();
        assert_eq!(entries[3].mount_point, PathBuf::from("/mnt/with space"));
    }

    #[test]
    fn test_rejects_malformed_line() {
        assert!(parse_mountinfo("garbage line without separator").is_err());
    }

    #[test]
    fn test_find_exact_ignores_parent_mounts() {
        let entries = parse_mountinfo(SAMPLE).unwrap();
        assert!(find_exact(&entries, Path::new("/var/lib/ve/volumes/other/_data")).is_none());
        assert!(find_exact(&entries, Path::new("/var/lib/ve/volumes/nas/_data/sub")).is_none());
        let found = find_exact(&entries, Path::new("/var/lib/ve/volumes/nas/_data/")).unwrap();
        assert_eq!(found.fstype, "cifs");
    }

    #[test]
    fn test_find_exact_prefers_topmost() {
        let content = "\
40 22 0:35 / /mnt/a rw - ext4 /dev/sdb1 rw
50 40 0:40 / /mnt/a rw - cifs //nas/share rw
";
        let entries = parse_mountinfo(content).unwrap();
        assert_eq!(find_exact(&entries, Path::new("/mnt/a")).unwrap().fstype, "cifs");
    }

    #[test]
    fn test_parse_mount_output() {
        let content = "\
/dev/disk3s1s1 on / (apfs, sealed, local, read-only, journaled)
//alice@nas/share on /Volumes/share (smbfs, nodev, nosuid, mounted by alice)
";
        let entries = parse_mount_output(content);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].mount_point, PathBuf::from("/Volumes/share"));
        assert_eq!(entries[1].fstype, "smbfs");
    }

    #[tokio::test]
    async fn test_inspector_reads_file_each_time() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{SAMPLE}").unwrap();
        let inspector = ProcMountInspector::new(Arc::new(SystemInvoker::new()))
            .with_mountinfo_path(file.path());

        let entry = inspector
            .mount_for_path(Path::new("/var/lib/ve/volumes/cloud/_data"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.fstype, "fuse.rclone");

        std::fs::write(file.path(), "22 1 8:1 / / rw - ext4 /dev/sda1 rw\n").unwrap();
        let entry = inspector
            .mount_for_path(Path::new("/var/lib/ve/volumes/cloud/_data"))
            .await
            .unwrap();
        assert!(entry.is_none());
    }

    #[tokio::test]
    async fn test_missing_mount_table_uses_injected_invoker() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeSystem::new("cifs");
        let inspector = ProcMountInspector::new(fake.clone())
            .with_mountinfo_path(dir.path().join("no-mountinfo"));

        let result = inspector.mount_for_path(Path::new("/mnt/a")).await;
        if cfg!(target_os = "linux") {
            assert!(matches!(result, Err(Error::MountTableRead { .. })));
            assert!(fake.calls().is_empty());
        } else {
            assert!(result.unwrap().is_none());
            assert_eq!(fake.calls(), ["mount"]);
        }
    }
}
