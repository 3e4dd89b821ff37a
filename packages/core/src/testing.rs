//! In-memory doubles for the process invoker, mount table and secret store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::Notify;

use crate::backend::BackendContext;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::executor::{CommandOutput, CommandSpec, ProcessInvoker};
use crate::mountinfo::{MountInspector, MountTableEntry, find_exact};
use crate::platform::Platform;
use crate::secret::{DefaultSecretResolver, SecretResolver};
use crate::timeout::OPERATION_TIMEOUT;
use crate::volume::{
    BackendKind, LocalConfig, NfsConfig, RcloneConfig, SftpConfig, SmbConfig, VolumeConfig,
    WebdavConfig,
};

#[derive(Default)]
struct State {
    mounts: Vec<MountTableEntry>,
    calls: Vec<String>,
    failing_umounts: usize,
    failing_mounts: usize,
    mount_stderr: String,
    hang: bool,
    parked: Option<InspectionGate>,
}

/// Holds one mount table lookup open until the test releases it.
#[derive(Clone, Default)]
pub struct InspectionGate {
    /// Notified once the lookup has read the table and is waiting.
    pub reached: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// Records every helper invocation and keeps a fake mount table in sync
/// with them.
///
/// `umount` removes the entry for its last argument. Any other program is
/// treated as a mount helper and adds an entry, with this fake's fstype, for
/// the last argument naming an existing directory.
pub struct FakeSystem {
    fstype: String,
    state: Mutex<State>,
}

impl FakeSystem {
    pub fn new(fstype: &str) -> Arc<Self> {
        Arc::new(Self {
            fstype: fstype.to_string(),
            state: Mutex::new(State::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulates a mount made outside the engine.
    pub fn add_mount(&self, path: &Path, fstype: &str) {
        self.state().mounts.push(MountTableEntry {
            mount_point: path.to_path_buf(),
            fstype: fstype.to_string(),
        });
    }

    /// Simulates an operator unmounting behind the engine's back.
    pub fn drop_mount(&self, path: &Path) {
        self.state().mounts.retain(|m| m.mount_point != path);
    }

    /// Makes the next `n` `umount` invocations exit non-zero.
    pub fn fail_umounts(&self, n: usize) {
        self.state().failing_umounts = n;
    }

    /// Makes the next `n` mount helper invocations exit 32 with `stderr`.
    pub fn fail_mounts(&self, n: usize, stderr: &str) {
        let mut state = self.state();
        state.failing_mounts = n;
        state.mount_stderr = stderr.to_string();
    }

    /// Makes mount helpers never return.
    pub fn hang_helpers(&self, hang: bool) {
        self.state().hang = hang;
    }

    /// Parks the next mount table lookup on the returned gate.
    pub fn park_next_inspection(&self) -> InspectionGate {
        let gate = InspectionGate::default();
        self.state().parked = Some(gate.clone());
        gate
    }

    /// Sanitized command lines in invocation order.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn mount_calls(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| !c.starts_with("umount"))
            .count()
    }

    pub fn umount_calls(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with("umount"))
            .count()
    }

    fn exit(code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

#[async_trait]
impl ProcessInvoker for FakeSystem {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let hang = {
            let mut state = self.state();
            state.calls.push(spec.display());

            if spec.program == "umount" {
                if state.failing_umounts > 0 {
                    state.failing_umounts -= 1;
                    return Ok(Self::exit(32, "umount: target is busy."));
                }
                if let Some(target) = spec.args.last() {
                    let target = PathBuf::from(target);
                    state.mounts.retain(|m| m.mount_point != target);
                }
                return Ok(Self::exit(0, ""));
            }

            if !state.hang && state.failing_mounts > 0 {
                state.failing_mounts -= 1;
                return Ok(Self::exit(32, &state.mount_stderr));
            }
            if !state.hang
                && let Some(target) = spec.args.iter().rev().find(|a| Path::new(a).is_dir())
            {
                state.mounts.push(MountTableEntry {
                    mount_point: PathBuf::from(target),
                    fstype: self.fstype.clone(),
                });
            }
            state.hang
        };

        if hang {
            std::future::pending::<()>().await;
        }
        Ok(Self::exit(0, ""))
    }
}

#[async_trait]
impl MountInspector for FakeSystem {
    async fn mount_for_path(&self, path: &Path) -> Result<Option<MountTableEntry>> {
        let (entry, parked) = {
            let mut state = self.state();
            (find_exact(&state.mounts, path), state.parked.take())
        };
        if let Some(gate) = parked {
            gate.reached.notify_one();
            gate.release.notified().await;
        }
        Ok(entry)
    }
}

/// Resolves only the references it was seeded with.
#[derive(Debug, Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn with(mut self, reference: &str, value: &str) -> Self {
        self.values.insert(reference.to_string(), value.to_string());
        self
    }
}

#[async_trait]
impl SecretResolver for StaticSecrets {
    async fn resolve(&self, reference: &str) -> Result<SecretString> {
        self.values
            .get(reference)
            .map(|v| SecretString::from(v.clone()))
            .ok_or_else(|| Error::SecretResolution {
                reference: reference.to_string(),
                message: "unknown reference".to_string(),
            })
    }
}

/// Context wired to `fake`, with volumes and credentials under `base`.
pub fn context(fake: &Arc<FakeSystem>, base: &Path, platform: Platform) -> Arc<BackendContext> {
    context_with_secrets(fake, base, platform, Arc::new(DefaultSecretResolver))
}

pub fn context_with_secrets(
    fake: &Arc<FakeSystem>,
    base: &Path,
    platform: Platform,
    secrets: Arc<dyn SecretResolver>,
) -> Arc<BackendContext> {
    let config = EngineConfig::new()
        .with_volumes_dir(base.join("volumes"))
        .with_credentials_dir(base.join("credentials"))
        .with_operation_timeout(OPERATION_TIMEOUT);
    Arc::new(
        BackendContext::new(config, fake.clone(), fake.clone(), secrets).with_platform(platform),
    )
}

/// A valid config for each backend kind. SFTP uses password auth and skips
/// host key checks so mounting writes no credential files.
pub fn config_for(kind: BackendKind) -> VolumeConfig {
    match kind {
        BackendKind::Local => VolumeConfig::Local(LocalConfig { read_only: false }),
        BackendKind::Nfs => VolumeConfig::Nfs(NfsConfig {
            server: "10.0.0.2".to_string(),
            export_path: "/srv/share".to_string(),
            port: 2049,
            version: Default::default(),
            read_only: false,
        }),
        BackendKind::Smb => VolumeConfig::Smb(SmbConfig {
            server: "nas.local".to_string(),
            share: "media".to_string(),
            username: "alice".to_string(),
            password: "s3cret".to_string(),
            vers: Default::default(),
            domain: None,
            port: 445,
            read_only: false,
        }),
        BackendKind::Sftp => VolumeConfig::Sftp(SftpConfig {
            host: "files.example.com".to_string(),
            port: 22,
            username: "deploy".to_string(),
            password: Some("hunter2".to_string()),
            private_key: None,
            path: "/".to_string(),
            skip_host_key_check: true,
            known_hosts: None,
            read_only: false,
        }),
        BackendKind::Webdav => VolumeConfig::Webdav(WebdavConfig {
            server: "dav.example.com".to_string(),
            path: "/".to_string(),
            username: Some("alice".to_string()),
            password: Some("pw".to_string()),
            port: 443,
            ssl: true,
            read_only: false,
        }),
        BackendKind::Rclone => VolumeConfig::Rclone(RcloneConfig {
            remote: "gdrive".to_string(),
            path: "/".to_string(),
            read_only: false,
        }),
    }
}
