//! Helper-process execution with privilege escalation support.
//!
//! Backends never spawn processes directly. They describe the invocation as a
//! [`CommandSpec`] and hand it to a [`ProcessInvoker`], which lets tests swap
//! in a recording double and lets operators wrap mount helpers in `sudo`.

use std::process::Stdio;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, IoResultExt, Result};
use crate::sanitize::sanitize_sensitive_data;

/// Privilege escalation method for executing commands that require root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivilegeEscalation {
    /// Execute directly without privilege escalation.
    #[default]
    None,
    /// Use non-interactive `sudo -n`.
    Sudo,
}

/// A single helper invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Payload written to the child's stdin, then closed.
    pub stdin: Option<SecretString>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, payload: SecretString) -> Self {
        self.stdin = Some(payload);
        self
    }

    /// Command line suitable for logs, with secrets redacted.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        sanitize_sensitive_data(&line)
    }
}

/// Captured result of a finished helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Converts a non-zero exit into [`Error::CommandExit`].
    ///
    /// The message is stderr, falling back to stdout, then a generic text.
    pub fn check(self, command: &str) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }

        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        let message = if !stderr.is_empty() {
            stderr
        } else if !stdout.is_empty() {
            stdout
        } else {
            "unknown error"
        };

        Err(Error::CommandExit {
            command: command.to_string(),
            code: self.code,
            message: sanitize_sensitive_data(message),
        })
    }
}

/// Runs external helper commands.
#[async_trait]
pub trait ProcessInvoker: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Execution context for running system commands.
///
/// Holds the configuration for how commands should be executed, particularly
/// whether they need privilege escalation and whether a child is killed when
/// the caller stops waiting for it.
///
/// # Example
///
/// ```
/// use volume_engine_core::executor::{PrivilegeEscalation, SystemInvoker};
///
/// // Default: no privilege escalation
/// let invoker = SystemInvoker::default();
///
/// // For service deployments that run unprivileged
/// let sudo = SystemInvoker::with_escalation(PrivilegeEscalation::Sudo);
/// assert_eq!(sudo.escalation(), PrivilegeEscalation::Sudo);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SystemInvoker {
    escalation: PrivilegeEscalation,
    kill_on_timeout: bool,
}

impl SystemInvoker {
    /// Creates an invoker with no privilege escalation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an invoker with a specific escalation method.
    pub fn with_escalation(escalation: PrivilegeEscalation) -> Self {
        Self {
            escalation,
            ..Self::default()
        }
    }

    /// Kills the child when the future driving it is dropped (e.g. on timeout).
    pub fn kill_on_timeout(mut self, kill: bool) -> Self {
        self.kill_on_timeout = kill;
        self
    }

    /// Returns the current privilege escalation method.
    pub fn escalation(&self) -> PrivilegeEscalation {
        self.escalation
    }

    fn build_command(&self, spec: &CommandSpec) -> Command {
        let mut cmd = match self.escalation {
            PrivilegeEscalation::None => {
                let mut cmd = Command::new(&spec.program);
                cmd.args(&spec.args);
                cmd
            }
            PrivilegeEscalation::Sudo => {
                let mut cmd = Command::new("sudo");
                cmd.arg("-n").arg(&spec.program).args(&spec.args);
                cmd
            }
        };

        cmd.stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(self.kill_on_timeout);

        cmd
    }
}

#[async_trait]
impl ProcessInvoker for SystemInvoker {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %spec.display(), "executing helper");

        let mut child = self
            .build_command(spec)
            .spawn()
            .command_context(&spec.program)?;

        if let Some(payload) = &spec.stdin
            && let Some(mut stdin) = child.stdin.take()
        {
            match stdin.write_all(payload.expose_secret().as_bytes()).await {
                Ok(()) => {}
                // The helper exited or closed stdin early; its exit status and
                // stderr say why.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!(command = %spec.program, "helper closed stdin before reading it");
                }
                Err(e) => return Err(e).command_context(&spec.program),
            }
            // Dropping stdin closes the pipe so the helper sees EOF.
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .command_context(&spec.program)?;

        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
