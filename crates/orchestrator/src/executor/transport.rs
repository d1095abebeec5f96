//! How a script reaches an instance's shell.

use std::path::PathBuf;
use std::time::Duration;

use provision_core::InstanceRef;
use tokio::process::Command;

use crate::error::ExecError;
use crate::scripts::shell_quote;

/// Where and as whom a script runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub instance: InstanceRef,
    pub host: String,
    pub port: u16,
    pub login: String,
}

impl RemoteTarget {
    pub fn new(instance: InstanceRef, host: impl Into<String>, port: u16, login: impl Into<String>) -> Self {
        Self {
            instance,
            host: host.into(),
            port,
            login: login.into(),
        }
    }
}

/// Builds the local process that carries a script to the target shell.
///
/// The runner spawns the command in its own process group with piped
/// stdin/stdout/stderr and keeps stdin open for the lifetime of the run.
pub trait ShellTransport: Send + Sync {
    fn name(&self) -> &'static str;

    fn command(&self, target: &RemoteTarget, script: &str) -> Command;

    /// Map a transport-level failure to an error. `None` means the exit
    /// code belongs to the script itself.
    fn classify_failure(
        &self,
        _target: &RemoteTarget,
        _exit_code: i32,
        _stdout: &str,
        _stderr: &str,
    ) -> Option<ExecError> {
        None
    }
}

/// OpenSSH client transport.
#[derive(Debug, Clone)]
pub struct SshTransport {
    pub program: String,
    pub private_key: Option<PathBuf>,
    /// Value for `StrictHostKeyChecking`.
    pub known_hosts: String,
    pub connect_timeout: Duration,
    pub extra_args: Vec<String>,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            private_key: None,
            known_hosts: "accept-new".to_string(),
            connect_timeout: Duration::from_secs(10),
            extra_args: Vec::new(),
        }
    }
}

/// ssh's own exit status for connection and authentication failures.
const SSH_FAILURE_EXIT: i32 = 255;

impl SshTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_private_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key = Some(path.into());
        self
    }

    pub fn with_known_hosts(mut self, policy: impl Into<String>) -> Self {
        self.known_hosts = policy.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Remote command line. The script runs in its own session; a watchdog
    /// reading the channel's stdin kills that session when the connection
    /// goes away, so killing the local client also stops the remote work.
    pub fn remote_command(script: &str) -> String {
        format!(
            "setsid bash -c {} </dev/null & pid=$!; \
             (cat >/dev/null; kill -TERM -- -$pid 2>/dev/null; sleep 2; kill -KILL -- -$pid 2>/dev/null) >/dev/null 2>&1 & watch=$!; \
             wait $pid; rc=$?; kill $watch 2>/dev/null; exit $rc",
            shell_quote(script)
        )
    }
}

impl ShellTransport for SshTransport {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn command(&self, target: &RemoteTarget, script: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-p")
            .arg(target.port.to_string())
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)))
            .arg("-o")
            .arg(format!("StrictHostKeyChecking={}", self.known_hosts))
            .arg("-o")
            .arg("ServerAliveInterval=15");
        if let Some(ref key) = self.private_key {
            cmd.arg("-i").arg(key).arg("-o").arg("IdentitiesOnly=yes");
        }
        cmd.args(&self.extra_args)
            .arg(format!("{}@{}", target.login, target.host))
            .arg("--")
            .arg(Self::remote_command(script));
        cmd
    }

    fn classify_failure(
        &self,
        target: &RemoteTarget,
        exit_code: i32,
        stdout: &str,
        stderr: &str,
    ) -> Option<ExecError> {
        if exit_code != SSH_FAILURE_EXIT || !stdout.is_empty() {
            return None;
        }
        let detail = stderr.trim().to_string();
        if stderr.contains("Permission denied") || stderr.contains("publickey") {
            Some(ExecError::Auth(detail))
        } else if stderr.contains("Could not resolve hostname") || stderr.contains("No route to host") {
            Some(ExecError::InstanceNotFound(format!("{} ({})", target.instance, detail)))
        } else if stderr.contains("Connection refused")
            || stderr.contains("Connection reset")
            || stderr.contains("timed out")
            || stderr.contains("Connection closed")
        {
            Some(ExecError::Transport(detail))
        } else {
            None
        }
    }
}

/// Runs scripts with the local `sh`. Used for development and tests.
#[derive(Debug, Clone)]
pub struct LocalShellTransport {
    pub shell: String,
}

impl Default for LocalShellTransport {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }
}

impl ShellTransport for LocalShellTransport {
    fn name(&self) -> &'static str {
        "local"
    }

    fn command(&self, _target: &RemoteTarget, script: &str) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(script);
        cmd
    }
}
