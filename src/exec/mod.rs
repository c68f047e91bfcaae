use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Default per-command timeout. Dependency installs and builds can be slow,
/// so this is generous; callers with tighter needs pass their own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("command timed out after {timeout:?}: {command}")]
    Timeout { command: String, timeout: Duration },

    #[error("command failed (exit {code}): {command}\n{stderr}")]
    Failed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("failed to spawn command: {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Every external process the crate runs goes through here; nothing else
/// spawns commands directly.
#[derive(Debug, Default, Clone)]
pub struct Executor;

impl Executor {
    pub fn new() -> Self {
        Self
    }

    /// Run a shell command and return its trimmed stdout. Non-zero exit is
    /// an error carrying the captured stderr.
    pub async fn run(&self, command: &str) -> Result<String, ExecError> {
        self.run_with_timeout(command, DEFAULT_TIMEOUT).await
    }

    pub async fn run_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ExecError> {
        debug!("exec: {}", command);

        let child = shell(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Err(_) => {
                return Err(ExecError::Timeout {
                    command: command.to_string(),
                    timeout,
                })
            }
            Ok(Err(source)) => {
                return Err(ExecError::Spawn {
                    command: command.to_string(),
                    source,
                })
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !stdout.is_empty() {
            debug!("stdout: {}", stdout.trim_end());
        }
        if !stderr.is_empty() {
            debug!("stderr: {}", stderr.trim_end());
        }

        if !output.status.success() {
            return Err(ExecError::Failed {
                command: command.to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(stdout.trim().to_string())
    }

    /// Run a command where failure is acceptable: `Some(stdout)` on success,
    /// `None` on any failure. Mirrors `run(..., check=false)` semantics:
    /// the caller decides what a missing result means.
    pub async fn run_unchecked(&self, command: &str) -> Option<String> {
        match self.run(command).await {
            Ok(out) => Some(out),
            Err(err) => {
                debug!("unchecked command failed: {}", err);
                None
            }
        }
    }

    /// Run with privilege escalation (`sudo` prefix on Unix, as-is elsewhere).
    pub async fn run_privileged(&self, command: &str) -> Result<String, ExecError> {
        self.run(&privileged(command)).await
    }

    pub async fn run_privileged_unchecked(&self, command: &str) -> Option<String> {
        self.run_unchecked(&privileged(command)).await
    }

    /// Run with stdio inherited from the parent, for interactive output like
    /// `journalctl -f`. Returns once the child exits.
    pub async fn run_streaming(&self, command: &str) -> Result<(), ExecError> {
        debug!("exec (streaming): {}", command);

        let status = shell(command)
            .status()
            .await
            .map_err(|source| ExecError::Spawn {
                command: command.to_string(),
                source,
            })?;

        if !status.success() {
            return Err(ExecError::Failed {
                command: command.to_string(),
                code: status.code().unwrap_or(-1),
                stderr: String::new(),
            });
        }

        Ok(())
    }

    pub async fn run_privileged_streaming(&self, command: &str) -> Result<(), ExecError> {
        self.run_streaming(&privileged(command)).await
    }

    /// Check that a binary is resolvable on PATH.
    pub fn command_exists(&self, name: &str) -> bool {
        which::which(name).is_ok()
    }
}

fn shell(command: &str) -> Command {
    if cfg!(unix) {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }
}

fn privileged(command: &str) -> String {
    if cfg!(unix) {
        format!("sudo {}", command)
    } else {
        command.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_captures_stdout() {
        let out = Executor::new().run("echo hello").await.unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_failed_with_stderr() {
        let err = Executor::new()
            .run("echo oops >&2; exit 3")
            .await
            .unwrap_err();
        match err {
            ExecError::Failed { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "oops");
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn timeout_is_distinct_from_failure() {
        let err = Executor::new()
            .run_with_timeout("sleep 5", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
    }

    #[tokio::test]
    async fn unchecked_returns_none_on_failure() {
        let exec = Executor::new();
        assert_eq!(exec.run_unchecked("exit 1").await, None);
        assert_eq!(exec.run_unchecked("echo ok").await.as_deref(), Some("ok"));
    }

    #[test]
    fn command_exists_finds_shell() {
        assert!(Executor::new().command_exists("sh"));
        assert!(!Executor::new().command_exists("definitely-not-a-binary-xyz"));
    }
}
