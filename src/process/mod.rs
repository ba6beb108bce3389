//! OS process facility.
//!
//! The supervisor talks to the operating system through [`ProcessHost`] so
//! tests can script child lifecycles without spawning anything. The
//! production implementation wraps `tokio::process` and owns the plumbing
//! tasks for each child: a stdout line pump, a stderr log pump, and a
//! waiter that reports the exit code exactly once.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

/// How to start one child process.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Short name used in log lines ("agent", "bridge").
    pub name: &'static str,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// Written to the child's stdin, which is then closed. `None` gives
    /// the child a null stdin.
    pub stdin_payload: Option<String>,
}

/// A launched child. The host keeps pumping stdout/stderr and waiting in
/// the background; dropping this handle does not kill the process.
#[derive(Debug)]
pub struct SpawnedChild {
    pub pid: u32,
    /// One line of stdout per message, without the trailing newline.
    pub stdout: mpsc::Receiver<String>,
    /// Resolves once with the exit code (`-1` when terminated by signal).
    pub exit: oneshot::Receiver<i32>,
}

/// Signal to deliver when stopping a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Graceful shutdown request (SIGTERM).
    Term,
    /// Forceful kill (SIGKILL).
    Kill,
}

/// Abstraction over the OS primitives the supervisor needs.
#[async_trait]
pub trait ProcessHost: Send + Sync {
    /// Spawn a child per the spec. Errors map to launch failures upstream.
    async fn spawn(&self, spec: CommandSpec) -> Result<SpawnedChild, std::io::Error>;

    /// Deliver a stop signal to a pid. Best-effort: a dead pid is not an
    /// error.
    fn signal(&self, pid: u32, signal: StopSignal);

    /// Kill any process whose command line matches `pattern`. Best-effort
    /// cleanup of orphans from a prior unclean shutdown.
    async fn kill_matching(&self, pattern: &str);

    /// Kill whatever is holding `port`. Best-effort; used before a crash
    /// restart so the relaunched agent can bind.
    async fn kill_port(&self, port: u16);
}

/// Production host backed by `tokio::process`, `pkill` and `fuser`.
#[derive(Debug, Default)]
pub struct LocalProcessHost;

#[async_trait]
impl ProcessHost for LocalProcessHost {
    async fn spawn(&self, spec: CommandSpec) -> Result<SpawnedChild, std::io::Error> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().cloned())
            .stdin(if spec.stdin_payload.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn()?;
        let pid = child.id().unwrap_or_default();
        tracing::debug!(process = spec.name, pid, program = %spec.program, "spawned child");

        if let Some(payload) = spec.stdin_payload {
            if let Some(mut stdin) = child.stdin.take() {
                tokio::spawn(async move {
                    if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                        tracing::debug!(error = %e, "failed to write child stdin payload");
                    }
                    // Dropping stdin here sends EOF.
                });
            }
        }

        let (stdout_tx, stdout_rx) = mpsc::channel(256);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if stdout_tx.send(line).await.is_err() {
                        break;
                    }
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            let name = spec.name;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(target: "apiary::process", process = name, pid, "{line}");
                }
            });
        }

        let (exit_tx, exit_rx) = oneshot::channel();
        let name = spec.name;
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(-1),
                Err(e) => {
                    tracing::warn!(process = name, pid, error = %e, "failed to await child");
                    -1
                }
            };
            let _ = exit_tx.send(code);
        });

        Ok(SpawnedChild {
            pid,
            stdout: stdout_rx,
            exit: exit_rx,
        })
    }

    fn signal(&self, pid: u32, signal: StopSignal) {
        let sig = match signal {
            StopSignal::Term => Signal::SIGTERM,
            StopSignal::Kill => Signal::SIGKILL,
        };
        if let Err(e) = kill(Pid::from_raw(pid as i32), sig) {
            tracing::debug!(pid, signal = ?sig, error = %e, "signal delivery failed");
        }
    }

    async fn kill_matching(&self, pattern: &str) {
        match Command::new("pkill").arg("-f").arg(pattern).status().await {
            Ok(status) => {
                tracing::debug!(pattern, code = status.code(), "pkill finished");
            }
            Err(e) => tracing::debug!(pattern, error = %e, "pkill unavailable"),
        }
    }

    async fn kill_port(&self, port: u16) {
        match Command::new("fuser")
            .arg("-k")
            .arg(format!("{port}/tcp"))
            .status()
            .await
        {
            Ok(status) => {
                tracing::debug!(port, code = status.code(), "fuser finished");
            }
            Err(e) => tracing::debug!(port, error = %e, "fuser unavailable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec {
            name: "agent",
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: Vec::new(),
            cwd: None,
            stdin_payload: None,
        }
    }

    #[tokio::test]
    async fn spawn_streams_stdout_and_exit_code() {
        let host = LocalProcessHost;
        let mut child = host.spawn(sh("echo one; echo two; exit 3")).await.unwrap();

        let mut lines = Vec::new();
        while let Some(line) = child.stdout.recv().await {
            lines.push(line);
        }
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(child.exit.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn spawn_writes_stdin_payload() {
        let host = LocalProcessHost;
        let mut spec = sh("cat");
        spec.stdin_payload = Some("hello stdin".to_string());
        let mut child = host.spawn(spec).await.unwrap();

        assert_eq!(child.stdout.recv().await.as_deref(), Some("hello stdin"));
        assert_eq!(child.exit.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn term_signal_stops_child() {
        let host = LocalProcessHost;
        let child = host.spawn(sh("sleep 30")).await.unwrap();

        host.signal(child.pid, StopSignal::Term);
        // Signal-terminated children report -1 rather than an exit code.
        assert_eq!(child.exit.await.unwrap(), -1);
    }

    #[tokio::test]
    async fn spawn_missing_program_errors() {
        let host = LocalProcessHost;
        let spec = CommandSpec {
            name: "agent",
            program: "/no/such/binary".to_string(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            stdin_payload: None,
        };
        assert!(host.spawn(spec).await.is_err());
    }
}
