//! Server process lifecycle management.
//!
//! Handles spawning MCP server child processes, watching them for exit and
//! terminating them (graceful first, forced after a grace window). Each server
//! runs as a separate OS process communicating via JSON-RPC over stdio.
//!
//! The graceful stop is closing the server's stdin, the end-of-session signal
//! every stdio MCP server already honours; no SIGTERM is sent. Servers that
//! ignore the EOF are killed once [`SHUTDOWN_GRACE`] runs out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use super::errors::McpError;
use crate::config::placeholders::resolve_env_map;
use crate::config::ServerConfig;

// ─── Constants ───────────────────────────────────────────────────────────────

/// How long a freshly spawned process must survive before the handshake starts.
pub const STARTUP_GRACE: Duration = Duration::from_millis(100);

/// Timeout for graceful shutdown before force-killing.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Longest stderr line forwarded to the log.
const MAX_STDERR_LINE: usize = 2000;

// ─── Spawning ────────────────────────────────────────────────────────────────

/// A freshly spawned server with its three pipes.
pub struct SpawnedProcess {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: Option<ChildStderr>,
}

/// Spawn a server process with piped stdio.
///
/// Environment placeholders are resolved here, against the environment as it
/// is at spawn time.
pub fn spawn_process(name: &str, config: &ServerConfig) -> Result<SpawnedProcess, McpError> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);

    for (key, value) in resolve_env_map(&config.env) {
        cmd.env(key, value);
    }

    if let Some(dir) = config.cwd.as_deref() {
        cmd.current_dir(dir);
    }

    // Windows: prevent console window from appearing for child processes
    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    // Wire stdio for JSON-RPC
    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
        name: name.to_string(),
        reason: format!("{e}"),
    })?;

    let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdin".into(),
    })?;

    let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
        name: name.to_string(),
        reason: "failed to capture stdout".into(),
    })?;

    let stderr = child.stderr.take();

    tracing::debug!(
        server = name,
        command = %config.command,
        pid = ?child.id(),
        "spawned server process"
    );

    Ok(SpawnedProcess {
        child,
        stdin,
        stdout,
        stderr,
    })
}

/// Forward a server's stderr to the log, one line at a time.
///
/// Stderr is diagnostics only and never parsed as protocol data.
pub fn log_stderr(name: &str, stderr: ChildStderr) -> JoinHandle<()> {
    let name = name.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(mut line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if line.len() > MAX_STDERR_LINE {
                        let mut cut = MAX_STDERR_LINE;
                        while !line.is_char_boundary(cut) {
                            cut -= 1;
                        }
                        line.truncate(cut);
                        line.push_str("...(truncated)");
                    }
                    tracing::debug!(server = %name, stderr = %line, "server stderr");
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(server = %name, error = %e, "stopped reading server stderr");
                    break;
                }
            }
        }
    })
}

// ─── Exit Watching ───────────────────────────────────────────────────────────

/// How a server process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }

    /// Anything but a clean exit with code 0.
    pub fn is_failure(&self) -> bool {
        self.code != Some(0)
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

/// Owns a running child through a watcher task.
///
/// The watcher waits for the process to exit and reports it once through the
/// `on_exit` callback. Dropping the handle kills the process.
pub struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    exit_rx: watch::Receiver<Option<ExitInfo>>,
    killed: AtomicBool,
}

impl ProcessHandle {
    /// Start watching `child`.
    pub fn watch<F>(name: &str, mut child: Child, on_exit: F) -> Self
    where
        F: FnOnce(ExitInfo) + Send + 'static,
    {
        let pid = child.id();
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(None);
        let name = name.to_string();

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                // Fires on an explicit kill and when the handle is dropped.
                _ = &mut kill_rx => {
                    if let Err(e) = child.start_kill() {
                        tracing::warn!(server = %name, error = %e, "failed to kill server process");
                    }
                    child.wait().await
                }
            };

            let exit = match status {
                Ok(status) => ExitInfo::from_status(status),
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "failed to wait for server process");
                    ExitInfo {
                        code: None,
                        signal: None,
                    }
                }
            };
            tracing::debug!(server = %name, exit = %exit, "server process exited");
            let _ = exit_tx.send(Some(exit));
            on_exit(exit);
        });

        Self {
            pid,
            kill_tx: Mutex::new(Some(kill_tx)),
            exit_rx,
            killed: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    pub fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit_rx.borrow()
    }

    /// Whether a forced kill was requested.
    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    /// Request a forced kill. Idempotent.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::Release);
        let tx = self
            .kill_tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
    }

    /// Wait up to `timeout` for the process to exit.
    pub async fn wait_exit(&self, timeout: Duration) -> Option<ExitInfo> {
        let mut rx = self.exit_rx.clone();
        let exit = match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(exit)) => *exit,
            _ => None,
        };
        exit
    }

    /// Wait `grace` for a voluntary exit, then kill and wait again.
    pub async fn terminate(&self, name: &str, grace: Duration) -> Option<ExitInfo> {
        if let Some(exit) = self.wait_exit(grace).await {
            return Some(exit);
        }
        tracing::warn!(
            server = name,
            grace_ms = grace.as_millis() as u64,
            "server did not exit after stdin closed, killing"
        );
        self.kill();
        self.wait_exit(grace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_info_display() {
        let clean = ExitInfo {
            code: Some(0),
            signal: None,
        };
        assert_eq!(clean.to_string(), "exit code 0");
        assert!(!clean.is_failure());

        let killed = ExitInfo {
            code: None,
            signal: Some(9),
        };
        assert_eq!(killed.to_string(), "signal 9");
        assert!(killed.is_failure());
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let config = ServerConfig::new("/nonexistent/mcp-fleet-test-binary", vec![]);
        let err = spawn_process("ghost", &config).err().unwrap();
        assert!(matches!(err, McpError::SpawnFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_watch_reports_exit_code() {
        let config = ServerConfig::new("sh", vec!["-c".into(), "exit 3".into()]);
        let spawned = spawn_process("sh", &config).unwrap();
        let (tx, rx) = oneshot::channel();
        let handle = ProcessHandle::watch("sh", spawned.child, move |exit| {
            let _ = tx.send(exit);
        });

        let exit = handle.wait_exit(Duration::from_secs(5)).await.unwrap();
        assert_eq!(exit.code, Some(3));
        assert_eq!(rx.await.unwrap(), exit);
        assert!(handle.has_exited());
        assert!(!handle.is_killed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wait_exit_returns_none_while_running() {
        let config = ServerConfig::new("sleep", vec!["30".into()]);
        let spawned = spawn_process("sleep", &config).unwrap();
        let handle = ProcessHandle::watch("sleep", spawned.child, |_| {});

        assert_eq!(handle.wait_exit(Duration::from_millis(20)).await, None);
        assert!(!handle.has_exited());
        handle.kill();
        assert!(handle.wait_exit(Duration::from_secs(5)).await.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_kills_stubborn_process() {
        let config = ServerConfig::new("sleep", vec!["30".into()]);
        let spawned = spawn_process("sleep", &config).unwrap();
        let handle = ProcessHandle::watch("sleep", spawned.child, |_| {});

        let exit = handle
            .terminate("sleep", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(exit.is_failure());
        assert!(handle.is_killed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_placeholders_resolved_at_spawn() {
        std::env::set_var("__MCP_FLEET_SPAWN_TEST__", "resolved");
        let mut config = ServerConfig::new(
            "sh",
            vec!["-c".into(), "test \"$GREETING\" = resolved".into()],
        );
        config
            .env
            .insert("GREETING".into(), "${__MCP_FLEET_SPAWN_TEST__}".into());

        let spawned = spawn_process("sh", &config).unwrap();
        let handle = ProcessHandle::watch("sh", spawned.child, |_| {});
        let exit = handle.wait_exit(Duration::from_secs(5)).await.unwrap();
        assert_eq!(exit.code, Some(0));
        std::env::remove_var("__MCP_FLEET_SPAWN_TEST__");
    }
}
