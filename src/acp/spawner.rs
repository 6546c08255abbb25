//! ACP agent process spawner.
//!
//! Launches the agent executable with:
//! - `kill_on_drop(true)` so the process dies with its handle.
//! - `env_clear()` + a variable allowlist, plus the extras configured for
//!   the agent, so unrelated secrets never reach the child.
//! - stdin/stdout piped for the protocol stream; stderr forwarded line by
//!   line into `tracing` at `DEBUG`.
//!
//! Readiness is not probed here: the `initialize` handshake, bounded by the
//! startup timeout, is the readiness check.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

use crate::{AppError, Result};

/// Environment variables inherited by the spawned agent process.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "TERM",
    "SHELL",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// What to launch and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Agent executable.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Extra variables set on top of the allowlist.
    pub env: BTreeMap<String, String>,
    /// Directory the agent starts in.
    pub workspace_root: PathBuf,
}

/// A running agent with its protocol pipes detached.
///
/// Keep `child` alive for as long as the connection is in use.
#[derive(Debug)]
pub struct AgentProcess {
    /// Child process handle.
    pub child: Child,
    /// Agent's stdin: the client's outbound stream.
    pub stdin: ChildStdin,
    /// Agent's stdout: the client's inbound stream.
    pub stdout: ChildStdout,
}

/// Spawn the agent described by `config`.
///
/// # Errors
///
/// - `AppError::Acp("failed to spawn agent: …")`: OS spawn failure.
/// - `AppError::Acp("failed to capture agent …")`: a pipe was not created.
pub fn spawn_agent(config: &SpawnConfig) -> Result<AgentProcess> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);

    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    cmd.envs(&config.env);

    cmd.current_dir(&config.workspace_root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Acp(format!("failed to spawn agent: {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Acp("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Acp("failed to capture agent stdout".into()))?;
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_stderr(stderr));
    }

    info!(
        command = config.command.as_str(),
        pid = child.id(),
        workspace = %config.workspace_root.display(),
        "agent process spawned"
    );

    Ok(AgentProcess {
        child,
        stdin,
        stdout,
    })
}

/// Relay agent stderr into the log until the pipe closes.
async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(target: "agent_stderr", line = line.as_str(), "agent stderr"),
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "agent stderr unreadable, stopping relay");
                break;
            }
        }
    }
}
