//! Terminal registry: local processes spawned on the agent's behalf.
//!
//! `terminal/create` launches a process and hands back an opaque handle
//! (`term_1`, `term_2`, …). Per terminal the registry keeps:
//!
//! - one combined stdout+stderr buffer, appended in arrival order by two
//!   pump tasks;
//! - a [`watch`] slot for the exit status, written exactly once by the
//!   waiter task after the pumps have drained;
//! - a [`CancellationToken`] the waiter task listens on to kill the process.
//!
//! Every kill token is a child of one registry-wide token, so
//! [`TerminalRegistry::kill_all`] can stop all processes without awaiting.
//!
//! No operation holds the registry lock across an await on the process, so
//! a long `wait_for_exit` never blocks `output` or `kill` for other callers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::schema::{
    CreateTerminalParams, CreateTerminalResponse, TerminalExitStatus, TerminalOutputResponse,
};
use crate::{AppError, Result};

/// Read size for the output pumps.
const READ_CHUNK_BYTES: usize = 8192;

/// How long the waiter gives the pumps to drain after the process exits.
/// Grandchildren holding the pipes open must not stall the exit status.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Append-only output capture with an optional trailing-bytes cap.
#[derive(Debug, Default)]
struct OutputBuffer {
    bytes: Vec<u8>,
    limit: Option<usize>,
    truncated: bool,
}

impl OutputBuffer {
    fn with_limit(limit: Option<usize>) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        let Some(limit) = self.limit else {
            return;
        };
        if self.bytes.len() <= limit {
            return;
        }

        let mut cut = self.bytes.len() - limit;
        // Never start the retained tail in the middle of a UTF-8 sequence.
        while cut < self.bytes.len() && is_utf8_continuation(self.bytes[cut]) {
            cut += 1;
        }
        self.bytes.drain(..cut);
        self.truncated = true;
    }

    /// Render as text. Until the output is `complete`, an incomplete
    /// multi-byte sequence at the very end is held back for the rest of it;
    /// afterwards it renders as U+FFFD.
    fn snapshot(&self, complete: bool) -> (String, bool) {
        let end = match std::str::from_utf8(&self.bytes) {
            Err(e) if !complete && e.error_len().is_none() => e.valid_up_to(),
            _ => self.bytes.len(),
        };
        (
            String::from_utf8_lossy(&self.bytes[..end]).into_owned(),
            self.truncated,
        )
    }
}

fn is_utf8_continuation(byte: u8) -> bool {
    byte & 0b1100_0000 == 0b1000_0000
}

/// One live (or exited but not yet released) terminal.
#[derive(Debug)]
struct Terminal {
    command: String,
    session_id: Option<String>,
    output: Arc<Mutex<OutputBuffer>>,
    exit: watch::Receiver<Option<TerminalExitStatus>>,
    kill: CancellationToken,
}

/// Registry of terminals addressable by handle.
///
/// Cheap to clone; clones share the same terminals.
#[derive(Debug, Clone)]
pub struct TerminalRegistry {
    next_id: Arc<AtomicU64>,
    terminals: Arc<Mutex<HashMap<String, Arc<Terminal>>>>,
    kill_root: CancellationToken,
    default_cwd: PathBuf,
    default_output_limit: Option<usize>,
}

impl TerminalRegistry {
    /// Registry whose terminals start in `default_cwd` unless told otherwise.
    #[must_use]
    pub fn new(default_cwd: PathBuf, default_output_limit: Option<usize>) -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            terminals: Arc::new(Mutex::new(HashMap::new())),
            kill_root: CancellationToken::new(),
            default_cwd,
            default_output_limit,
        }
    }

    /// Launch a process and start capturing its output.
    ///
    /// Returns as soon as the process has been spawned.
    ///
    /// # Errors
    ///
    /// - [`AppError::Acp`] if `command` is blank.
    /// - [`AppError::Io`] if the process cannot be spawned.
    pub async fn create(&self, params: CreateTerminalParams) -> Result<CreateTerminalResponse> {
        if params.command.trim().is_empty() {
            return Err(AppError::Acp("terminal command must not be empty".into()));
        }

        let cwd = params.cwd.clone().unwrap_or_else(|| self.default_cwd.clone());
        let mut cmd = Command::new(&params.command);
        cmd.args(&params.args)
            .envs(params.env.iter().map(|var| (&var.name, &var.value)))
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            AppError::Io(format!("failed to spawn `{}`: {err}", params.command))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Io("failed to capture terminal stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Io("failed to capture terminal stderr".into()))?;

        let terminal_id = format!("term_{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let limit = params.output_byte_limit.or(self.default_output_limit);
        let output = Arc::new(Mutex::new(OutputBuffer::with_limit(limit)));
        let pumps = vec![
            tokio::spawn(pump(stdout, Arc::clone(&output))),
            tokio::spawn(pump(stderr, Arc::clone(&output))),
        ];

        let (exit_tx, exit_rx) = watch::channel(None);
        let kill = self.kill_root.child_token();
        let waiter_kill = kill.clone();
        let waiter_id = terminal_id.clone();
        tokio::spawn(async move {
            let waited = tokio::select! {
                status = child.wait() => Some(status),
                () = waiter_kill.cancelled() => None,
            };
            let status = match waited {
                Some(status) => status,
                None => {
                    debug!(terminal_id = waiter_id.as_str(), "terminal: killing process");
                    if let Err(err) = child.start_kill() {
                        warn!(terminal_id = waiter_id.as_str(), %err, "terminal: kill failed");
                    }
                    child.wait().await
                }
            };

            let exit = match status {
                Ok(status) => exit_status(status),
                Err(err) => {
                    warn!(terminal_id = waiter_id.as_str(), %err, "terminal: wait failed");
                    TerminalExitStatus::default()
                }
            };

            let drained = tokio::time::timeout(OUTPUT_DRAIN_GRACE, async {
                for handle in pumps {
                    let _ = handle.await;
                }
            })
            .await;
            if drained.is_err() {
                debug!(
                    terminal_id = waiter_id.as_str(),
                    "terminal: output pipes still open after exit"
                );
            }

            info!(
                terminal_id = waiter_id.as_str(),
                exit_code = ?exit.exit_code,
                signal = ?exit.signal,
                "terminal: process exited"
            );
            exit_tx.send_replace(Some(exit));
        });

        info!(
            terminal_id = terminal_id.as_str(),
            session_id = ?params.session_id,
            command = params.command.as_str(),
            cwd = %cwd.display(),
            "terminal: created"
        );

        self.terminals.lock().await.insert(
            terminal_id.clone(),
            Arc::new(Terminal {
                command: params.command,
                session_id: params.session_id,
                output,
                exit: exit_rx,
                kill,
            }),
        );

        Ok(CreateTerminalResponse { terminal_id })
    }

    /// Output captured so far plus the exit status if the process ended.
    /// Never waits.
    ///
    /// # Errors
    ///
    /// [`AppError::NotFound`] for an unknown or released handle.
    pub async fn output(&self, terminal_id: &str) -> Result<TerminalOutputResponse> {
        let terminal = self.get(terminal_id).await?;
        // Status first: once it is set the buffer is final.
        let exit_status = terminal.exit.borrow().as_ref().cloned();
        let (output, truncated) = terminal
            .output
            .lock()
            .await
            .snapshot(exit_status.is_some());
        Ok(TerminalOutputResponse {
            output,
            truncated,
            exit_status,
        })
    }

    /// Wait until the process ends; immediate if it already has.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotFound`] for an unknown or released handle.
    /// - [`AppError::Io`] if the waiter task vanished without a status.
    pub async fn wait_for_exit(&self, terminal_id: &str) -> Result<TerminalExitStatus> {
        let mut exit = self.get(terminal_id).await?.exit.clone();
        let status = exit
            .wait_for(Option::is_some)
            .await
            .map_err(|_| AppError::Io(format!("terminal {terminal_id} lost its exit status")))?;
        Ok(status.as_ref().cloned().unwrap_or_default())
    }

    /// Kill the process if it is still running. Idempotent.
    ///
    /// # Errors
    ///
    /// [`AppError::NotFound`] for an unknown or released handle.
    pub async fn kill(&self, terminal_id: &str) -> Result<()> {
        let terminal = self.get(terminal_id).await?;
        if terminal.exit.borrow().is_none() {
            info!(terminal_id, command = terminal.command.as_str(), "terminal: kill requested");
        }
        terminal.kill.cancel();
        Ok(())
    }

    /// Kill if running, then forget the handle and its buffer.
    ///
    /// # Errors
    ///
    /// [`AppError::NotFound`] for an unknown or already released handle.
    pub async fn release(&self, terminal_id: &str) -> Result<()> {
        let terminal = self
            .terminals
            .lock()
            .await
            .remove(terminal_id)
            .ok_or_else(|| not_found(terminal_id))?;
        terminal.kill.cancel();
        debug!(
            terminal_id,
            session_id = ?terminal.session_id,
            "terminal: released"
        );
        Ok(())
    }

    /// Release every terminal. Used on explicit teardown only.
    pub async fn release_all(&self) -> usize {
        let drained: Vec<Arc<Terminal>> =
            self.terminals.lock().await.drain().map(|(_, t)| t).collect();
        for terminal in &drained {
            terminal.kill.cancel();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "terminal: released all terminals");
        }
        drained.len()
    }

    /// Kill every process, current and future, without forgetting the
    /// handles. Safe to call from `Drop`.
    pub fn kill_all(&self) {
        if !self.kill_root.is_cancelled() {
            debug!("terminal: killing all processes");
        }
        self.kill_root.cancel();
    }

    /// Handles currently registered, sorted.
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.terminals.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    async fn get(&self, terminal_id: &str) -> Result<Arc<Terminal>> {
        self.terminals
            .lock()
            .await
            .get(terminal_id)
            .cloned()
            .ok_or_else(|| not_found(terminal_id))
    }
}

fn not_found(terminal_id: &str) -> AppError {
    AppError::NotFound(format!("terminal not found: {terminal_id}"))
}

async fn pump<R>(mut reader: R, output: Arc<Mutex<OutputBuffer>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => output.lock().await.push(&buf[..n]),
            Err(err) => {
                warn!(%err, "terminal: output read failed");
                break;
            }
        }
    }
}

fn exit_status(status: ExitStatus) -> TerminalExitStatus {
    TerminalExitStatus {
        exit_code: status.code(),
        signal: exit_signal(status),
    }
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;

    status.signal().map(|sig| {
        match sig {
            1 => "SIGHUP",
            2 => "SIGINT",
            3 => "SIGQUIT",
            6 => "SIGABRT",
            9 => "SIGKILL",
            11 => "SIGSEGV",
            13 => "SIGPIPE",
            15 => "SIGTERM",
            other => return format!("SIG{other}"),
        }
        .to_owned()
    })
}

#[cfg(not(unix))]
fn exit_signal(_status: ExitStatus) -> Option<String> {
    None
}
