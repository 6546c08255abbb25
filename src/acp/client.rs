//! Session protocol client, the application's handle on one agent connection.
//!
//! One [`AcpClient`] owns one duplex stream. It plays both JSON-RPC roles:
//!
//! - **requester**: `initialize`, `session/new`, `session/load`,
//!   `session/prompt` and the `session/cancel` notification, correlated
//!   through the [`PendingCalls`] table;
//! - **responder**: `session/request_permission` (forwarded to the session
//!   subscriber and answered via [`AcpClient::resolve_permission`]) and the
//!   `terminal/*` family (served by the [`TerminalRegistry`]).
//!
//! Two background tasks are spawned per connection: the reader (sole
//! consumer of inbound bytes, in `reader`) and the writer
//! (sole producer of outbound bytes, see [`crate::acp::writer`]).
//!
//! # Connection states
//!
//! ```text
//! Disconnected ──initialize()──▶ Initializing ──ok──▶ Ready
//!       │                             │                 │
//!       └──────── stream lost ────────┴──── err ────────┴──▶ Exited
//! ```
//!
//! `Disconnected` means the stream is attached but the handshake has not
//! started. Session operations are only accepted in `Ready`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::acp::events::{
    ConnectionEvent, ConnectionEvents, SessionEvent, SessionEvents, TurnOutcome,
};
use crate::acp::message::{Message, RequestId, RpcError};
use crate::acp::pending::{PendingCalls, Settled, DEFAULT_REQUEST_TIMEOUT};
use crate::acp::reader::run_reader;
use crate::acp::router::SessionRouter;
use crate::acp::schema::{
    methods, AgentCapabilities, CancelParams, ClientCapabilities, ContentBlock, InitializeParams,
    InitializeResponse, LoadSessionParams, NewSessionParams, NewSessionResponse,
    PermissionOutcome, PromptParams, PromptResponse, RequestPermissionResponse, PROTOCOL_VERSION,
};
use crate::acp::terminal::TerminalRegistry;
use crate::acp::writer::{run_writer, Outbound};
use crate::{AppError, Result};

/// Tunables for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Deadline for control requests (`session/new`, `session/load`).
    pub request_timeout: Duration,
    /// Deadline for the `initialize` handshake.
    pub initialize_timeout: Duration,
    /// Working directory for terminals that do not name one.
    pub default_cwd: PathBuf,
    /// Default trailing-output cap for terminals.
    pub output_byte_limit: Option<usize>,
    /// Capabilities declared during the handshake.
    pub client_capabilities: ClientCapabilities,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            initialize_timeout: DEFAULT_REQUEST_TIMEOUT,
            default_cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            output_byte_limit: None,
            client_capabilities: ClientCapabilities::default(),
        }
    }
}

/// Lifecycle of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Stream attached, handshake not started.
    Disconnected,
    /// `initialize` sent, awaiting the reply.
    Initializing,
    /// Handshake complete; session operations allowed.
    Ready,
    /// Stream gone or handshake failed. Terminal state.
    Exited,
}

/// State shared by the client handle, the reader, and the writer.
pub(crate) struct Core {
    pub(crate) options: ClientOptions,
    pub(crate) outbound: Outbound,
    pub(crate) pending: PendingCalls,
    pub(crate) terminals: TerminalRegistry,
    pub(crate) router: SessionRouter,
    /// Open permission requests: request id → session id.
    pub(crate) permissions: Mutex<HashMap<RequestId, String>>,
    pub(crate) agent_capabilities: Mutex<Option<AgentCapabilities>>,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) connection_tx: mpsc::UnboundedSender<ConnectionEvent>,
    pub(crate) cancel: CancellationToken,
}

impl Core {
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Queue a response to a server-initiated request.
    pub(crate) fn respond(&self, id: RequestId, result: std::result::Result<Value, RpcError>) {
        let message = match result {
            Ok(value) => Message::success(id, value),
            Err(error) => Message::failure(id, error),
        };
        if let Err(err) = self.outbound.send(message) {
            debug!(error = %err, "acp client: response not sent, stream closed");
        }
    }

    /// Answer a permission request with `outcome`.
    pub(crate) fn respond_permission(&self, id: RequestId, outcome: PermissionOutcome) {
        match serde_json::to_value(RequestPermissionResponse { outcome }) {
            Ok(value) => self.respond(id, Ok(value)),
            Err(err) => self.respond(id, Err(RpcError::from(&AppError::from(err)))),
        }
    }

    /// Answer `cancelled` to every open permission request of `session_id`
    /// recorded in `permissions`. Returns how many were answered.
    pub(crate) fn drain_permissions(
        &self,
        permissions: &mut HashMap<RequestId, String>,
        session_id: &str,
    ) -> usize {
        let mut open = Vec::new();
        permissions.retain(|id, owner| {
            if owner.as_str() == session_id {
                open.push(id.clone());
                false
            } else {
                true
            }
        });
        let count = open.len();
        for id in open {
            debug!(session_id, request_id = %id, "acp client: cancelling permission prompt");
            self.respond_permission(id, PermissionOutcome::Cancelled);
        }
        count
    }

    /// Like [`Core::drain_permissions`], taking the lock itself.
    pub(crate) async fn cancel_permissions(&self, session_id: &str) -> usize {
        let mut permissions = self.permissions.lock().await;
        self.drain_permissions(&mut permissions, session_id)
    }

    /// Tear the connection down once: fail pending calls, end turns, close
    /// subscriber streams, and announce the loss. Terminals keep running.
    pub(crate) async fn teardown(&self, reason: &str, error: Option<String>) {
        let changed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Exited {
                false
            } else {
                *state = ConnectionState::Exited;
                true
            }
        });
        if !changed {
            return;
        }

        warn!(reason, error = ?error, "acp client: connection lost");
        if let Some(error) = error {
            let _ = self.connection_tx.send(ConnectionEvent::Error(error));
        }

        for settled in self.pending.fail_all(reason).await {
            if let Settled::TurnEnded {
                session_id,
                outcome,
            } = settled
            {
                self.router
                    .deliver(SessionEvent::TurnEnded {
                        session_id,
                        outcome: turn_outcome(outcome),
                    })
                    .await;
            }
        }

        self.permissions.lock().await.clear();
        self.router.clear().await;
        let _ = self.connection_tx.send(ConnectionEvent::Lost);
        self.cancel.cancel();
    }
}

/// Translate a prompt request's settlement into a [`TurnOutcome`].
pub(crate) fn turn_outcome(outcome: Result<Value>) -> TurnOutcome {
    match outcome {
        Ok(Value::Null) => TurnOutcome::Completed { stop_reason: None },
        Ok(value) => match serde_json::from_value::<PromptResponse>(value) {
            Ok(response) => TurnOutcome::Completed {
                stop_reason: response.stop_reason,
            },
            Err(err) => TurnOutcome::Failed(AppError::Acp(format!(
                "unexpected session/prompt result: {err}"
            ))),
        },
        Err(err) => TurnOutcome::Failed(err),
    }
}

/// Handle on one agent connection.
///
/// Dropping the handle stops the reader and writer tasks and kills every
/// terminal process.
pub struct AcpClient {
    core: Arc<Core>,
}

impl std::fmt::Debug for AcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcpClient")
            .field("state", &self.core.state())
            .finish_non_exhaustive()
    }
}

impl AcpClient {
    /// Attach to an agent's stdout (`reader`) and stdin (`writer`).
    ///
    /// Spawns the reader and writer tasks and returns the client together
    /// with the connection-level event stream. Call
    /// [`initialize`](Self::initialize) next.
    pub fn connect<R, W>(reader: R, writer: W, options: ClientOptions) -> (Self, ConnectionEvents)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, outbound_rx) = Outbound::channel();
        let (connection_tx, connection_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let terminals =
            TerminalRegistry::new(options.default_cwd.clone(), options.output_byte_limit);

        let core = Arc::new(Core {
            options,
            outbound,
            pending: PendingCalls::new(),
            terminals,
            router: SessionRouter::new(),
            permissions: Mutex::new(HashMap::new()),
            agent_capabilities: Mutex::new(None),
            state,
            connection_tx,
            cancel: CancellationToken::new(),
        });

        let writer_core = Arc::clone(&core);
        let writer_cancel = core.cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = run_writer(writer, outbound_rx, writer_cancel).await {
                writer_core
                    .teardown("stream write failed", Some(err.to_string()))
                    .await;
            }
        });

        tokio::spawn(run_reader(reader, Arc::clone(&core)));

        (Self { core }, connection_rx)
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    /// Perform the `initialize` handshake.
    ///
    /// Failure is fatal: the connection moves to [`ConnectionState::Exited`]
    /// and a [`ConnectionEvent::Error`] is emitted.
    ///
    /// # Errors
    ///
    /// - [`AppError::Acp`] if called twice.
    /// - Whatever the request failed with (agent error, timeout, stream loss).
    pub async fn initialize(&self) -> Result<InitializeResponse> {
        let started = self.core.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Initializing;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(AppError::Acp(format!(
                "initialize not allowed in state {:?}",
                self.state()
            )));
        }

        let params = InitializeParams {
            client_capabilities: self.core.options.client_capabilities.clone(),
            ..InitializeParams::default()
        };
        let result: Result<InitializeResponse> = self
            .request(methods::INITIALIZE, params, self.core.options.initialize_timeout)
            .await;

        match result {
            Ok(response) => {
                if response.protocol_version != PROTOCOL_VERSION {
                    warn!(
                        agent_version = response.protocol_version,
                        client_version = PROTOCOL_VERSION,
                        "acp client: protocol version mismatch"
                    );
                }
                *self.core.agent_capabilities.lock().await =
                    Some(response.agent_capabilities.clone());
                self.core.state.send_if_modified(|state| {
                    if *state == ConnectionState::Initializing {
                        *state = ConnectionState::Ready;
                        true
                    } else {
                        false
                    }
                });
                info!(
                    load_session = response.agent_capabilities.load_session,
                    "acp client: handshake complete"
                );
                Ok(response)
            }
            Err(err) => {
                error!(error = %err, "acp client: handshake failed");
                self.core
                    .teardown("initialize failed", Some(err.to_string()))
                    .await;
                Err(err)
            }
        }
    }

    /// Capabilities the agent advertised during the handshake.
    pub async fn agent_capabilities(&self) -> Option<AgentCapabilities> {
        self.core.agent_capabilities.lock().await.clone()
    }

    /// Create a session bound to `cwd` and return its id.
    ///
    /// # Errors
    ///
    /// Not ready, agent error, timeout, or stream loss.
    pub async fn create_session(&self, cwd: impl AsRef<Path>) -> Result<String> {
        self.ensure_ready()?;
        let params = NewSessionParams {
            cwd: cwd.as_ref().to_path_buf(),
            mcp_servers: Vec::new(),
        };
        let response: NewSessionResponse = self
            .request(methods::SESSION_NEW, params, self.core.options.request_timeout)
            .await?;
        info!(session_id = response.session_id.as_str(), "acp client: session created");
        Ok(response.session_id)
    }

    /// Resume `session_id` in `cwd`.
    ///
    /// The agent replays history as `session/update` notifications before
    /// it answers, so [`subscribe`](Self::subscribe) first.
    ///
    /// # Errors
    ///
    /// [`AppError::Acp`] if the agent did not advertise `loadSession`;
    /// otherwise as [`create_session`](Self::create_session).
    pub async fn load_session(&self, session_id: &str, cwd: impl AsRef<Path>) -> Result<()> {
        self.ensure_ready()?;
        let supported = self
            .core
            .agent_capabilities
            .lock()
            .await
            .as_ref()
            .is_some_and(|caps| caps.load_session);
        if !supported {
            return Err(AppError::Acp("agent does not support session/load".into()));
        }

        let params = LoadSessionParams {
            session_id: session_id.to_owned(),
            cwd: cwd.as_ref().to_path_buf(),
            mcp_servers: Vec::new(),
        };
        let _: Value = self
            .request(methods::SESSION_LOAD, params, self.core.options.request_timeout)
            .await?;
        info!(session_id, "acp client: session loaded");
        Ok(())
    }

    /// Submit a text prompt. Returns once the request is queued; the turn's
    /// end arrives as [`SessionEvent::TurnEnded`].
    ///
    /// # Errors
    ///
    /// Not ready, or the stream is closed.
    pub async fn prompt(&self, session_id: &str, text: &str) -> Result<()> {
        self.prompt_content(session_id, vec![ContentBlock::text(text)])
            .await
    }

    /// Submit a prompt made of arbitrary content blocks.
    ///
    /// # Errors
    ///
    /// Not ready, or the stream is closed.
    pub async fn prompt_content(&self, session_id: &str, prompt: Vec<ContentBlock>) -> Result<()> {
        self.ensure_ready()?;
        let params = serde_json::to_value(PromptParams {
            session_id: session_id.to_owned(),
            prompt,
        })?;

        let id = self
            .core
            .pending
            .register_turn(methods::SESSION_PROMPT, session_id)
            .await;
        self.send_registered(id, methods::SESSION_PROMPT, params)
            .await?;
        info!(session_id, id, "acp client: prompt sent");
        Ok(())
    }

    /// Ask the agent to stop the session's current turn. Best effort:
    /// failures are logged, never returned.
    ///
    /// Open permission prompts for the session are answered `cancelled`.
    pub async fn cancel(&self, session_id: &str) {
        self.core.cancel_permissions(session_id).await;

        let sent = serde_json::to_value(CancelParams {
            session_id: session_id.to_owned(),
        })
        .map_err(AppError::from)
        .and_then(|params| {
            self.core
                .outbound
                .send(Message::notification(methods::SESSION_CANCEL, params))
        });
        match sent {
            Ok(()) => info!(session_id, "acp client: cancel sent"),
            Err(err) => debug!(session_id, error = %err, "acp client: cancel not sent"),
        }
    }

    /// Answer an open permission request with the chosen option.
    ///
    /// # Errors
    ///
    /// [`AppError::NotFound`] if the request is unknown or already answered;
    /// [`AppError::ConnectionClosed`] if the stream is gone.
    pub async fn resolve_permission(&self, request_id: &RequestId, option_id: &str) -> Result<()> {
        self.answer_permission(
            request_id,
            PermissionOutcome::Selected {
                option_id: option_id.to_owned(),
            },
        )
        .await
    }

    /// Answer an open permission request with the `cancelled` outcome.
    ///
    /// # Errors
    ///
    /// As [`resolve_permission`](Self::resolve_permission).
    pub async fn dismiss_permission(&self, request_id: &RequestId) -> Result<()> {
        self.answer_permission(request_id, PermissionOutcome::Cancelled)
            .await
    }

    /// Route `session_id`'s events to a new receiver.
    ///
    /// A previous subscriber's stream ends, and permission requests it still
    /// held are answered `cancelled`.
    pub async fn subscribe(&self, session_id: &str) -> SessionEvents {
        let mut permissions = self.core.permissions.lock().await;
        let events = self.core.router.subscribe(session_id).await;
        self.core.drain_permissions(&mut permissions, session_id);
        events
    }

    /// Stop routing `session_id`'s events. Its open permission requests are
    /// answered `cancelled`.
    pub async fn unsubscribe(&self, session_id: &str) -> bool {
        let mut permissions = self.core.permissions.lock().await;
        let removed = self.core.router.unsubscribe(session_id).await;
        self.core.drain_permissions(&mut permissions, session_id);
        removed
    }

    /// The connection's pending-call table.
    #[must_use]
    pub fn pending(&self) -> &PendingCalls {
        &self.core.pending
    }

    /// The connection's terminal registry.
    #[must_use]
    pub fn terminals(&self) -> &TerminalRegistry {
        &self.core.terminals
    }

    /// Tear the connection down and kill every terminal.
    pub async fn shutdown(&self) {
        let released = self.core.terminals.release_all().await;
        debug!(released, "acp client: shutting down");
        self.core.teardown("client shut down", None).await;
    }

    async fn answer_permission(
        &self,
        request_id: &RequestId,
        outcome: PermissionOutcome,
    ) -> Result<()> {
        let Some(session_id) = self.core.permissions.lock().await.remove(request_id) else {
            return Err(AppError::NotFound(format!(
                "no open permission request {request_id}"
            )));
        };
        if self.core.outbound.is_closed() {
            return Err(AppError::ConnectionClosed("outbound stream closed".into()));
        }
        info!(
            session_id = session_id.as_str(),
            request_id = %request_id,
            ?outcome,
            "acp client: permission answered"
        );
        self.core.respond_permission(request_id.clone(), outcome);
        Ok(())
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Exited => Err(AppError::ConnectionClosed(
                "connection has exited".into(),
            )),
            other => Err(AppError::Acp(format!(
                "connection not initialized (state {other:?})"
            ))),
        }
    }

    /// Send a request and wait for its settlement.
    async fn request<P, R>(&self, method: &str, params: P, timeout: Duration) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let (id, reply) = self.core.pending.register(method, timeout).await;
        self.send_registered(id, method, params).await?;

        let value = reply
            .await
            .map_err(|_| AppError::ConnectionClosed(format!("{method} abandoned")))??;
        serde_json::from_value(value)
            .map_err(|e| AppError::Acp(format!("unexpected {method} result: {e}")))
    }

    /// Write the request for an already registered id, settling the entry
    /// if it cannot go out.
    async fn send_registered(&self, id: u64, method: &str, params: Value) -> Result<()> {
        // The connection may have died between registration and now, after
        // `fail_all` already ran.
        let sent = if self.state() == ConnectionState::Exited {
            Err(AppError::ConnectionClosed("connection has exited".into()))
        } else {
            self.core.outbound.send(Message::request(id, method, params))
        };
        if let Err(err) = sent {
            self.core.pending.reject(id, err.clone()).await;
            return Err(err);
        }
        debug!(id, method, "acp client: request sent");
        Ok(())
    }
}

impl Drop for AcpClient {
    fn drop(&mut self) {
        self.core.terminals.kill_all();
        self.core.cancel.cancel();
    }
}
