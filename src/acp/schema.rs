//! Typed payloads for every ACP method the bridge sends or serves.
//!
//! Field names follow the wire format (`camelCase`); enum discriminants
//! are `snake_case`. Unknown update kinds and tool-call details are kept as
//! raw [`Value`]s so a newer agent never breaks decoding.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::acp::message::RpcError;
use crate::errors::{INVALID_PARAMS, METHOD_NOT_FOUND};

/// Protocol version the bridge speaks.
pub const PROTOCOL_VERSION: u16 = 1;

/// Method names used on the wire.
pub mod methods {
    /// Client → agent: capability handshake.
    pub const INITIALIZE: &str = "initialize";
    /// Client → agent: create a session.
    pub const SESSION_NEW: &str = "session/new";
    /// Client → agent: resume a session.
    pub const SESSION_LOAD: &str = "session/load";
    /// Client → agent: start a turn.
    pub const SESSION_PROMPT: &str = "session/prompt";
    /// Client → agent: cancel the running turn.
    pub const SESSION_CANCEL: &str = "session/cancel";
    /// Agent → client: streamed session activity.
    pub const SESSION_UPDATE: &str = "session/update";
    /// Agent → client: ask the user to approve a tool call.
    pub const REQUEST_PERMISSION: &str = "session/request_permission";
    /// Agent → client: spawn a terminal.
    pub const TERMINAL_CREATE: &str = "terminal/create";
    /// Agent → client: snapshot terminal output.
    pub const TERMINAL_OUTPUT: &str = "terminal/output";
    /// Agent → client: wait for a terminal to exit.
    pub const TERMINAL_WAIT_FOR_EXIT: &str = "terminal/wait_for_exit";
    /// Agent → client: kill a terminal.
    pub const TERMINAL_KILL: &str = "terminal/kill";
    /// Agent → client: kill and forget a terminal.
    pub const TERMINAL_RELEASE: &str = "terminal/release";
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// Parameters of `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Highest protocol version the client supports.
    pub protocol_version: u16,
    /// What the client can do for the agent.
    pub client_capabilities: ClientCapabilities,
    /// Name and version of the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<Implementation>,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            client_capabilities: ClientCapabilities::default(),
            client_info: Some(Implementation {
                name: env!("CARGO_PKG_NAME").to_owned(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
            }),
        }
    }
}

/// Capabilities advertised by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// File-system access offered to the agent.
    #[serde(default)]
    pub fs: FsCapabilities,
    /// Whether the `terminal/*` methods are served.
    #[serde(default)]
    pub terminal: bool,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        Self {
            fs: FsCapabilities::default(),
            terminal: true,
        }
    }
}

/// File-system capabilities; the bridge serves neither.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsCapabilities {
    /// `fs/read_text_file` support.
    #[serde(default)]
    pub read_text_file: bool,
    /// `fs/write_text_file` support.
    #[serde(default)]
    pub write_text_file: bool,
}

/// Name/version pair identifying one side of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Program name.
    pub name: String,
    /// Program version.
    pub version: String,
}

/// Result of `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    /// Version the agent chose.
    #[serde(default)]
    pub protocol_version: u16,
    /// What the agent supports.
    #[serde(default)]
    pub agent_capabilities: AgentCapabilities,
    /// Authentication methods the agent offers.
    #[serde(default)]
    pub auth_methods: Vec<Value>,
}

/// Capabilities advertised by the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    /// Whether `session/load` is supported.
    #[serde(default)]
    pub load_session: bool,
    /// Content types accepted in prompts.
    #[serde(default)]
    pub prompt_capabilities: Value,
}

// ── Sessions ──────────────────────────────────────────────────────────────────

/// Parameters of `session/new`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionParams {
    /// Working directory the session is bound to.
    pub cwd: PathBuf,
    /// MCP servers the agent should connect to.
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
}

/// Result of `session/new`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResponse {
    /// Identifier minted by the agent.
    pub session_id: String,
}

/// Parameters of `session/load`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSessionParams {
    /// Session to resume.
    pub session_id: String,
    /// Working directory the session is bound to.
    pub cwd: PathBuf,
    /// MCP servers the agent should connect to.
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
}

/// Parameters of `session/prompt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptParams {
    /// Target session.
    pub session_id: String,
    /// User message content.
    pub prompt: Vec<ContentBlock>,
}

/// Result of `session/prompt`; arrives when the turn is over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    /// Why the agent stopped; older agents answer with an empty object.
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
}

/// Reason a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model finished its answer.
    EndTurn,
    /// Token limit reached.
    MaxTokens,
    /// Model request limit for the turn reached.
    MaxTurnRequests,
    /// The model refused to continue.
    Refusal,
    /// The client cancelled the turn.
    Cancelled,
}

/// Parameters of the `session/cancel` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelParams {
    /// Session whose turn should stop.
    pub session_id: String,
}

/// A piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// Base64 image.
    #[serde(rename_all = "camelCase")]
    Image {
        /// Base64 payload.
        data: String,
        /// MIME type, e.g. `image/png`.
        mime_type: String,
    },
    /// Reference to a resource the agent can read.
    ResourceLink {
        /// Resource URI.
        uri: String,
        /// Display name.
        name: String,
    },
    /// Any content type this bridge does not model.
    #[serde(other)]
    Unsupported,
}

impl ContentBlock {
    /// Text content block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// The text of a text block.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

// ── Session updates ───────────────────────────────────────────────────────────

/// Parameters of the `session/update` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotification {
    /// Session the update belongs to.
    pub session_id: String,
    /// What happened.
    pub update: SessionUpdate,
}

/// Streamed session activity, discriminated by `sessionUpdate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sessionUpdate", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// Echo of user input (during `session/load` replay).
    UserMessageChunk {
        /// Chunk content.
        content: ContentBlock,
    },
    /// Assistant text fragment.
    AgentMessageChunk {
        /// Chunk content.
        content: ContentBlock,
    },
    /// Assistant reasoning fragment.
    AgentThoughtChunk {
        /// Chunk content.
        content: ContentBlock,
    },
    /// A tool call started.
    ToolCall(ToolCall),
    /// A tool call progressed or finished.
    ToolCallUpdate(ToolCallUpdate),
    /// The agent's execution plan changed.
    Plan {
        /// Plan entries, passed through untouched.
        #[serde(default)]
        entries: Vec<Value>,
    },
    /// Slash commands available in the session changed.
    #[serde(rename_all = "camelCase")]
    AvailableCommandsUpdate {
        /// Command descriptors.
        #[serde(default)]
        available_commands: Vec<Value>,
    },
    /// The session mode changed.
    #[serde(rename_all = "camelCase")]
    CurrentModeUpdate {
        /// New mode id.
        current_mode_id: String,
    },
    /// An update kind this bridge does not model.
    #[serde(other)]
    Unknown,
}

/// A tool call as first announced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Identifier unique within the session.
    pub tool_call_id: String,
    /// Human-readable title.
    pub title: String,
    /// Tool category (`read`, `edit`, `execute`, …).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Lifecycle status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolCallStatus>,
    /// Produced content, passed through untouched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<Value>,
    /// Raw tool input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<Value>,
}

/// Partial tool-call fields; absent fields are unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallUpdate {
    /// Tool call being updated.
    pub tool_call_id: String,
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// New status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolCallStatus>,
    /// Replacement content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<Value>>,
    /// Raw tool input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<Value>,
}

/// Tool-call lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Not started yet (e.g. waiting for permission).
    Pending,
    /// Running.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

// ── Permission ────────────────────────────────────────────────────────────────

/// Parameters of `session/request_permission`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPermissionParams {
    /// Session the tool call belongs to.
    pub session_id: String,
    /// Tool call awaiting approval.
    pub tool_call: ToolCallUpdate,
    /// Choices offered to the user.
    pub options: Vec<PermissionOption>,
}

/// One choice in a permission prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    /// Identifier returned when the option is chosen.
    pub option_id: String,
    /// Label shown to the user.
    pub name: String,
    /// Semantic hint.
    pub kind: PermissionOptionKind,
}

/// Semantic category of a permission option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOptionKind {
    /// Allow this one call.
    AllowOnce,
    /// Allow this and future calls of the same kind.
    AllowAlways,
    /// Reject this one call.
    RejectOnce,
    /// Reject this and future calls of the same kind.
    RejectAlways,
}

/// Result of `session/request_permission`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPermissionResponse {
    /// The user's decision.
    pub outcome: PermissionOutcome,
}

/// What the user decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PermissionOutcome {
    /// The prompt was dismissed or the turn was cancelled.
    Cancelled,
    /// One of the offered options was chosen.
    #[serde(rename_all = "camelCase")]
    Selected {
        /// The chosen option's id.
        option_id: String,
    },
}

// ── Terminals ─────────────────────────────────────────────────────────────────

/// One environment variable for a spawned terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVariable {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

/// Parameters of `terminal/create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminalParams {
    /// Session on whose behalf the terminal runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Program to run.
    pub command: String,
    /// Argument vector (without the program).
    #[serde(default)]
    pub args: Vec<String>,
    /// Variables overlaid on the inherited environment.
    #[serde(default)]
    pub env: Vec<EnvVariable>,
    /// Working directory; the client default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Keep at most this many trailing output bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_byte_limit: Option<usize>,
}

/// Result of `terminal/create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminalResponse {
    /// Handle for subsequent terminal calls.
    pub terminal_id: String,
}

/// Parameters shared by output, wait, kill, and release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalParams {
    /// Session on whose behalf the call is made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Terminal handle.
    pub terminal_id: String,
}

/// How a terminal process ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalExitStatus {
    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,
    /// Signal name, when the process was killed by one.
    pub signal: Option<String>,
}

/// Result of `terminal/output`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalOutputResponse {
    /// Combined stdout/stderr captured so far.
    pub output: String,
    /// Whether leading output was discarded to honour the byte limit.
    pub truncated: bool,
    /// Exit status once the process has ended.
    pub exit_status: Option<TerminalExitStatus>,
}

// ── Agent → client request decoding ───────────────────────────────────────────

/// A server-initiated request, decoded exhaustively by method.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentRequest {
    /// `session/request_permission`
    RequestPermission(RequestPermissionParams),
    /// `terminal/create`
    CreateTerminal(CreateTerminalParams),
    /// `terminal/output`
    TerminalOutput(TerminalParams),
    /// `terminal/wait_for_exit`
    WaitForTerminalExit(TerminalParams),
    /// `terminal/kill`
    KillTerminal(TerminalParams),
    /// `terminal/release`
    ReleaseTerminal(TerminalParams),
}

impl AgentRequest {
    /// Decode `params` for `method`.
    ///
    /// # Errors
    ///
    /// Returns the error object to send back: `-32601` for a method the
    /// bridge does not serve, `-32602` when the parameters do not fit.
    pub fn decode(method: &str, params: Value) -> Result<Self, RpcError> {
        match method {
            methods::REQUEST_PERMISSION => {
                decode_params(method, params).map(Self::RequestPermission)
            }
            methods::TERMINAL_CREATE => decode_params(method, params).map(Self::CreateTerminal),
            methods::TERMINAL_OUTPUT => decode_params(method, params).map(Self::TerminalOutput),
            methods::TERMINAL_WAIT_FOR_EXIT => {
                decode_params(method, params).map(Self::WaitForTerminalExit)
            }
            methods::TERMINAL_KILL => decode_params(method, params).map(Self::KillTerminal),
            methods::TERMINAL_RELEASE => decode_params(method, params).map(Self::ReleaseTerminal),
            other => Err(RpcError::new(
                METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            )),
        }
    }

    /// Session the request was made for, when the agent supplied one.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::RequestPermission(p) => Some(&p.session_id),
            Self::CreateTerminal(p) => p.session_id.as_deref(),
            Self::TerminalOutput(p)
            | Self::WaitForTerminalExit(p)
            | Self::KillTerminal(p)
            | Self::ReleaseTerminal(p) => p.session_id.as_deref(),
        }
    }
}

fn decode_params<T>(method: &str, params: Value) -> Result<T, RpcError>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_value(params)
        .map_err(|e| RpcError::new(INVALID_PARAMS, format!("invalid params for {method}: {e}")))
}
