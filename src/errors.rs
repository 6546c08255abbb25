//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};

/// Shared bridge result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// JSON-RPC error code: the JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// JSON-RPC error code: the method does not exist or is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC error code: invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// JSON-RPC error code: internal error while handling the request.
pub const INTERNAL_ERROR: i64 = -32603;
/// ACP error code: the addressed resource (terminal, request) does not exist.
pub const RESOURCE_NOT_FOUND: i64 = -32002;

/// Bridge error enumeration covering all failure domains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// ACP framing or protocol failure.
    Acp(String),
    /// File-system, process, or stream I/O failure.
    Io(String),
    /// Requested entity (terminal, permission request) does not exist.
    NotFound(String),
    /// Error object returned by the agent for a specific request.
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Human-readable message supplied by the agent.
        message: String,
    },
    /// No response arrived before the request deadline.
    Timeout(String),
    /// The agent stream closed or broke.
    ConnectionClosed(String),
}

impl AppError {
    /// JSON-RPC error code used when this error answers a server-initiated request.
    #[must_use]
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::NotFound(_) => RESOURCE_NOT_FOUND,
            Self::Rpc { code, .. } => *code,
            Self::Acp(_) => INVALID_PARAMS,
            Self::Config(_) | Self::Io(_) | Self::Timeout(_) | Self::ConnectionClosed(_) => {
                INTERNAL_ERROR
            }
        }
    }

    /// Whether the error is fatal to the whole connection.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::ConnectionClosed(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Acp(msg) => write!(f, "acp: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Rpc { code, message } => write!(f, "rpc error {code}: {message}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::ConnectionClosed(msg) => write!(f, "connection closed: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Acp(format!("json: {err}"))
    }
}
