//! JSON-RPC envelopes exchanged with the agent.
//!
//! Every line on the stream is one of three shapes:
//!
//! | Shape         | Fields                                   |
//! |---------------|------------------------------------------|
//! | request       | `id`, `method`, `params`                 |
//! | response      | `id`, `result` *or* `error`              |
//! | notification  | `method`, `params` (no `id`)             |
//!
//! Either side may send a request, so the classification is purely
//! structural: a `method` makes it a request (with `id`) or notification
//! (without), an `id` without a `method` makes it a response.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::INVALID_REQUEST;
use crate::{AppError, Result};

/// JSON-RPC protocol version stamped on every outbound frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// Correlation id of a request; the wire allows integers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id; every id the bridge allocates is of this form.
    Number(i64),
    /// String id, only ever chosen by the agent.
    Str(String),
}

impl RequestId {
    /// The id as a client-issued correlation number, if it can be one.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => u64::try_from(*n).ok(),
            Self::Str(_) => None,
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self::Number(i64::try_from(id).unwrap_or(i64::MAX))
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable description.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Error object with no `data` member.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl From<&AppError> for RpcError {
    fn from(err: &AppError) -> Self {
        match err {
            AppError::Rpc { code, message } => Self::new(*code, message.clone()),
            other => Self::new(other.rpc_code(), other.to_string()),
        }
    }
}

impl From<RpcError> for AppError {
    fn from(err: RpcError) -> Self {
        Self::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

/// One decoded line of the agent stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A call that expects exactly one response.
    Request {
        /// Correlation id chosen by the sender.
        id: RequestId,
        /// Method name, e.g. `session/new`.
        method: String,
        /// Method parameters (`null` when absent).
        params: Value,
    },
    /// The answer to an earlier request.
    Response {
        /// Correlation id of the request being answered.
        id: RequestId,
        /// `Ok(result)` or `Err(error object)`.
        result: std::result::Result<Value, RpcError>,
    },
    /// A one-way message; never answered.
    Notification {
        /// Method name, e.g. `session/update`.
        method: String,
        /// Method parameters (`null` when absent).
        params: Value,
    },
}

impl Message {
    /// Build a request frame.
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self::Request {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Build a notification frame.
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }

    /// Build a successful response frame.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self::Response {
            id,
            result: Ok(result),
        }
    }

    /// Build an error response frame.
    #[must_use]
    pub fn failure(id: RequestId, error: RpcError) -> Self {
        Self::Response {
            id,
            result: Err(error),
        }
    }

    /// Method name for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            Self::Response { .. } => None,
        }
    }

    /// Render the frame as a JSON object with the stable field set.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), json!(JSONRPC_VERSION));
        match self {
            Self::Request { id, method, params } => {
                obj.insert("id".into(), json!(id));
                obj.insert("method".into(), json!(method));
                obj.insert("params".into(), params.clone());
            }
            Self::Response { id, result } => {
                obj.insert("id".into(), json!(id));
                match result {
                    Ok(value) => obj.insert("result".into(), value.clone()),
                    Err(error) => obj.insert("error".into(), json!(error)),
                };
            }
            Self::Notification { method, params } => {
                obj.insert("method".into(), json!(method));
                obj.insert("params".into(), params.clone());
            }
        }
        Value::Object(obj)
    }

    /// Serialise to a single line of JSON without the trailing newline;
    /// [`AcpCodec`](crate::acp::codec::AcpCodec) appends it.
    #[must_use]
    pub fn to_line(&self) -> String {
        self.to_value().to_string()
    }
}

/// Loosely typed envelope used only for classification.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// Classify one inbound line.
///
/// - `Ok(None)`: blank line, nothing to do.
/// - `Ok(Some(message))`: a well-formed request, response, or notification.
/// - `Err(AppError::Acp(..))`: not JSON, not an object, or neither `method`
///   nor `id` present. The caller logs and drops the line.
///
/// # Errors
///
/// Returns [`AppError::Acp`] for any line that is not a JSON-RPC frame.
pub fn parse_line(line: &str) -> Result<Option<Message>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let raw: RawEnvelope = serde_json::from_str(trimmed)
        .map_err(|e| AppError::Acp(format!("malformed json: {e}")))?;

    let params = raw.params.unwrap_or(Value::Null);
    match (raw.id, raw.method) {
        (Some(id), Some(method)) => Ok(Some(Message::Request { id, method, params })),
        (None, Some(method)) => Ok(Some(Message::Notification { method, params })),
        (Some(id), None) => {
            let result = match raw.error {
                Some(error) => Err(error),
                None => Ok(raw.result.unwrap_or(Value::Null)),
            };
            Ok(Some(Message::Response { id, result }))
        }
        (None, None) => Err(AppError::Acp(format!(
            "invalid frame (code {INVALID_REQUEST}): neither `method` nor `id` present"
        ))),
    }
}
