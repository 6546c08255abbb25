//! Typed events the bridge hands to the application.
//!
//! Session-scoped events travel through the
//! [`SessionRouter`](crate::acp::router::SessionRouter) to whoever subscribed
//! to that session. Connection-scoped events go to the single
//! [`ConnectionEvents`] receiver returned by
//! [`AcpClient::connect`](crate::acp::client::AcpClient::connect).

use tokio::sync::mpsc;

use crate::acp::message::RequestId;
use crate::acp::schema::{PermissionOption, SessionUpdate, StopReason, ToolCallUpdate};
use crate::AppError;

/// Receiver for one session's events.
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// Receiver for connection-level events.
pub type ConnectionEvents = mpsc::UnboundedReceiver<ConnectionEvent>;

/// Something that happened within one session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A `session/update` notification.
    Update {
        /// Session the update belongs to.
        session_id: String,
        /// The update payload.
        update: SessionUpdate,
    },
    /// The agent asks for approval; answer with
    /// [`AcpClient::resolve_permission`](crate::acp::client::AcpClient::resolve_permission).
    PermissionRequested {
        /// Session the tool call belongs to.
        session_id: String,
        /// Id to pass back when resolving.
        request_id: RequestId,
        /// Tool call awaiting approval.
        tool_call: ToolCallUpdate,
        /// Choices to offer.
        options: Vec<PermissionOption>,
    },
    /// The agent answered the session's `session/prompt` request.
    TurnEnded {
        /// Session whose turn ended.
        session_id: String,
        /// How it ended.
        outcome: TurnOutcome,
    },
}

impl SessionEvent {
    /// Session the event belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::Update { session_id, .. }
            | Self::PermissionRequested { session_id, .. }
            | Self::TurnEnded { session_id, .. } => session_id,
        }
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The prompt request succeeded.
    Completed {
        /// Reported stop reason, if the agent sent one.
        stop_reason: Option<StopReason>,
    },
    /// The agent answered with an error, or the connection died mid-turn.
    Failed(AppError),
}

/// Something that happened to the connection as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A transport or handshake failure.
    Error(String),
    /// The stream is gone; no further traffic is possible.
    Lost,
}
