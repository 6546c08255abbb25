//! ACP reader task.
//!
//! The sole consumer of the agent's stdout. Each NDJSON line is parsed into
//! a [`Message`] and dispatched:
//!
//! | Inbound                        | Handling                                     |
//! |--------------------------------|----------------------------------------------|
//! | response                       | settles the matching [`PendingCalls`] entry  |
//! | `session/update`               | routed to the session subscriber             |
//! | `session/request_permission`   | routed as [`SessionEvent::PermissionRequested`] |
//! | `terminal/*`                   | served by the terminal registry on its own task |
//! | any other request              | answered `-32601`                            |
//! | any other notification         | skipped; logged at `DEBUG`                   |
//!
//! Malformed lines are logged and skipped. EOF, an I/O error, or
//! cancellation ends the loop and tears the connection down.
//!
//! [`PendingCalls`]: crate::acp::pending::PendingCalls

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, trace, warn};

use crate::acp::client::{turn_outcome, Core};
use crate::acp::codec::AcpCodec;
use crate::acp::events::SessionEvent;
use crate::acp::message::{parse_line, Message, RequestId, RpcError};
use crate::acp::pending::Settled;
use crate::acp::schema::{
    methods, AgentRequest, PermissionOutcome, RequestPermissionParams, SessionNotification,
};
use crate::acp::terminal::TerminalRegistry;
use crate::errors::INTERNAL_ERROR;
use crate::{AppError, Result};

/// Reader task. Runs until EOF, a fatal read error, or cancellation, then
/// tears the connection down.
pub(crate) async fn run_reader<R>(reader: R, core: Arc<Core>)
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(reader, AcpCodec::new());
    let cancel = core.cancel.clone();
    // FramedRead yields one `None` after a decode error, then resumes.
    let mut after_framing_error = false;

    let (reason, error) = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("acp reader: cancellation received, stopping");
                break ("connection shut down", None);
            }

            item = framed.next() => match item {
                None if after_framing_error => {
                    after_framing_error = false;
                }

                None => {
                    debug!("acp reader: EOF detected");
                    break ("stream closed", None);
                }

                Some(Err(AppError::Acp(ref msg))) => {
                    warn!(error = msg.as_str(), "acp reader: codec framing error, skipping");
                    after_framing_error = true;
                }

                Some(Err(e)) => {
                    warn!(error = %e, "acp reader: IO error, stopping");
                    break ("stream error", Some(e.to_string()));
                }

                Some(Ok(line)) => {
                    after_framing_error = false;
                    match parse_line(&line) {
                        Ok(Some(message)) => dispatch(&core, message).await,
                        Ok(None) => {}
                        Err(e) => {
                            warn!(
                                error = %e,
                                raw_line = %line,
                                "acp reader: parse error, skipping line"
                            );
                        }
                    }
                }
            },
        }
    };

    core.teardown(reason, error).await;
}

/// Handle one inbound frame.
async fn dispatch(core: &Arc<Core>, message: Message) {
    trace!(method = ?message.method(), "acp reader: frame in");
    match message {
        Message::Response { id, result } => on_response(core, &id, result).await,
        Message::Notification { method, params } => on_notification(core, &method, params).await,
        Message::Request { id, method, params } => on_request(core, id, &method, params).await,
    }
}

async fn on_response(core: &Core, id: &RequestId, result: std::result::Result<Value, RpcError>) {
    let Some(numeric) = id.as_u64() else {
        debug!(id = %id, "acp reader: response with foreign id, ignored");
        return;
    };

    match core.pending.resolve(numeric, result.map_err(AppError::from)).await {
        None => debug!(id = numeric, "acp reader: response for unknown id, ignored"),
        Some(Settled::Delivered { method }) => {
            trace!(id = numeric, method = method.as_str(), "acp reader: response delivered");
        }
        Some(Settled::TurnEnded {
            session_id,
            outcome,
        }) => {
            debug!(session_id = session_id.as_str(), "acp reader: turn ended");
            route(
                core,
                SessionEvent::TurnEnded {
                    session_id,
                    outcome: turn_outcome(outcome),
                },
            )
            .await;
        }
    }
}

async fn on_notification(core: &Core, method: &str, params: Value) {
    if method != methods::SESSION_UPDATE {
        debug!(method, "acp reader: skipping unknown notification");
        return;
    }

    match serde_json::from_value::<SessionNotification>(params) {
        Ok(notification) => {
            route(
                core,
                SessionEvent::Update {
                    session_id: notification.session_id,
                    update: notification.update,
                },
            )
            .await;
        }
        Err(e) => warn!(error = %e, "acp reader: malformed session/update, skipping"),
    }
}

async fn on_request(core: &Arc<Core>, id: RequestId, method: &str, params: Value) {
    let request = match AgentRequest::decode(method, params) {
        Ok(request) => request,
        Err(error) => {
            warn!(id = %id, method, code = error.code, "acp reader: rejecting request");
            core.respond(id, Err(error));
            return;
        }
    };

    match request {
        AgentRequest::RequestPermission(params) => on_permission(core, id, params).await,
        terminal => {
            debug!(
                id = %id,
                method,
                session_id = ?terminal.session_id(),
                "acp reader: serving terminal request"
            );
            let core = Arc::clone(core);
            tokio::spawn(async move {
                let terminals = core.terminals.clone();
                // Run the handler on its own task so a panic still yields a
                // response.
                let reply = match tokio::spawn(serve_terminal(terminals, terminal)).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => {
                        debug!(id = %id, error = %err, "acp reader: terminal request failed");
                        Err(RpcError::from(&err))
                    }
                    Err(join) => {
                        warn!(id = %id, error = %join, "acp reader: terminal handler aborted");
                        Err(RpcError::new(
                            INTERNAL_ERROR,
                            format!("terminal handler failed: {join}"),
                        ))
                    }
                };
                core.respond(id, reply);
            });
        }
    }
}

/// Record the request and hand it to the session subscriber, or answer
/// `cancelled` when nobody could ever resolve it.
async fn on_permission(core: &Core, id: RequestId, params: RequestPermissionParams) {
    let session_id = params.session_id;
    // Held across delivery so a concurrent unsubscribe sees the entry.
    let mut permissions = core.permissions.lock().await;
    permissions.insert(id.clone(), session_id.clone());
    let delivered = core
        .router
        .deliver(SessionEvent::PermissionRequested {
            session_id: session_id.clone(),
            request_id: id.clone(),
            tool_call: params.tool_call,
            options: params.options,
        })
        .await;

    if !delivered {
        warn!(
            session_id = session_id.as_str(),
            request_id = %id,
            "acp reader: permission request for unsubscribed session, cancelling"
        );
        core.drain_permissions(&mut permissions, &session_id);
    }
}

/// Deliver a session event. A subscriber that went away takes its open
/// permission requests with it.
async fn route(core: &Core, event: SessionEvent) {
    let session_id = event.session_id().to_owned();
    if !core.router.deliver(event).await {
        core.cancel_permissions(&session_id).await;
    }
}

/// Serve one `terminal/*` request.
async fn serve_terminal(terminals: TerminalRegistry, request: AgentRequest) -> Result<Value> {
    match request {
        AgentRequest::CreateTerminal(params) => {
            let response = terminals.create(params).await?;
            Ok(serde_json::to_value(response)?)
        }
        AgentRequest::TerminalOutput(params) => {
            let response = terminals.output(&params.terminal_id).await?;
            Ok(serde_json::to_value(response)?)
        }
        AgentRequest::WaitForTerminalExit(params) => {
            let status = terminals.wait_for_exit(&params.terminal_id).await?;
            Ok(serde_json::to_value(status)?)
        }
        AgentRequest::KillTerminal(params) => {
            terminals.kill(&params.terminal_id).await?;
            Ok(json!({}))
        }
        AgentRequest::ReleaseTerminal(params) => {
            terminals.release(&params.terminal_id).await?;
            Ok(json!({}))
        }
        AgentRequest::RequestPermission(_) => Err(AppError::Acp(
            "session/request_permission is not a terminal request".into(),
        )),
    }
}
