//! Unit tests for typed method payloads and the server-request decoder.

use serde_json::json;

use acp_bridge::acp::schema::{
    AgentRequest, ContentBlock, InitializeParams, PermissionOptionKind, PermissionOutcome,
    PromptResponse, RequestPermissionResponse, SessionNotification, SessionUpdate, StopReason,
    TerminalExitStatus, ToolCallStatus, PROTOCOL_VERSION,
};
use acp_bridge::errors::{INVALID_PARAMS, METHOD_NOT_FOUND};

// ── Handshake ───────────────────────────────────────────────────────────────

/// The default handshake announces version 1 and terminal support only.
#[test]
fn initialize_params_advertise_terminal_capability() {
    let value = serde_json::to_value(InitializeParams::default()).expect("serialize");

    assert_eq!(value["protocolVersion"], PROTOCOL_VERSION);
    assert_eq!(value["clientCapabilities"]["terminal"], true);
    assert_eq!(value["clientCapabilities"]["fs"]["readTextFile"], false);
    assert_eq!(value["clientCapabilities"]["fs"]["writeTextFile"], false);
    assert_eq!(value["clientInfo"]["name"], "acp-bridge");
}

// ── Prompt results ──────────────────────────────────────────────────────────

#[test]
fn prompt_response_reads_stop_reason() {
    let response: PromptResponse =
        serde_json::from_value(json!({"stopReason": "end_turn"})).expect("decode");
    assert_eq!(response.stop_reason, Some(StopReason::EndTurn));
}

/// An empty result object is a completed turn without a reason.
#[test]
fn empty_prompt_response_is_accepted() {
    let response: PromptResponse = serde_json::from_value(json!({})).expect("decode");
    assert_eq!(response.stop_reason, None);
}

// ── Session updates ─────────────────────────────────────────────────────────

#[test]
fn agent_message_chunk_decodes() {
    let notification: SessionNotification = serde_json::from_value(json!({
        "sessionId": "s1",
        "update": {
            "sessionUpdate": "agent_message_chunk",
            "content": {"type": "text", "text": "hi"}
        }
    }))
    .expect("decode");

    assert_eq!(notification.session_id, "s1");
    assert_eq!(
        notification.update,
        SessionUpdate::AgentMessageChunk {
            content: ContentBlock::text("hi")
        }
    );
}

#[test]
fn tool_call_update_decodes_partial_fields() {
    let update: SessionUpdate = serde_json::from_value(json!({
        "sessionUpdate": "tool_call_update",
        "toolCallId": "call_1",
        "status": "completed"
    }))
    .expect("decode");

    match update {
        SessionUpdate::ToolCallUpdate(update) => {
            assert_eq!(update.tool_call_id, "call_1");
            assert_eq!(update.status, Some(ToolCallStatus::Completed));
            assert!(update.title.is_none());
        }
        other => panic!("expected ToolCallUpdate, got: {other:?}"),
    }
}

/// Update kinds the bridge does not model still decode.
#[test]
fn unknown_update_kind_decodes_as_unknown() {
    let update: SessionUpdate = serde_json::from_value(json!({
        "sessionUpdate": "usage_update",
        "used": 12
    }))
    .expect("decode");
    assert_eq!(update, SessionUpdate::Unknown);
}

#[test]
fn unknown_content_type_is_unsupported() {
    let block: ContentBlock =
        serde_json::from_value(json!({"type": "audio", "data": "AAAA"})).expect("decode");
    assert_eq!(block, ContentBlock::Unsupported);
    assert!(block.as_text().is_none());
}

// ── Permissions ─────────────────────────────────────────────────────────────

#[test]
fn selected_outcome_serializes_with_option_id() {
    let value = serde_json::to_value(RequestPermissionResponse {
        outcome: PermissionOutcome::Selected {
            option_id: "allow".into(),
        },
    })
    .expect("serialize");
    assert_eq!(
        value,
        json!({"outcome": {"outcome": "selected", "optionId": "allow"}})
    );
}

#[test]
fn cancelled_outcome_serializes() {
    let value = serde_json::to_value(RequestPermissionResponse {
        outcome: PermissionOutcome::Cancelled,
    })
    .expect("serialize");
    assert_eq!(value, json!({"outcome": {"outcome": "cancelled"}}));
}

// ── Terminals ───────────────────────────────────────────────────────────────

#[test]
fn exit_status_serializes_camel_case() {
    let value = serde_json::to_value(TerminalExitStatus {
        exit_code: Some(0),
        signal: None,
    })
    .expect("serialize");
    assert_eq!(value, json!({"exitCode": 0, "signal": null}));
}

// ── Server-request decoding ─────────────────────────────────────────────────

#[test]
fn permission_request_decodes() {
    let request = AgentRequest::decode(
        "session/request_permission",
        json!({
            "sessionId": "s1",
            "toolCall": {"toolCallId": "call_1", "title": "Edit main.rs"},
            "options": [
                {"optionId": "allow", "name": "Allow", "kind": "allow_once"},
                {"optionId": "deny", "name": "Deny", "kind": "reject_once"}
            ]
        }),
    )
    .expect("decode");

    match request {
        AgentRequest::RequestPermission(ref params) => {
            assert_eq!(request.session_id(), Some("s1"));
            assert_eq!(params.session_id, "s1");
            assert_eq!(params.options.len(), 2);
            assert_eq!(params.options[1].kind, PermissionOptionKind::RejectOnce);
        }
        other => panic!("expected RequestPermission, got: {other:?}"),
    }
}

#[test]
fn terminal_create_defaults_optional_fields() {
    let request =
        AgentRequest::decode("terminal/create", json!({"command": "ls"})).expect("decode");

    assert_eq!(request.session_id(), None);
    match request {
        AgentRequest::CreateTerminal(params) => {
            assert_eq!(params.command, "ls");
            assert!(params.args.is_empty());
            assert!(params.env.is_empty());
            assert!(params.cwd.is_none());
            assert!(params.output_byte_limit.is_none());
        }
        other => panic!("expected CreateTerminal, got: {other:?}"),
    }
}

#[test]
fn unknown_method_is_method_not_found() {
    let err = AgentRequest::decode("fs/read_text_file", json!({"path": "/etc/hosts"}))
        .expect_err("must be rejected");
    assert_eq!(err.code, METHOD_NOT_FOUND);
    assert!(err.message.contains("fs/read_text_file"));
}

#[test]
fn bad_params_are_invalid_params() {
    let err = AgentRequest::decode("terminal/output", json!({"sessionId": "s1"}))
        .expect_err("terminalId is required");
    assert_eq!(err.code, INVALID_PARAMS);
}
