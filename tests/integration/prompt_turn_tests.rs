//! Integration tests for prompt turns, cancellation, and update routing.

use std::time::Duration;

use serde_json::json;

use acp_bridge::acp::events::{SessionEvent, TurnOutcome};
use acp_bridge::acp::schema::{ContentBlock, SessionUpdate, StopReason};
use acp_bridge::{AppError, ClientOptions};

use super::test_helpers::{next_event, ready_session, text_chunk};

// ── Turns ───────────────────────────────────────────────────────────────────

/// Updates stream to the subscriber in order, then the prompt response ends
/// the turn. An empty result is a completed turn without a stop reason.
#[tokio::test]
async fn streamed_updates_then_turn_end() {
    let (client, _connection, mut agent, mut events) =
        ready_session(ClientOptions::default()).await;

    client.prompt("s1", "hello").await.expect("prompt queued");
    let frame = agent.expect_method("session/prompt").await;
    assert_eq!(frame["params"]["sessionId"], "s1");
    assert_eq!(
        frame["params"]["prompt"],
        json!([{"type": "text", "text": "hello"}])
    );

    agent.update("s1", text_chunk("Hi")).await;
    agent.update("s1", text_chunk(" there")).await;
    agent.reply(&frame, json!({})).await;

    for expected in ["Hi", " there"] {
        assert_eq!(
            next_event(&mut events).await,
            SessionEvent::Update {
                session_id: "s1".into(),
                update: SessionUpdate::AgentMessageChunk {
                    content: ContentBlock::text(expected)
                },
            }
        );
    }
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::TurnEnded {
            session_id: "s1".into(),
            outcome: TurnOutcome::Completed { stop_reason: None },
        }
    );
    assert!(client.pending().is_empty().await);
}

/// Prompts never time out, no matter how short the request deadline.
#[tokio::test]
async fn prompt_has_no_deadline() {
    let options = ClientOptions {
        request_timeout: Duration::from_millis(50),
        ..ClientOptions::default()
    };
    let (client, _connection, mut agent, mut events) = ready_session(options).await;

    client.prompt("s1", "slow task").await.expect("prompt queued");
    let frame = agent.expect_method("session/prompt").await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.pending().len().await, 1);

    agent
        .reply(&frame, json!({"stopReason": "end_turn"}))
        .await;
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::TurnEnded {
            outcome: TurnOutcome::Completed {
                stop_reason: Some(StopReason::EndTurn)
            },
            ..
        }
    ));
}

/// An error answer to the prompt ends the turn as failed.
#[tokio::test]
async fn prompt_error_fails_the_turn() {
    let (client, _connection, mut agent, mut events) =
        ready_session(ClientOptions::default()).await;

    client.prompt("s1", "hello").await.expect("prompt queued");
    let frame = agent.expect_method("session/prompt").await;
    agent
        .send(json!({"jsonrpc": "2.0", "id": frame["id"], "error": {"code": -32603, "message": "model overloaded"}}))
        .await;

    match next_event(&mut events).await {
        SessionEvent::TurnEnded {
            outcome: TurnOutcome::Failed(AppError::Rpc { code, message }),
            ..
        } => {
            assert_eq!(code, -32603);
            assert_eq!(message, "model overloaded");
        }
        other => panic!("expected failed turn, got: {other:?}"),
    }
}

// ── Cancellation ────────────────────────────────────────────────────────────

/// Cancel is a notification; the turn still ends through the prompt
/// response.
#[tokio::test]
async fn cancel_sends_notification_and_turn_ends_cancelled() {
    let (client, _connection, mut agent, mut events) =
        ready_session(ClientOptions::default()).await;

    client.prompt("s1", "long job").await.expect("prompt queued");
    let prompt = agent.expect_method("session/prompt").await;

    client.cancel("s1").await;
    let cancel = agent.expect_method("session/cancel").await;
    assert!(cancel.get("id").is_none(), "cancel must be a notification");
    assert_eq!(cancel["params"]["sessionId"], "s1");

    agent
        .reply(&prompt, json!({"stopReason": "cancelled"}))
        .await;
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::TurnEnded {
            outcome: TurnOutcome::Completed {
                stop_reason: Some(StopReason::Cancelled)
            },
            ..
        }
    ));
}

/// Cancelling after the stream is gone is silently ignored.
#[tokio::test]
async fn cancel_after_disconnect_is_silent() {
    let (client, _connection, agent, _events) = ready_session(ClientOptions::default()).await;
    drop(agent);
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.cancel("s1").await;
}

// ── Routing ─────────────────────────────────────────────────────────────────

/// Updates for sessions without a subscriber are dropped without
/// disturbing other sessions.
#[tokio::test]
async fn update_for_unsubscribed_session_is_dropped() {
    let (_client, _connection, mut agent, mut events) =
        ready_session(ClientOptions::default()).await;

    agent.update("s2", text_chunk("for nobody")).await;
    agent.update("s1", text_chunk("for s1")).await;

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Update {
            session_id: "s1".into(),
            update: SessionUpdate::AgentMessageChunk {
                content: ContentBlock::text("for s1")
            },
        }
    );
}

/// Unknown update kinds are forwarded as `Unknown`.
#[tokio::test]
async fn unknown_update_kind_is_forwarded() {
    let (_client, _connection, mut agent, mut events) =
        ready_session(ClientOptions::default()).await;

    agent
        .update("s1", json!({"sessionUpdate": "usage_update", "used": 3}))
        .await;

    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Update {
            update: SessionUpdate::Unknown,
            ..
        }
    ));
}

/// Garbage, blank, and over-long lines are skipped; the connection keeps
/// working.
#[tokio::test]
async fn malformed_lines_are_skipped() {
    let (_client, _connection, mut agent, mut events) =
        ready_session(ClientOptions::default()).await;

    agent.send_raw("not json at all").await;
    agent.send_raw("").await;
    agent.send_raw(r#"{"jsonrpc":"2.0"}"#).await;
    agent.send_raw(&"x".repeat(1_048_577)).await;
    agent.update("s1", text_chunk("still alive")).await;

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Update {
            session_id: "s1".into(),
            update: SessionUpdate::AgentMessageChunk {
                content: ContentBlock::text("still alive")
            },
        }
    );
}

/// Unknown notifications are ignored.
#[tokio::test]
async fn unknown_notification_is_ignored() {
    let (_client, _connection, mut agent, mut events) =
        ready_session(ClientOptions::default()).await;

    agent
        .send(json!({"jsonrpc": "2.0", "method": "$/progress", "params": {}}))
        .await;
    agent.update("s1", text_chunk("next")).await;

    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Update { .. }
    ));
}
