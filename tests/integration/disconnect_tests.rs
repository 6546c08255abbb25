//! Integration tests for connection loss and teardown.

use std::time::Duration;

use serde_json::json;

use acp_bridge::acp::events::{ConnectionEvent, SessionEvent, TurnOutcome};
use acp_bridge::{AppError, ClientOptions, ConnectionState};

use super::test_helpers::{next_connection_event, next_event, ready_session, STEP};

/// EOF fails every waiter, ends open turns, closes session streams, and
/// announces the loss.
#[tokio::test]
async fn eof_fails_everything_outstanding() {
    let (client, mut connection, mut agent, mut events) =
        ready_session(ClientOptions::default()).await;

    client.prompt("s1", "work").await.expect("prompt queued");
    agent.expect_method("session/prompt").await;

    let (created, ()) = tokio::join!(client.create_session("/other"), async {
        agent.expect_method("session/new").await;
        drop(agent);
    });

    assert!(matches!(created, Err(AppError::ConnectionClosed(_))), "got: {created:?}");
    match next_event(&mut events).await {
        SessionEvent::TurnEnded {
            session_id,
            outcome: TurnOutcome::Failed(err),
        } => {
            assert_eq!(session_id, "s1");
            assert!(err.is_transport(), "got: {err:?}");
        }
        other => panic!("expected failed turn, got: {other:?}"),
    }
    assert_eq!(
        tokio::time::timeout(STEP, events.recv()).await.expect("stream must close"),
        None
    );
    assert_eq!(
        next_connection_event(&mut connection).await,
        ConnectionEvent::Lost
    );
    assert_eq!(client.state(), ConnectionState::Exited);
    assert!(client.pending().is_empty().await);
}

/// After the connection is gone, new calls fail immediately.
#[tokio::test]
async fn calls_after_exit_fail_fast() {
    let (client, mut connection, agent, _events) = ready_session(ClientOptions::default()).await;
    drop(agent);
    assert_eq!(
        next_connection_event(&mut connection).await,
        ConnectionEvent::Lost
    );

    assert!(matches!(
        client.create_session("/work").await,
        Err(AppError::ConnectionClosed(_))
    ));
    assert!(matches!(
        client.prompt("s1", "hi").await,
        Err(AppError::ConnectionClosed(_))
    ));
}

/// Explicit shutdown closes the stream the agent reads.
#[tokio::test]
async fn shutdown_closes_the_agent_stream() {
    let (client, mut connection, mut agent, _events) =
        ready_session(ClientOptions::default()).await;

    client.shutdown().await;

    assert_eq!(client.state(), ConnectionState::Exited);
    assert_eq!(
        next_connection_event(&mut connection).await,
        ConnectionEvent::Lost
    );
    assert!(agent.closed_within(STEP).await);
}

/// Frames queued before shutdown still reach the agent.
#[tokio::test]
async fn shutdown_flushes_queued_frames() {
    let (client, _connection, mut agent, _events) =
        ready_session(ClientOptions::default()).await;

    client.cancel("s1").await;
    client.shutdown().await;

    let cancel = agent.expect_method("session/cancel").await;
    assert_eq!(cancel["params"]["sessionId"], "s1");
    assert!(agent.closed_within(STEP).await);
}

/// Dropping the client stops its tasks and closes the stream.
#[tokio::test]
async fn dropping_the_client_closes_the_stream() {
    let (client, _connection, mut agent, _events) =
        ready_session(ClientOptions::default()).await;

    drop(client);

    assert!(agent.closed_within(STEP).await);
}

/// A response to an id the client never issued is ignored.
#[tokio::test]
async fn stray_response_is_ignored() {
    let (client, _connection, mut agent, _events) =
        ready_session(ClientOptions::default()).await;

    agent
        .send(json!({"jsonrpc": "2.0", "id": 999, "result": {}}))
        .await;
    agent
        .send(json!({"jsonrpc": "2.0", "id": "foreign", "result": {}}))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(client.state(), ConnectionState::Ready);
}
