//! Unit tests for the pending-call table.

use std::time::Duration;

use serde_json::json;

use acp_bridge::acp::pending::{PendingCalls, Settled};
use acp_bridge::AppError;

const LONG: Duration = Duration::from_secs(60);

// ── Id allocation ───────────────────────────────────────────────────────────

/// Ids start at 0 and increase across plain requests and turns.
#[tokio::test]
async fn ids_are_sequential_from_zero() {
    let pending = PendingCalls::new();

    let (first, _rx0) = pending.register("initialize", LONG).await;
    let (second, _rx1) = pending.register("session/new", LONG).await;
    let third = pending.register_turn("session/prompt", "s1").await;

    assert_eq!((first, second, third), (0, 1, 2));
    assert_eq!(pending.len().await, 3);
}

// ── Settlement ──────────────────────────────────────────────────────────────

/// Responses may arrive in any order; each reaches its own caller.
#[tokio::test]
async fn out_of_order_responses_reach_their_callers() {
    let pending = PendingCalls::new();
    let (a, rx_a) = pending.register("session/new", LONG).await;
    let (b, rx_b) = pending.register("session/new", LONG).await;

    pending.resolve(b, Ok(json!({"sessionId": "second"}))).await;
    pending.resolve(a, Ok(json!({"sessionId": "first"}))).await;

    let first = rx_a.await.expect("reply").expect("success");
    let second = rx_b.await.expect("reply").expect("success");
    assert_eq!(first["sessionId"], "first");
    assert_eq!(second["sessionId"], "second");
    assert!(pending.is_empty().await);
}

/// A second settlement of the same id is ignored.
#[tokio::test]
async fn duplicate_response_is_ignored() {
    let pending = PendingCalls::new();
    let (id, rx) = pending.register("session/new", LONG).await;

    assert!(pending.resolve(id, Ok(json!(1))).await.is_some());
    assert!(pending.resolve(id, Ok(json!(2))).await.is_none());
    assert_eq!(rx.await.expect("reply").expect("success"), json!(1));
}

#[tokio::test]
async fn unknown_id_is_ignored() {
    let pending = PendingCalls::new();
    assert!(pending.resolve(42, Ok(json!(null))).await.is_none());
}

/// A turn's response is handed back instead of delivered to a waiter.
#[tokio::test]
async fn turn_response_is_returned_to_dispatcher() {
    let pending = PendingCalls::new();
    let id = pending.register_turn("session/prompt", "s1").await;

    let settled = pending
        .resolve(id, Ok(json!({"stopReason": "end_turn"})))
        .await
        .expect("turn must settle");

    match settled {
        Settled::TurnEnded {
            session_id,
            outcome,
        } => {
            assert_eq!(session_id, "s1");
            assert_eq!(outcome.expect("success")["stopReason"], "end_turn");
        }
        other => panic!("expected TurnEnded, got: {other:?}"),
    }
}

/// Turns never carry a deadline.
#[tokio::test]
async fn turns_have_no_deadline() {
    let pending = PendingCalls::new();
    pending.register_turn("session/prompt", "s1").await;
    let (_, _rx) = pending.register("session/new", LONG).await;

    let snapshot = pending.snapshot().await;
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot[0].deadline.is_none());
    assert!(snapshot[1].deadline.is_some());
}

// ── Timeouts ────────────────────────────────────────────────────────────────

/// An unanswered request fails with `Timeout` once its deadline passes.
#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out() {
    let pending = PendingCalls::new();
    let (id, rx) = pending
        .register("session/new", Duration::from_millis(50))
        .await;

    let outcome = rx.await.expect("timer must settle the call");

    assert!(
        matches!(outcome, Err(AppError::Timeout(ref msg)) if msg.contains("session/new")),
        "got: {outcome:?}"
    );
    // A late response is now just an unknown id.
    assert!(pending.resolve(id, Ok(json!({}))).await.is_none());
}

/// A response that beats the deadline disarms the timer.
#[tokio::test(start_paused = true)]
async fn response_before_deadline_wins() {
    let pending = PendingCalls::new();
    let (id, rx) = pending
        .register("session/new", Duration::from_millis(50))
        .await;

    pending.resolve(id, Ok(json!({"sessionId": "s1"}))).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let outcome = rx.await.expect("reply");
    assert_eq!(outcome.expect("success")["sessionId"], "s1");
}

// ── Connection loss ─────────────────────────────────────────────────────────

/// `fail_all` rejects every waiter and reports turns.
#[tokio::test]
async fn fail_all_rejects_everything() {
    let pending = PendingCalls::new();
    let (_, rx) = pending.register("session/new", LONG).await;
    pending.register_turn("session/prompt", "s1").await;

    let settled = pending.fail_all("stream closed").await;

    assert_eq!(settled.len(), 2);
    assert!(settled
        .iter()
        .any(|s| matches!(s, Settled::TurnEnded { session_id, outcome: Err(AppError::ConnectionClosed(_)) } if session_id == "s1")));
    assert!(matches!(
        rx.await.expect("reply"),
        Err(AppError::ConnectionClosed(ref reason)) if reason == "stream closed"
    ));
    assert!(pending.is_empty().await);
}

/// A caller that stopped waiting does not break settlement.
#[tokio::test]
async fn dropped_receiver_is_tolerated() {
    let pending = PendingCalls::new();
    let (id, rx) = pending.register("session/new", LONG).await;
    drop(rx);

    assert!(matches!(
        pending.resolve(id, Ok(json!({}))).await,
        Some(Settled::Delivered { ref method }) if method == "session/new"
    ));
}
