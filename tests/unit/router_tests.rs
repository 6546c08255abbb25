//! Unit tests for session event routing.

use acp_bridge::acp::events::{SessionEvent, TurnOutcome};
use acp_bridge::acp::router::SessionRouter;
use acp_bridge::acp::schema::{ContentBlock, SessionUpdate};

fn chunk(session_id: &str, text: &str) -> SessionEvent {
    SessionEvent::Update {
        session_id: session_id.into(),
        update: SessionUpdate::AgentMessageChunk {
            content: ContentBlock::text(text),
        },
    }
}

#[tokio::test]
async fn events_reach_only_their_session() {
    let router = SessionRouter::new();
    let mut s1 = router.subscribe("s1").await;
    let mut s2 = router.subscribe("s2").await;

    assert!(router.deliver(chunk("s1", "one")).await);
    assert!(router.deliver(chunk("s2", "two")).await);

    assert_eq!(s1.recv().await, Some(chunk("s1", "one")));
    assert_eq!(s2.recv().await, Some(chunk("s2", "two")));
    assert!(s1.try_recv().is_err());
}

/// Events for a session nobody listens to are dropped.
#[tokio::test]
async fn unsubscribed_session_drops_events() {
    let router = SessionRouter::new();
    assert!(!router.deliver(chunk("s9", "lost")).await);
}

/// Delivery order matches arrival order.
#[tokio::test]
async fn order_is_preserved() {
    let router = SessionRouter::new();
    let mut rx = router.subscribe("s1").await;

    for text in ["a", "b", "c"] {
        router.deliver(chunk("s1", text)).await;
    }
    router
        .deliver(SessionEvent::TurnEnded {
            session_id: "s1".into(),
            outcome: TurnOutcome::Completed { stop_reason: None },
        })
        .await;

    assert_eq!(rx.recv().await, Some(chunk("s1", "a")));
    assert_eq!(rx.recv().await, Some(chunk("s1", "b")));
    assert_eq!(rx.recv().await, Some(chunk("s1", "c")));
    assert!(matches!(rx.recv().await, Some(SessionEvent::TurnEnded { .. })));
}

/// Re-subscribing replaces the old receiver, whose stream ends.
#[tokio::test]
async fn resubscribe_replaces_previous_subscriber() {
    let router = SessionRouter::new();
    let mut old = router.subscribe("s1").await;
    let mut new = router.subscribe("s1").await;

    router.deliver(chunk("s1", "x")).await;

    assert_eq!(old.recv().await, None);
    assert_eq!(new.recv().await, Some(chunk("s1", "x")));
    assert_eq!(router.len().await, 1);
}

/// A dropped receiver is pruned on the next delivery.
#[tokio::test]
async fn dropped_receiver_is_pruned() {
    let router = SessionRouter::new();
    let rx = router.subscribe("s1").await;
    drop(rx);

    assert!(!router.has_subscriber("s1").await);
    assert!(!router.deliver(chunk("s1", "x")).await);
    assert!(router.is_empty().await);
}

#[tokio::test]
async fn unsubscribe_and_clear() {
    let router = SessionRouter::new();
    let _a = router.subscribe("a").await;
    let mut b = router.subscribe("b").await;

    assert!(router.unsubscribe("a").await);
    assert!(!router.unsubscribe("a").await);

    router.clear().await;
    assert!(router.is_empty().await);
    assert_eq!(b.recv().await, None);
}
