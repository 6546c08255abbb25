//! Session router: session id → subscriber channel.
//!
//! Delivery never blocks the reader: subscriber channels are unbounded and
//! an event for a session nobody listens to is dropped on the spot.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::acp::events::{SessionEvent, SessionEvents};

/// Shared routing table. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SessionRouter {
    subscribers: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<SessionEvent>>>>,
}

impl SessionRouter {
    /// Empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `session_id` to a fresh channel, replacing any previous
    /// subscriber (whose stream then ends).
    pub async fn subscribe(&self, session_id: &str) -> SessionEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        if self
            .subscribers
            .lock()
            .await
            .insert(session_id.to_owned(), tx)
            .is_some()
        {
            debug!(session_id, "router: subscriber replaced");
        }
        rx
    }

    /// Stop routing `session_id`. Returns whether a subscriber existed.
    pub async fn unsubscribe(&self, session_id: &str) -> bool {
        self.subscribers.lock().await.remove(session_id).is_some()
    }

    /// Whether a live subscriber exists for `session_id`.
    pub async fn has_subscriber(&self, session_id: &str) -> bool {
        self.subscribers
            .lock()
            .await
            .get(session_id)
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Hand `event` to its session's subscriber.
    ///
    /// Returns `false` (and logs) when nobody is subscribed or the receiver
    /// was dropped; a dropped receiver is unsubscribed.
    pub async fn deliver(&self, event: SessionEvent) -> bool {
        let mut subscribers = self.subscribers.lock().await;
        let session_id = event.session_id().to_owned();
        let Some(tx) = subscribers.get(&session_id) else {
            warn!(
                session_id = session_id.as_str(),
                "router: no subscriber for session, event dropped"
            );
            return false;
        };

        if tx.send(event).is_err() {
            subscribers.remove(&session_id);
            debug!(
                session_id = session_id.as_str(),
                "router: subscriber gone, event dropped"
            );
            return false;
        }
        true
    }

    /// Drop every subscriber; their streams end.
    pub async fn clear(&self) {
        self.subscribers.lock().await.clear();
    }

    /// Number of registered subscribers.
    pub async fn len(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Whether no subscriber is registered.
    pub async fn is_empty(&self) -> bool {
        self.subscribers.lock().await.is_empty()
    }
}
