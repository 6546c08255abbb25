//! Pending-call table for client-initiated requests.
//!
//! Every request the bridge sends gets a fresh correlation id and an entry
//! here. The entry is settled exactly once, by whichever comes first:
//!
//! - a matching response ([`PendingCalls::resolve`]),
//! - its deadline (a timer task armed at registration), or
//! - the stream dying ([`PendingCalls::fail_all`]).
//!
//! Removal from the map is the single point of truth: whoever removes the
//! entry delivers the outcome, so a late response after a timeout is simply
//! an unknown id.
//!
//! Prompt requests are registered as *turns*: they carry no deadline and no
//! waiting caller. Their response is handed back to the dispatcher as
//! [`Settled::TurnEnded`] so it can be announced to the session subscriber.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Default deadline for control requests (`initialize`, `session/new`, …).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Receiver half handed to the caller of a registered request.
pub type ReplyReceiver = oneshot::Receiver<Result<Value>>;

enum Completion {
    Reply(oneshot::Sender<Result<Value>>),
    Turn { session_id: String },
}

struct PendingCall {
    method: String,
    deadline: Option<Instant>,
    completion: Completion,
    timer: Option<AbortHandle>,
}

/// Outcome of settling one entry, for the dispatcher to act on.
#[derive(Debug)]
pub enum Settled {
    /// The waiting caller was handed the result.
    Delivered {
        /// Method of the settled request.
        method: String,
    },
    /// A prompt request finished, i.e. the turn is over.
    TurnEnded {
        /// Session whose turn ended.
        session_id: String,
        /// The prompt's result or error.
        outcome: Result<Value>,
    },
}

/// Snapshot of one outstanding entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInfo {
    /// Correlation id.
    pub id: u64,
    /// Method name.
    pub method: String,
    /// When the entry times out; `None` for turns.
    pub deadline: Option<Instant>,
}

/// Shared table of outstanding client-initiated requests.
///
/// Cheap to clone; all clones share one table and one id counter.
#[derive(Clone, Default)]
pub struct PendingCalls {
    next_id: Arc<AtomicU64>,
    entries: Arc<Mutex<HashMap<u64, PendingCall>>>,
}

impl std::fmt::Debug for PendingCalls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCalls")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl PendingCalls {
    /// Empty table; the first allocated id is `0`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for `method` and arm its deadline.
    ///
    /// The returned receiver yields exactly one of: the agent's result, the
    /// agent's error ([`AppError::Rpc`]), [`AppError::Timeout`], or the
    /// reason passed to [`fail_all`](Self::fail_all).
    pub async fn register(&self, method: &str, timeout: Duration) -> (u64, ReplyReceiver) {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        // Hold the lock across arming the timer so it can never observe the
        // map before the entry lands in it.
        let mut entries = self.entries.lock().await;
        let table = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            table.expire(id, timeout).await;
        });
        entries.insert(
            id,
            PendingCall {
                method: method.to_owned(),
                deadline: Some(Instant::now() + timeout),
                completion: Completion::Reply(tx),
                timer: Some(timer.abort_handle()),
            },
        );
        drop(entries);

        debug!(id, method, "pending: request registered");
        (id, rx)
    }

    /// Allocate an id for a `session/prompt` request. Turns never time out.
    pub async fn register_turn(&self, method: &str, session_id: &str) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().await.insert(
            id,
            PendingCall {
                method: method.to_owned(),
                deadline: None,
                completion: Completion::Turn {
                    session_id: session_id.to_owned(),
                },
                timer: None,
            },
        );
        debug!(id, session_id, "pending: turn registered");
        id
    }

    /// Settle `id` with `outcome`.
    ///
    /// Returns `None` when the id is unknown (already settled or never
    /// issued); that is not an error.
    pub async fn resolve(&self, id: u64, outcome: Result<Value>) -> Option<Settled> {
        let call = self.entries.lock().await.remove(&id)?;
        Some(settle(id, call, outcome))
    }

    /// Settle `id` with an error.
    pub async fn reject(&self, id: u64, err: AppError) -> Option<Settled> {
        self.resolve(id, Err(err)).await
    }

    /// Reject every outstanding entry with [`AppError::ConnectionClosed`].
    ///
    /// Returns what was settled so turn entries can be announced.
    pub async fn fail_all(&self, reason: &str) -> Vec<Settled> {
        let drained: Vec<(u64, PendingCall)> = self.entries.lock().await.drain().collect();
        if !drained.is_empty() {
            warn!(
                count = drained.len(),
                reason, "pending: failing all outstanding calls"
            );
        }
        drained
            .into_iter()
            .map(|(id, call)| {
                settle(id, call, Err(AppError::ConnectionClosed(reason.to_owned())))
            })
            .collect()
    }

    /// Number of outstanding entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether nothing is outstanding.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Outstanding entries, ordered by id.
    pub async fn snapshot(&self) -> Vec<PendingInfo> {
        let entries = self.entries.lock().await;
        let mut infos: Vec<PendingInfo> = entries
            .iter()
            .map(|(id, call)| PendingInfo {
                id: *id,
                method: call.method.clone(),
                deadline: call.deadline,
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    async fn expire(&self, id: u64, timeout: Duration) {
        let Some(call) = self.entries.lock().await.remove(&id) else {
            return;
        };
        warn!(
            id,
            method = call.method.as_str(),
            ?timeout,
            "pending: request timed out, agent may be stalled"
        );
        let err = AppError::Timeout(format!(
            "no response to {} (id {id}) within {timeout:?}",
            call.method
        ));
        settle(id, call, Err(err));
    }
}

fn settle(id: u64, call: PendingCall, outcome: Result<Value>) -> Settled {
    if let Some(timer) = call.timer {
        timer.abort();
    }
    match call.completion {
        Completion::Reply(tx) => {
            if tx.send(outcome).is_err() {
                debug!(id, method = call.method.as_str(), "pending: caller no longer waiting");
            }
            Settled::Delivered {
                method: call.method,
            }
        }
        Completion::Turn { session_id } => Settled::TurnEnded {
            session_id,
            outcome,
        },
    }
}
