//! Single-writer task for the outbound half of the stream.
//!
//! Every frame the bridge emits (its own requests, responses to the
//! agent's requests, notifications) is queued on one channel and written by
//! one task, so concurrent callers can never interleave partial lines.
//! The queue is unbounded: the reader task answers requests through it and
//! must never wait on the agent draining its stdin.

use std::time::Duration;

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::acp::codec::AcpCodec;
use crate::acp::message::Message;
use crate::{AppError, Result};

/// How long frames queued before cancellation may take to flush.
const FLUSH_GRACE: Duration = Duration::from_secs(1);

/// Cloneable handle for queueing outbound frames.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<Message>,
}

impl Outbound {
    /// Create the handle and the receiver the writer task drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue `message` for writing.
    ///
    /// # Errors
    ///
    /// [`AppError::ConnectionClosed`] once the writer task has stopped.
    pub fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| AppError::ConnectionClosed("outbound stream closed".into()))
    }

    /// Whether the writer task has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Writer task: drains `msg_rx` into `writer`, one NDJSON line per frame.
///
/// Exits cleanly when `cancel` fires or every [`Outbound`] handle is dropped.
/// On cancellation the queue is closed and frames already in it are still
/// written, bounded by a short grace period.
///
/// # Errors
///
/// [`AppError::ConnectionClosed`] when a write fails (the agent went away).
pub async fn run_writer<W>(
    writer: W,
    mut msg_rx: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut framed = FramedWrite::new(writer, AcpCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("acp writer: cancellation received, flushing queue");
                msg_rx.close();
                let flushed = tokio::time::timeout(FLUSH_GRACE, async {
                    while let Ok(message) = msg_rx.try_recv() {
                        write_frame(&mut framed, &message).await?;
                    }
                    Ok::<(), AppError>(())
                })
                .await;
                match flushed {
                    Ok(result) => result?,
                    Err(_) => debug!("acp writer: flush timed out, dropping queued frames"),
                }
                break;
            }

            msg = msg_rx.recv() => {
                let Some(message) = msg else {
                    debug!("acp writer: message channel closed, stopping");
                    break;
                };
                write_frame(&mut framed, &message).await?;
            }
        }
    }

    Ok(())
}

async fn write_frame<W>(framed: &mut FramedWrite<W, AcpCodec>, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = message.to_line();
    trace!(line = line.as_str(), "acp writer: frame out");
    framed.send(line).await.map_err(|e| {
        warn!(error = %e, "acp writer: write failed");
        AppError::ConnectionClosed(format!("write failed: {e}"))
    })
}
