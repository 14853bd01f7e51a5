//! Write side of a document: persisting pipeline, session and completion handle

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use super::Shared;
use crate::replay::{Connection, ReplayBuffer, Termination};
use crate::types::{DocumentError, DocumentResult, PersistedByte, UpstreamError, WriteSummary};

/// State owned by one `write()` call
pub(crate) struct WriteSession {
    pub(crate) id: u64,
    pub(crate) start_offset: u64,
    pub(crate) started_at: i64,
    pub(crate) replay: ReplayBuffer<PersistedByte>,
    cancelled: AtomicBool,
    abort: Mutex<Option<AbortHandle>>,
    store_error: Mutex<Option<io::Error>>,
}

impl WriteSession {
    pub(crate) fn new(id: u64, start_offset: u64, replay: ReplayBuffer<PersistedByte>) -> Self {
        Self {
            id,
            start_offset,
            started_at: chrono::Utc::now().timestamp_millis(),
            replay,
            cancelled: AtomicBool::new(false),
            abort: Mutex::new(None),
            store_error: Mutex::new(None),
        }
    }

    pub(crate) fn set_abort_handle(&self, abort: AbortHandle) {
        *self.abort.lock() = Some(abort);
    }

    /// Stop the upstream pump. The caller must already have released the
    /// session from the document state so no further byte is persisted.
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = self.abort.lock().as_ref() {
            abort.abort();
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn record_store_error(&self, e: io::Error) {
        *self.store_error.lock() = Some(e);
    }

    fn take_store_error(&self) -> Option<io::Error> {
        self.store_error.lock().take()
    }
}

/// Result of trying to persist one byte
pub(crate) enum Persist {
    Written(PersistedByte),
    /// The session no longer owns the document (cancelled or disposed)
    Stale,
    Failed(UpstreamError),
}

/// Adapt a raw byte source into the stream of persisted bytes a session's
/// replay buffer consumes.
pub(crate) fn persisting<S, E>(
    shared: Arc<Shared>,
    session_id: u64,
    source: S,
) -> impl Stream<Item = Result<PersistedByte, UpstreamError>> + Send + 'static
where
    S: Stream<Item = Result<u8, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut source = Box::pin(source);
        while let Some(item) = source.next().await {
            let value = match item {
                Ok(value) => value,
                Err(e) => {
                    yield Err(UpstreamError::new(e));
                    return;
                }
            };

            match shared.persist(session_id, value) {
                Persist::Written(byte) => {
                    yield Ok(byte);
                }
                Persist::Stale => return,
                Persist::Failed(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    }
}

/// Wait for the pump, release the write state and report the outcome
pub(crate) async fn supervise(
    shared: Arc<Shared>,
    session: Arc<WriteSession>,
    connection: Connection,
    done: oneshot::Sender<DocumentResult<WriteSummary>>,
) {
    let termination = connection.finished().await;
    let end_offset = shared.finish_write(&session);

    let outcome = if session.is_cancelled() {
        Err(DocumentError::WriteCancelled)
    } else {
        match termination {
            Termination::Completed => Ok(WriteSummary {
                start_offset: session.start_offset,
                bytes_written: end_offset.saturating_sub(session.start_offset),
                started_at: session.started_at,
                finished_at: chrono::Utc::now().timestamp_millis(),
            }),
            Termination::Failed(e) => match session.take_store_error() {
                Some(io) => Err(DocumentError::Store(io)),
                None => Err(DocumentError::UpstreamFailure(e)),
            },
            Termination::Cancelled => Err(DocumentError::WriteCancelled),
        }
    };

    match &outcome {
        Ok(summary) => tracing::debug!(
            start = summary.start_offset,
            bytes = summary.bytes_written,
            "write completed"
        ),
        Err(DocumentError::WriteCancelled) => {
            tracing::debug!(start = session.start_offset, "write cancelled")
        }
        Err(e) => tracing::warn!(start = session.start_offset, error = %e, "write failed"),
    }

    // The caller may have dropped its handle
    let _ = done.send(outcome);
}

/// Completion handle returned by [`Document::write`](super::Document::write).
///
/// Resolves when the source completes, fails or the write is cancelled.
/// Dropping the handle does not stop the write.
pub struct WriteHandle {
    pub(crate) shared: Arc<Shared>,
    pub(crate) session: Arc<WriteSession>,
    pub(crate) done: oneshot::Receiver<DocumentResult<WriteSummary>>,
}

impl WriteHandle {
    /// Store offset where this write began
    pub fn start_offset(&self) -> u64 {
        self.session.start_offset
    }

    /// Cancel the write without disposing the document.
    ///
    /// The handle then resolves with [`DocumentError::WriteCancelled`] and a
    /// new write may start. No-op if the write already finished.
    pub fn cancel(&self) {
        self.shared.cancel_write(&self.session);
    }
}

impl Future for WriteHandle {
    type Output = DocumentResult<WriteSummary>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.done).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Supervisor dropped without reporting: runtime shut down mid-write
            Poll::Ready(Err(_)) => Poll::Ready(Err(DocumentError::WriteCancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for WriteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteHandle")
            .field("start_offset", &self.session.start_offset)
            .field("cancelled", &self.session.is_cancelled())
            .finish()
    }
}
