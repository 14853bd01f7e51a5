//! Buffer-until-subscribed replay primitive
//!
//! A [`ReplayBuffer`] lets a consumer subscribe late to a hot source and still
//! see every item the source produced since the buffer was connected.
//!
//! # Lifecycle
//!
//! ```text
//!  connect()            first subscribe()              swap observes empty
//! ──────────► buffering ───────────────────► draining ─────────────────────► live
//!             (queue)                        (swap + drain batches)          (fan-out)
//! ```
//!
//! - Before the first consumer arrives every item is queued.
//! - The first consumer repeatedly swaps the queue out and drains it. Buffering
//!   ends when a swap finds the queue empty; that same lock acquisition
//!   attaches the consumer to the live channel.
//! - Consumers arriving after the first only see items produced after they
//!   subscribed.
//! - Completion and errors are queued behind buffered items and forwarded to
//!   live consumers, so everybody sees the terminal signal last and once.

mod gate;
mod subscription;

use std::sync::Arc;

use futures::stream::{BoxStream, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::{AbortHandle, JoinHandle};

use crate::types::{DocumentError, DocumentResult, UpstreamError};
use gate::{Claim, Gate, Signal};

pub use subscription::Subscription;

/// How the upstream of a replay buffer ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The source ran to completion
    Completed,
    /// The source reported an error
    Failed(UpstreamError),
    /// The connection was torn down before the source finished
    Cancelled,
}

/// Connectable buffer that replays everything produced since `connect()` to
/// its first subscriber.
pub struct ReplayBuffer<T: Clone> {
    gate: Arc<Gate<T>>,
    source: Mutex<Option<BoxStream<'static, Result<T, UpstreamError>>>>,
    handle: Handle,
}

impl<T: Clone + Send + 'static> ReplayBuffer<T> {
    /// Wrap `source`, pumping it on the current Tokio runtime once connected.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new<S>(source: S) -> Self
    where
        S: Stream<Item = Result<T, UpstreamError>> + Send + 'static,
    {
        Self::with_handle(source, Handle::current())
    }

    /// Wrap `source`, pumping it on the runtime behind `handle`
    pub fn with_handle<S>(source: S, handle: Handle) -> Self
    where
        S: Stream<Item = Result<T, UpstreamError>> + Send + 'static,
    {
        Self {
            gate: Arc::new(Gate::new()),
            source: Mutex::new(Some(source.boxed())),
            handle,
        }
    }

    /// Start consuming the upstream source.
    ///
    /// May only be called once; a second call fails with
    /// [`DocumentError::AlreadyConnected`].
    pub fn connect(&self) -> DocumentResult<Connection> {
        let source = self
            .source
            .lock()
            .take()
            .ok_or(DocumentError::AlreadyConnected)?;

        let task = self.handle.spawn(pump(source, self.gate.clone()));
        Ok(Connection {
            abort: task.abort_handle(),
            task: Some(task),
        })
    }

    /// Attach a consumer.
    ///
    /// The first consumer ever receives the buffered backlog followed by live
    /// items; every later consumer receives live items only.
    pub fn subscribe(&self) -> Subscription<T> {
        match self.gate.claim() {
            Claim::Replay { id } => Subscription::replay(self.gate.clone(), id),
            Claim::Live { id, rx } => Subscription::live(self.gate.clone(), id, rx),
        }
    }

    /// Whether items are still being queued for the first consumer
    pub fn is_buffering(&self) -> bool {
        self.gate.is_buffering()
    }

    /// Number of signals waiting in the backlog
    pub fn buffered_len(&self) -> usize {
        self.gate.buffered_len()
    }

    /// Number of attached consumers
    pub fn subscriber_count(&self) -> usize {
        self.gate.subscriber_count()
    }

    /// Whether `connect()` has been called
    pub fn is_connected(&self) -> bool {
        self.source.lock().is_none()
    }

    /// Whether the upstream has completed, failed or been torn down
    pub fn is_terminated(&self) -> bool {
        self.gate.is_terminated()
    }

    /// Drop the backlog while nobody has subscribed yet. Callers that can
    /// recover earlier items elsewhere use this to keep the queue bounded.
    pub(crate) fn discard_unclaimed(&self) {
        self.gate.discard_unclaimed();
    }
}

impl<T: Clone> Drop for ReplayBuffer<T> {
    fn drop(&mut self) {
        // Never connected: nothing will ever arrive, release waiting consumers
        if self.source.get_mut().is_some() {
            self.gate.terminate(Signal::Completed);
        }
    }
}

/// Handle to the upstream pump started by [`ReplayBuffer::connect`].
///
/// Dropping it (or calling [`disconnect`](Connection::disconnect)) tears down
/// the upstream subscription; consumers then observe completion.
pub struct Connection {
    abort: AbortHandle,
    task: Option<JoinHandle<Termination>>,
}

impl Connection {
    /// Stop consuming the upstream source
    pub fn disconnect(&self) {
        self.abort.abort();
    }

    /// Handle that can stop the pump from elsewhere
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Wait for the upstream to finish
    pub async fn finished(mut self) -> Termination {
        let Some(task) = self.task.take() else {
            return Termination::Cancelled;
        };
        match task.await {
            Ok(termination) => termination,
            Err(e) if e.is_cancelled() => Termination::Cancelled,
            Err(e) => Termination::Failed(UpstreamError::new(format!(
                "upstream task panicked: {}",
                e
            ))),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.abort.abort();
        }
    }
}

/// Completes the gate if the pump is dropped before its source finished
struct CompleteOnDrop<T: Clone>(Arc<Gate<T>>);

impl<T: Clone> Drop for CompleteOnDrop<T> {
    fn drop(&mut self) {
        self.0.terminate(Signal::Completed);
    }
}

async fn pump<T: Clone>(
    mut source: BoxStream<'static, Result<T, UpstreamError>>,
    gate: Arc<Gate<T>>,
) -> Termination {
    let _complete = CompleteOnDrop(gate.clone());

    while let Some(item) = source.next().await {
        match item {
            Ok(value) => gate.push(value),
            Err(e) => {
                gate.terminate(Signal::Failed(e.clone()));
                return Termination::Failed(e);
            }
        }
    }

    gate.terminate(Signal::Completed);
    Termination::Completed
}
